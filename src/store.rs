use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RecapError, Result};
use crate::level::SummaryLevel;
use crate::parse::StructuredSummary;

/// One piece of source text: a transcript chunk, or a lower-level summary
/// rendered as text when building a rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl SourceUnit {
    #[must_use]
    pub fn new(id: &str, session_id: Option<&str>, text: &str) -> Self {
        Self {
            id: id.to_string(),
            session_id: session_id.map(ToString::to_string),
            text: text.to_string(),
            recorded_at: None,
        }
    }

    #[must_use]
    pub const fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(at);
        self
    }
}

/// A finished summary for one period, as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub level: SummaryLevel,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub summary: StructuredSummary,
}

impl SummaryRecord {
    /// Whether `other` replaces this record on upsert. A session record is
    /// keyed by its session id alone, since its period grows with the session.
    fn same_period(&self, other: &Self) -> bool {
        if self.level != other.level || self.session_id != other.session_id {
            return false;
        }
        if self.level == SummaryLevel::Session && self.session_id.is_some() {
            return true;
        }
        self.period_start == other.period_start && self.period_end == other.period_end
    }
}

/// Read access to transcripts and an idempotent summary upsert.
pub trait SummaryStore: Send + Sync {
    fn chunk_text(&self, chunk_id: &str) -> Result<Option<String>>;

    /// Chunks of a session in recording order.
    fn session_chunks(&self, session_id: &str) -> Result<Vec<SourceUnit>>;

    /// Insert or replace the record for `(level, period_start, period_end,
    /// session_id)`, or for `(level, session_id)` when it is a session summary.
    fn upsert_summary(&self, record: SummaryRecord) -> Result<()>;

    /// Records of `level` whose period starts in `[start, end)`, oldest first.
    /// A record spanning a boundary belongs to the period it starts in.
    fn summaries_in(
        &self,
        level: SummaryLevel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SummaryRecord>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    chunks: Vec<SourceUnit>,
    #[serde(default)]
    summaries: Vec<SummaryRecord>,
}

impl StoreData {
    fn session_chunks(&self, session_id: &str) -> Vec<SourceUnit> {
        let mut chunks: Vec<SourceUnit> = self
            .chunks
            .iter()
            .filter(|c| c.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.recorded_at);
        chunks
    }

    fn upsert(&mut self, record: SummaryRecord) {
        if let Some(existing) = self.summaries.iter_mut().find(|r| r.same_period(&record)) {
            *existing = record;
        } else {
            self.summaries.push(record);
        }
    }

    fn summaries_in(
        &self,
        level: SummaryLevel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<SummaryRecord> {
        let mut found: Vec<SummaryRecord> = self
            .summaries
            .iter()
            .filter(|r| r.level == level && r.period_start >= start && r.period_start < end)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.period_start);
        found
    }
}

/// Store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk, or replace the text of an existing one with the same id.
    pub fn put_chunk(&self, unit: SourceUnit) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = data.chunks.iter_mut().find(|c| c.id == unit.id) {
            *existing = unit;
        } else {
            data.chunks.push(unit);
        }
    }

    #[must_use]
    pub fn summary_count(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .summaries
            .len()
    }
}

impl SummaryStore for MemoryStore {
    fn chunk_text(&self, chunk_id: &str) -> Result<Option<String>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .chunks
            .iter()
            .find(|c| c.id == chunk_id)
            .map(|c| c.text.clone()))
    }

    fn session_chunks(&self, session_id: &str) -> Result<Vec<SourceUnit>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.session_chunks(session_id))
    }

    fn upsert_summary(&self, record: SummaryRecord) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.upsert(record);
        Ok(())
    }

    fn summaries_in(
        &self,
        level: SummaryLevel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SummaryRecord>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.summaries_in(level, start, end))
    }
}

const TRANSCRIPTS_FILE: &str = "transcripts.json";
const SUMMARIES_FILE: &str = "summaries.json";

/// Store backed by two JSON files in a directory: `transcripts.json` (a list
/// of chunks, written by the transcription side) and `summaries.json`.
#[derive(Debug)]
pub struct JsonStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            RecapError::Store(format!("failed to create store directory {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    fn read_json<T: serde::de::DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let contents = fs::read_to_string(&path)
            .map_err(|e| RecapError::Store(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| RecapError::Store(format!("failed to parse {}: {e}", path.display())))
    }

    /// Write via a temp file and rename.
    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = path.with_extension("json.part");
        let contents = serde_json::to_string_pretty(value)
            .map_err(|e| RecapError::Store(format!("failed to serialize {name}: {e}")))?;
        fs::write(&tmp, contents)
            .map_err(|e| RecapError::Store(format!("failed to write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| RecapError::Store(format!("failed to replace {}: {e}", path.display())))
    }

    fn load(&self) -> Result<StoreData> {
        Ok(StoreData {
            chunks: self.read_json(TRANSCRIPTS_FILE)?,
            summaries: self.read_json(SUMMARIES_FILE)?,
        })
    }
}

impl SummaryStore for JsonStore {
    fn chunk_text(&self, chunk_id: &str) -> Result<Option<String>> {
        let chunks: Vec<SourceUnit> = self.read_json(TRANSCRIPTS_FILE)?;
        Ok(chunks.into_iter().find(|c| c.id == chunk_id).map(|c| c.text))
    }

    fn session_chunks(&self, session_id: &str) -> Result<Vec<SourceUnit>> {
        Ok(self.load()?.session_chunks(session_id))
    }

    fn upsert_summary(&self, record: SummaryRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut data = StoreData {
            chunks: Vec::new(),
            summaries: self.read_json(SUMMARIES_FILE)?,
        };
        data.upsert(record);
        self.write_json(SUMMARIES_FILE, &data.summaries)?;
        tracing::debug!("stored summary in {}", self.dir.display());
        Ok(())
    }

    fn summaries_in(
        &self,
        level: SummaryLevel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SummaryRecord>> {
        let summaries: Vec<SummaryRecord> = self.read_json(SUMMARIES_FILE)?;
        let data = StoreData {
            chunks: Vec::new(),
            summaries,
        };
        Ok(data.summaries_in(level, start, end))
    }
}
