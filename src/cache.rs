use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::store::SourceUnit;

pub type ChunkId = String;

/// A memoized chunk summary, valid while `content_hash` matches the chunk's
/// current text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCacheEntry {
    pub chunk_id: ChunkId,
    pub session_id: Option<String>,
    pub content_hash: String,
    pub summary_text: String,
}

/// Trim and collapse every whitespace run to one space.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of the normalized text.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(normalize(text).as_bytes());
    hex::encode(digest)
}

/// In-memory, per-engine chunk summary cache keyed by chunk id.
#[derive(Debug, Default)]
pub struct ChunkCache {
    entries: HashMap<ChunkId, ChunkCacheEntry>,
}

impl ChunkCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached text for `chunk_id`, only if it was produced from text with
    /// `hash`.
    #[must_use]
    pub fn get(&self, chunk_id: &str, hash: &str) -> Option<&str> {
        self.entries
            .get(chunk_id)
            .filter(|e| e.content_hash == hash)
            .map(|e| e.summary_text.as_str())
    }

    #[must_use]
    pub fn entry(&self, chunk_id: &str) -> Option<&ChunkCacheEntry> {
        self.entries.get(chunk_id)
    }

    pub fn upsert(&mut self, entry: ChunkCacheEntry) {
        self.entries.insert(entry.chunk_id.clone(), entry);
    }

    pub fn evict(&mut self, chunk_id: &str) -> Option<ChunkCacheEntry> {
        self.entries.remove(chunk_id)
    }

    /// Evict entries whose text changed and report which chunks need a fresh
    /// model call: changed ones and ones never cached. Unchanged entries are
    /// left untouched.
    pub fn clear_changed_chunks(&mut self, chunks: &[SourceUnit]) -> HashSet<ChunkId> {
        let mut stale = HashSet::new();

        for chunk in chunks {
            let hash = content_hash(&chunk.text);
            match self.entries.get(&chunk.id) {
                Some(entry) if entry.content_hash == hash => {}
                Some(_) => {
                    self.entries.remove(&chunk.id);
                    tracing::debug!("chunk {} changed, evicted cached summary", chunk.id);
                    stale.insert(chunk.id.clone());
                }
                None => {
                    stale.insert(chunk.id.clone());
                }
            }
        }

        stale
    }

    /// Drop entries of `session_id` for chunks no longer in the session.
    pub fn retain_session(&mut self, session_id: &str, chunk_ids: &[&str]) {
        self.entries.retain(|id, entry| {
            entry.session_id.as_deref() != Some(session_id) || chunk_ids.contains(&id.as_str())
        });
    }

    #[must_use]
    pub fn count_for_session(&self, session_id: &str) -> usize {
        self.entries
            .values()
            .filter(|e| e.session_id.as_deref() == Some(session_id))
            .count()
    }

    /// Cached texts for `chunks` in order, or `None` if any is missing or stale.
    #[must_use]
    pub fn texts_for(&self, chunks: &[SourceUnit]) -> Option<Vec<&str>> {
        chunks
            .iter()
            .map(|c| self.get(&c.id, &content_hash(&c.text)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
