use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::cache::{ChunkCache, ChunkCacheEntry, ChunkId, content_hash};
use crate::config::{Config, LocalConfig};
use crate::error::{RecapError, Result};
use crate::extractive;
use crate::generate::{GenerationConfig, StreamingGenerator};
use crate::level::SummaryLevel;
use crate::models::{self, WeightSize};
use crate::parse::{ResponseParser, StructuredSummary, SummaryOrigin};
use crate::prompt::{self, FieldFallback, FieldKind};
use crate::store::SourceUnit;

use super::runtime::{LocalRuntime, ProcessRuntime, RuntimeRequest};
use super::{EngineTier, RequestContext, SummarizationEngine, join_units};

struct LocalState {
    cache: ChunkCache,
    invocations: u64,
}

/// On-device generation from a quantized weight file.
///
/// Chunk summaries are memoized by content hash, so re-summarizing a session
/// after an edit only runs the model for the chunks that changed.
pub struct LocalEngine {
    model_path: PathBuf,
    weights: WeightSize,
    generator: StreamingGenerator,
    runtime: Arc<dyn LocalRuntime>,
    state: Mutex<LocalState>,
    /// Set by a fatal model error; cleared only by `reprovision`.
    poisoned: RwLock<Option<String>>,
}

impl fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEngine")
            .field("model_path", &self.model_path)
            .field("weights", &self.weights)
            .field("family", &self.generator.config().family)
            .finish_non_exhaustive()
    }
}

impl LocalEngine {
    /// Fails with a config error if the generation config is unusable.
    pub fn new(
        model_path: PathBuf,
        weights: WeightSize,
        generation: GenerationConfig,
        runtime: Arc<dyn LocalRuntime>,
    ) -> Result<Self> {
        Ok(Self {
            model_path,
            weights,
            generator: StreamingGenerator::new(generation)?,
            runtime,
            state: Mutex::new(LocalState {
                cache: ChunkCache::new(),
                invocations: 0,
            }),
            poisoned: RwLock::new(None),
        })
    }

    pub fn from_config(config: &LocalConfig) -> Result<Self> {
        Self::new(
            Config::expand_path(&config.model_path),
            WeightSize::new(config.expected_size_bytes, config.size_tolerance_bytes),
            config.generation_config(),
            Arc::new(ProcessRuntime::new(&config.runtime)),
        )
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Model runs performed so far.
    pub async fn invocations(&self) -> u64 {
        self.state.lock().await.invocations
    }

    pub async fn cached_chunks(&self) -> usize {
        self.state.lock().await.cache.len()
    }

    /// Clear a fatal model error after the weights were replaced, and check
    /// them again.
    pub fn reprovision(&self) -> Result<()> {
        self.poisoned
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!("reprovisioning local model at {}", self.model_path.display());
        self.ensure_ready()
    }

    fn check_ready(&self) -> Result<()> {
        if let Some(reason) = self
            .poisoned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Err(RecapError::FatalModel(reason.clone()));
        }
        models::verify_weights(&self.model_path, self.weights).map(|_| ())
    }

    /// Like `check_ready`, but a fatal error poisons the tier.
    fn ensure_ready(&self) -> Result<()> {
        let result = self.check_ready();
        if let Err(RecapError::FatalModel(reason)) = &result {
            let mut poisoned = self.poisoned.write().unwrap_or_else(PoisonError::into_inner);
            if poisoned.is_none() {
                tracing::error!("local tier disabled until reprovisioned: {reason}");
                *poisoned = Some(reason.clone());
            }
        }
        result
    }

    /// Run the model once. The caller holds the state lock.
    async fn run_model(
        &self,
        state: &mut LocalState,
        level: SummaryLevel,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<String> {
        let config = self.generator.config();
        let messages = prompt::build_messages(level, text, &ctx.metadata);
        let request = RuntimeRequest {
            model_path: self.model_path.clone(),
            prompt: config.family.render(&messages.system, &messages.user),
            config: config.clone(),
        };

        let tokens = self.runtime.start(request)?;
        state.invocations += 1;

        let outcome = self
            .generator
            .generate(tokens, config.max_output_tokens as usize, &ctx.cancel)
            .await?;
        tracing::debug!(
            "local {level} generation finished: {:?} after {} increments",
            outcome.finish,
            outcome.increments
        );
        outcome.into_text()
    }

    async fn chunk_summary(
        &self,
        chunk_id: &str,
        session_id: Option<&str>,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        let mut state = self.state.lock().await;
        self.chunk_summary_locked(&mut state, chunk_id, session_id, text, ctx)
            .await
    }

    async fn chunk_summary_locked(
        &self,
        state: &mut LocalState,
        chunk_id: &str,
        session_id: Option<&str>,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        let hash = content_hash(text);
        if let Some(cached) = state.cache.get(chunk_id, &hash) {
            tracing::debug!("chunk {chunk_id} unchanged, using cached summary");
            let fields: Map<String, Value> = serde_json::from_str(cached)
                .map_err(|e| RecapError::Parse(format!("corrupt cached summary: {e}")))?;
            return Ok(StructuredSummary {
                level: SummaryLevel::Chunk,
                fields,
                origin: SummaryOrigin::Model,
                tier: Some(EngineTier::Local),
            });
        }

        let summary = self
            .model_summary(state, SummaryLevel::Chunk, text, ctx)
            .await?;

        if summary.origin == SummaryOrigin::Model {
            state.cache.upsert(ChunkCacheEntry {
                chunk_id: chunk_id.to_string(),
                session_id: session_id.map(ToString::to_string),
                content_hash: hash,
                summary_text: summary.to_json(),
            });
        }

        Ok(summary)
    }

    /// Summary of one chunk as JSON. An unchanged chunk is served from the
    /// cache without running the model.
    pub async fn summarize_chunk(
        &self,
        chunk_id: &str,
        session_id: Option<&str>,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<String> {
        Ok(self
            .chunk_summary(chunk_id, session_id, text, ctx)
            .await?
            .to_json())
    }

    /// Evict cache entries for edited chunks; returns the chunks that need a
    /// model run.
    pub async fn clear_changed_chunks(&self, chunks: &[SourceUnit]) -> HashSet<ChunkId> {
        self.state.lock().await.cache.clear_changed_chunks(chunks)
    }

    async fn model_summary(
        &self,
        state: &mut LocalState,
        level: SummaryLevel,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        self.ensure_ready()?;
        let raw = self.run_model(state, level, text, ctx).await?;
        Ok(ResponseParser::parse(level, &raw, text)?.with_tier(EngineTier::Local))
    }

    /// Session summary built from per-chunk summaries. When every chunk of
    /// the session has a cached summary the result is merged from the cache
    /// without another model run.
    ///
    /// The engine state stays locked for the whole pass, so concurrent
    /// session requests run one after another.
    pub async fn summarize_session(
        &self,
        session_id: &str,
        chunks: &[SourceUnit],
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        let mut state = self.state.lock().await;
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        state.cache.retain_session(session_id, &ids);
        let stale = state.cache.clear_changed_chunks(chunks);
        tracing::debug!(
            "session {session_id}: {} of {} chunks need summarizing",
            stale.len(),
            chunks.len()
        );

        for chunk in chunks.iter().filter(|c| stale.contains(&c.id)) {
            self.chunk_summary_locked(&mut state, &chunk.id, Some(session_id), &chunk.text, ctx)
                .await?;
        }

        if state.cache.count_for_session(session_id) == chunks.len()
            && let Some(texts) = state.cache.texts_for(chunks)
        {
            let parsed: Vec<Map<String, Value>> = texts
                .iter()
                .filter_map(|t| serde_json::from_str(t).ok())
                .collect();
            if parsed.len() == chunks.len() {
                tracing::debug!("session {session_id} merged from cached chunk summaries");
                return Ok(StructuredSummary {
                    level: SummaryLevel::Session,
                    fields: merge_chunk_summaries(&parsed),
                    origin: SummaryOrigin::Model,
                    tier: Some(EngineTier::Local),
                });
            }
        }

        self.model_summary(&mut state, SummaryLevel::Session, &join_units(chunks), ctx)
            .await
    }
}

/// The session id every unit carries, if they all carry the same one.
fn shared_session(units: &[SourceUnit]) -> Option<&str> {
    let session = units.first()?.session_id.as_deref()?;
    units
        .iter()
        .all(|u| u.session_id.as_deref() == Some(session))
        .then_some(session)
}

/// Session-level fields from chunk-level ones: summaries joined in order,
/// lists unioned, title derived from the joined summary.
fn merge_chunk_summaries(chunks: &[Map<String, Value>]) -> Map<String, Value> {
    let joined = chunks
        .iter()
        .filter_map(|c| c.get("summary").and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let list = |chunk: &Map<String, Value>, name: &str| -> Vec<String> {
        chunk
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut fields = Map::new();
    for field in prompt::schema(SummaryLevel::Session).fields {
        let value = if field.name == "summary" {
            Value::String(joined.clone())
        } else if field.fallback == FieldFallback::Title {
            Value::String(extractive::title(&joined))
        } else {
            match field.kind {
                FieldKind::TextList => Value::Array(
                    extractive::merge_unique(chunks.iter().map(|c| list(c, field.name)))
                        .into_iter()
                        .map(Value::String)
                        .collect(),
                ),
                FieldKind::Text => Value::String(String::new()),
                FieldKind::Number => Value::from(0),
            }
        };
        fields.insert(field.name.to_string(), value);
    }
    fields
}

impl SummarizationEngine for LocalEngine {
    fn tier(&self) -> EngineTier {
        EngineTier::Local
    }

    async fn readiness(&self) -> Result<()> {
        self.check_ready()
    }

    async fn summarize(
        &self,
        level: SummaryLevel,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        self.ensure_ready()?;
        let mut state = self.state.lock().await;
        self.model_summary(&mut state, level, text, ctx).await
    }

    async fn summarize_units(
        &self,
        level: SummaryLevel,
        units: &[SourceUnit],
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        match (level, units) {
            (SummaryLevel::Chunk, [unit]) => {
                self.chunk_summary(&unit.id, unit.session_id.as_deref(), &unit.text, ctx)
                    .await
            }
            (SummaryLevel::Session, _) => match shared_session(units) {
                Some(session) => self.summarize_session(session, units, ctx).await,
                None => self.summarize(level, &join_units(units), ctx).await,
            },
            _ => self.summarize(level, &join_units(units), ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{ModelFamily, cancel_pair};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    const CHUNK_REPLY: &str = r#"{"summary": "Talked about the garden.", "keyPoints": ["soil is poor"],
        "topics": ["garden"], "actionItems": ["buy soil"], "sentiment": "calm"}"#;

    struct ScriptedRuntime {
        pieces: Vec<String>,
        calls: Arc<AtomicUsize>,
        prompts: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl LocalRuntime for ScriptedRuntime {
        fn start(&self, request: RuntimeRequest) -> Result<mpsc::Receiver<Result<String>>> {
            assert!(request.prompt.starts_with("<|begin_of_text|>"));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.prompt.clone());
            let (tx, rx) = mpsc::channel(16);
            let pieces = self.pieces.clone();
            tokio::spawn(async move {
                for piece in pieces {
                    if tx.send(Ok(piece)).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        path: PathBuf,
        engine: LocalEngine,
        calls: Arc<AtomicUsize>,
        prompts: Arc<std::sync::Mutex<Vec<String>>>,
    }

    fn fixture(pieces: &[&str], weight_bytes: Option<u64>) -> Fixture {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("model.gguf");
        if let Some(size) = weight_bytes {
            write_weights(&path, size);
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let prompts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let runtime = ScriptedRuntime {
            pieces: pieces.iter().map(ToString::to_string).collect(),
            calls: Arc::clone(&calls),
            prompts: Arc::clone(&prompts),
        };
        let engine = LocalEngine::new(
            path.clone(),
            WeightSize::new(1000, 0),
            GenerationConfig::for_family(ModelFamily::Llama3),
            Arc::new(runtime),
        )
        .unwrap_or_else(|e| panic!("{e}"));
        Fixture {
            _dir: dir,
            path,
            engine,
            calls,
            prompts,
        }
    }

    fn write_weights(path: &Path, size: u64) {
        let file = fs::File::create(path).unwrap_or_else(|e| panic!("{e}"));
        file.set_len(size).unwrap_or_else(|e| panic!("{e}"));
    }

    fn session(n: usize) -> Vec<SourceUnit> {
        (0..n)
            .map(|i| SourceUnit::new(&format!("c{i}"), Some("s1"), &format!("chunk {i} words")))
            .collect()
    }

    #[tokio::test]
    async fn unchanged_chunk_runs_the_model_once() {
        let f = fixture(&[CHUNK_REPLY, "<|eot_id|>", "trailing junk"], Some(1000));
        let ctx = RequestContext::default();

        let first = f
            .engine
            .summarize_chunk("c1", Some("s1"), "we talked about the garden", &ctx)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let second = f
            .engine
            .summarize_chunk("c1", Some("s1"), "we  talked about\nthe garden ", &ctx)
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(first, second);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.engine.invocations().await, 1);
    }

    #[tokio::test]
    async fn edited_chunk_runs_the_model_again() {
        let f = fixture(&[CHUNK_REPLY, "<|eot_id|>"], Some(1000));
        let ctx = RequestContext::default();
        for text in ["first text", "second text"] {
            f.engine
                .summarize_chunk("c1", None, text, &ctx)
                .await
                .unwrap_or_else(|e| panic!("{e}"));
        }
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.engine.cached_chunks().await, 1);
    }

    #[tokio::test]
    async fn extractive_results_are_not_cached() {
        let f = fixture(&["I'd rather not.", "<|eot_id|>"], Some(1000));
        let ctx = RequestContext::default();
        for _ in 0..2 {
            let json = f
                .engine
                .summarize_chunk("c1", None, "The boiler broke again.", &ctx)
                .await
                .unwrap_or_else(|e| panic!("{e}"));
            assert!(json.contains("boiler"));
        }
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.engine.cached_chunks().await, 0);
    }

    #[tokio::test]
    async fn session_is_merged_from_cache_after_one_edit() {
        let f = fixture(&[CHUNK_REPLY, "<|eot_id|>"], Some(1000));
        let ctx = RequestContext::default();
        let mut chunks = session(10);

        let first = f
            .engine
            .summarize_session("s1", &chunks, &ctx)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(f.calls.load(Ordering::SeqCst), 10);
        assert_eq!(first.origin, SummaryOrigin::Model);
        assert_eq!(first.list("topics"), vec!["garden"]);
        assert!(first.summary_text().starts_with("Talked about the garden. Talked"));

        chunks[4].text = "chunk 4 words, corrected".to_string();
        let changed = f.engine.clear_changed_chunks(&chunks).await;
        assert_eq!(changed.len(), 1);

        f.engine
            .summarize_session("s1", &chunks, &ctx)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(f.calls.load(Ordering::SeqCst), 11);

        f.engine
            .summarize_session("s1", &chunks, &ctx)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(f.calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn concurrent_sessions_do_not_interleave() {
        let f = fixture(&[CHUNK_REPLY, "<|eot_id|>"], Some(1000));
        let ctx = RequestContext::default();
        let units = |session: &str, word: &str| -> Vec<SourceUnit> {
            (0..3)
                .map(|i| {
                    SourceUnit::new(&format!("{session}-c{i}"), Some(session), &format!("{word} {i}"))
                })
                .collect()
        };
        let alpha = units("s1", "alpha");
        let beta = units("s2", "beta");

        let (a, b) = tokio::join!(
            f.engine.summarize_session("s1", &alpha, &ctx),
            f.engine.summarize_session("s2", &beta, &ctx),
        );
        a.unwrap_or_else(|e| panic!("{e}"));
        b.unwrap_or_else(|e| panic!("{e}"));

        let order: Vec<char> = f
            .prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| if p.contains("alpha") { 'a' } else { 'b' })
            .collect();
        assert_eq!(order.len(), 6);
        let switches = order.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(switches, 1, "session passes interleaved: {order:?}");
    }

    #[tokio::test]
    async fn missing_weights_poison_until_reprovisioned() {
        let f = fixture(&[CHUNK_REPLY, "<|eot_id|>"], None);
        let ctx = RequestContext::default();

        assert!(matches!(
            f.engine.readiness().await,
            Err(RecapError::FatalModel(_))
        ));
        let result = f.engine.summarize(SummaryLevel::Chunk, "text", &ctx).await;
        assert!(matches!(result, Err(RecapError::FatalModel(_))));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);

        write_weights(&f.path, 1000);
        assert!(!f.engine.is_available().await);

        f.engine.reprovision().unwrap_or_else(|e| panic!("{e}"));
        assert!(f.engine.is_available().await);
    }

    #[tokio::test]
    async fn wrong_size_is_fatal() {
        let f = fixture(&[CHUNK_REPLY], Some(10));
        assert!(matches!(
            f.engine.readiness().await,
            Err(RecapError::FatalModel(_))
        ));
    }

    #[tokio::test]
    async fn cancellation_is_surfaced() {
        let f = fixture(&[CHUNK_REPLY, "<|eot_id|>"], Some(1000));
        let (handle, token) = cancel_pair();
        handle.cancel();
        let result = f
            .engine
            .summarize(SummaryLevel::Chunk, "text", &RequestContext::new(token))
            .await;
        assert!(matches!(result, Err(RecapError::Cancelled)));
    }

    #[test]
    fn foreign_stop_sequences_are_rejected_up_front() {
        let mut generation = GenerationConfig::for_family(ModelFamily::Llama3);
        generation.stop_sequences = vec!["<end_of_turn>".to_string()];
        let result = LocalEngine::new(
            PathBuf::from("/models/m.gguf"),
            WeightSize::new(1, 0),
            generation,
            Arc::new(ScriptedRuntime {
                pieces: Vec::new(),
                calls: Arc::new(AtomicUsize::new(0)),
                prompts: Arc::default(),
            }),
        );
        assert!(matches!(result, Err(RecapError::Config(_))));
    }
}
