use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::Config;
use crate::engine::{
    AssistantBackend, AssistantEngine, BasicEngine, Engine, EngineTier, LocalEngine, RemoteEngine,
    RequestContext, SummarizationEngine,
};
use crate::error::{RecapError, Result};
use crate::level::SummaryLevel;
use crate::parse::StructuredSummary;
use crate::secrets::SecretStore;
use crate::store::SourceUnit;

/// Which tier a request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierRequest {
    /// Walk the fallback chain.
    AnyAvailable,
    /// Only this tier; its failures are returned as-is.
    Explicit(EngineTier),
}

/// Picks a tier per request and degrades along the fallback chain.
#[derive(Debug)]
pub struct Coordinator {
    engines: HashMap<EngineTier, Arc<Engine>>,
    preferred: RwLock<Option<EngineTier>>,
}

impl Coordinator {
    /// A basic engine is added when `engines` has none.
    #[must_use]
    pub fn new(engines: Vec<Engine>, preferred: Option<EngineTier>) -> Self {
        let mut map: HashMap<EngineTier, Arc<Engine>> = engines
            .into_iter()
            .map(|e| (e.tier(), Arc::new(e)))
            .collect();
        map.entry(EngineTier::Basic)
            .or_insert_with(|| Arc::new(Engine::Basic(BasicEngine::new())));

        Self {
            engines: map,
            preferred: RwLock::new(preferred),
        }
    }

    /// All four tiers from config. `assistant` overrides the configured
    /// helper program.
    pub fn from_config(
        config: &Config,
        secrets: Arc<dyn SecretStore>,
        assistant: Option<Arc<dyn AssistantBackend>>,
    ) -> Result<Self> {
        let assistant = match assistant {
            Some(backend) => AssistantEngine::new(Some(backend), config.assistant.min_capability),
            None => AssistantEngine::from_config(&config.assistant),
        };

        let engines = vec![
            Engine::Remote(RemoteEngine::new(config.remote.clone(), secrets)?),
            Engine::Assistant(assistant),
            Engine::Local(LocalEngine::from_config(&config.local)?),
            Engine::Basic(BasicEngine::new()),
        ];

        Ok(Self::new(engines, config.engine.preferred))
    }

    #[must_use]
    pub fn preference(&self) -> Option<EngineTier> {
        *self.preferred.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_preference(&self, preferred: Option<EngineTier>) {
        *self.preferred.write().unwrap_or_else(PoisonError::into_inner) = preferred;
        tracing::info!(
            "engine preference set to {}",
            preferred.map_or("none", EngineTier::as_str)
        );
    }

    /// Tiers tried for an any-available request, in order. Remote appears
    /// only when it is preferred or nothing is.
    #[must_use]
    pub fn chain(&self) -> Vec<EngineTier> {
        match self.preference() {
            None => EngineTier::FALLBACK_ORDER.to_vec(),
            Some(preferred) => std::iter::once(preferred)
                .chain(
                    EngineTier::FALLBACK_ORDER
                        .into_iter()
                        .filter(|t| *t != EngineTier::Remote && *t != preferred),
                )
                .collect(),
        }
    }

    #[must_use]
    pub fn engine(&self, tier: EngineTier) -> Option<&Arc<Engine>> {
        self.engines.get(&tier)
    }

    /// The tier an any-available request would start with right now.
    pub async fn active_engine(&self) -> EngineTier {
        for tier in self.chain() {
            if let Some(engine) = self.engines.get(&tier)
                && engine.is_available().await
            {
                return tier;
            }
        }
        EngineTier::Basic
    }

    /// Readiness of every configured tier, in fallback order.
    pub async fn status(&self) -> Vec<(EngineTier, Result<()>)> {
        let mut out = Vec::new();
        for tier in EngineTier::FALLBACK_ORDER {
            if let Some(engine) = self.engines.get(&tier) {
                out.push((tier, engine.readiness().await));
            }
        }
        out
    }

    pub async fn summarize(
        &self,
        level: SummaryLevel,
        units: &[SourceUnit],
        ctx: &RequestContext,
        target: TierRequest,
    ) -> Result<StructuredSummary> {
        match target {
            TierRequest::Explicit(tier) => {
                let engine = self.engines.get(&tier).ok_or_else(|| RecapError::Unavailable {
                    tier,
                    reason: "not configured".to_string(),
                })?;
                engine.readiness().await?;
                engine.summarize_units(level, units, ctx).await
            }
            TierRequest::AnyAvailable => self.summarize_any(level, units, ctx).await,
        }
    }

    async fn summarize_any(
        &self,
        level: SummaryLevel,
        units: &[SourceUnit],
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        let mut last_reason = String::from("no engines configured");

        for tier in self.chain() {
            let Some(engine) = self.engines.get(&tier) else {
                continue;
            };

            if let Err(e) = engine.readiness().await {
                tracing::debug!("skipping {tier}: {e}");
                last_reason = e.to_string();
                continue;
            }

            match engine.summarize_units(level, units, ctx).await {
                Ok(summary) => {
                    tracing::info!("{level} summary produced by the {tier} engine");
                    return Ok(summary);
                }
                Err(e) if e.advances_chain() => {
                    tracing::warn!("{tier} engine failed, trying the next tier: {e}");
                    last_reason = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(RecapError::Unavailable {
            tier: EngineTier::Basic,
            reason: format!("every tier failed; last: {last_reason}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::engine::runtime::ProcessRuntime;
    use crate::generate::{GenerationConfig, ModelFamily};
    use crate::models::WeightSize;
    use crate::secrets::MemorySecretStore;
    use std::path::PathBuf;

    struct FailingAssistant(fn() -> RecapError);

    impl AssistantBackend for FailingAssistant {
        fn capability_level(&self) -> u32 {
            5
        }

        fn respond(&self, _system: &str, _user: &str) -> Result<String> {
            Err((self.0)())
        }
    }

    fn unavailable_local() -> Engine {
        let runtime = ProcessRuntime::new(&RuntimeConfig {
            command: "/nonexistent/llama-cli".to_string(),
            args: Vec::new(),
        });
        Engine::Local(
            LocalEngine::new(
                PathBuf::from("/nonexistent/model.gguf"),
                WeightSize::new(1000, 0),
                GenerationConfig::for_family(ModelFamily::Llama3),
                Arc::new(runtime),
            )
            .unwrap_or_else(|e| panic!("{e}")),
        )
    }

    fn keyless_remote() -> Engine {
        Engine::Remote(
            RemoteEngine::new(
                crate::config::RemoteConfig::default(),
                Arc::new(MemorySecretStore::new()),
            )
            .unwrap_or_else(|e| panic!("{e}")),
        )
    }

    fn assistant(error: Option<fn() -> RecapError>) -> Engine {
        let backend = error.map(|f| Arc::new(FailingAssistant(f)) as Arc<dyn AssistantBackend>);
        Engine::Assistant(AssistantEngine::new(backend, 1))
    }

    fn units() -> Vec<SourceUnit> {
        vec![SourceUnit::new(
            "c1",
            Some("s1"),
            "We repaired the bicycle. The chain was rusty and the brakes squeaked.",
        )]
    }

    #[test]
    fn chain_without_preference_starts_with_remote() {
        let coordinator = Coordinator::new(Vec::new(), None);
        assert_eq!(coordinator.chain(), EngineTier::FALLBACK_ORDER.to_vec());
    }

    #[test]
    fn preference_removes_remote_from_the_chain() {
        let coordinator = Coordinator::new(Vec::new(), Some(EngineTier::Local));
        assert_eq!(
            coordinator.chain(),
            vec![
                EngineTier::Local,
                EngineTier::OnDeviceAssistant,
                EngineTier::Basic
            ]
        );

        coordinator.set_preference(Some(EngineTier::Remote));
        assert_eq!(
            coordinator.chain(),
            vec![
                EngineTier::Remote,
                EngineTier::OnDeviceAssistant,
                EngineTier::Local,
                EngineTier::Basic
            ]
        );

        coordinator.set_preference(Some(EngineTier::Basic));
        assert!(!coordinator.chain().contains(&EngineTier::Remote));
        assert_eq!(coordinator.preference(), Some(EngineTier::Basic));
    }

    #[tokio::test]
    async fn falls_back_to_basic_when_remote_and_local_are_down() {
        let coordinator = Coordinator::new(
            vec![keyless_remote(), unavailable_local(), assistant(None)],
            None,
        );
        assert_eq!(coordinator.active_engine().await, EngineTier::Basic);

        let summary = coordinator
            .summarize(
                SummaryLevel::Chunk,
                &units(),
                &RequestContext::default(),
                TierRequest::AnyAvailable,
            )
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(summary.tier, Some(EngineTier::Basic));
        assert!(!summary.summary_text().is_empty());
    }

    #[tokio::test]
    async fn explicit_request_surfaces_unavailability() {
        let coordinator = Coordinator::new(vec![unavailable_local()], None);
        let result = coordinator
            .summarize(
                SummaryLevel::Chunk,
                &units(),
                &RequestContext::default(),
                TierRequest::Explicit(EngineTier::Local),
            )
            .await;
        assert!(matches!(result, Err(RecapError::FatalModel(_))));

        let result = coordinator
            .summarize(
                SummaryLevel::Chunk,
                &units(),
                &RequestContext::default(),
                TierRequest::Explicit(EngineTier::OnDeviceAssistant),
            )
            .await;
        assert!(matches!(result, Err(RecapError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn generation_failures_advance_the_chain() {
        let coordinator = Coordinator::new(
            vec![assistant(Some(|| RecapError::Generation("model crashed".to_string())))],
            Some(EngineTier::OnDeviceAssistant),
        );
        assert_eq!(
            coordinator.active_engine().await,
            EngineTier::OnDeviceAssistant
        );

        let summary = coordinator
            .summarize(
                SummaryLevel::Chunk,
                &units(),
                &RequestContext::default(),
                TierRequest::AnyAvailable,
            )
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(summary.tier, Some(EngineTier::Basic));
    }

    #[tokio::test]
    async fn config_errors_cross_the_boundary() {
        let coordinator = Coordinator::new(
            vec![assistant(Some(|| RecapError::Config("bad setup".to_string())))],
            Some(EngineTier::OnDeviceAssistant),
        );
        let result = coordinator
            .summarize(
                SummaryLevel::Chunk,
                &units(),
                &RequestContext::default(),
                TierRequest::AnyAvailable,
            )
            .await;
        assert!(matches!(result, Err(RecapError::Config(_))));
    }

    #[tokio::test]
    async fn status_lists_every_tier() {
        let coordinator = Coordinator::new(
            vec![keyless_remote(), unavailable_local(), assistant(None)],
            None,
        );
        let status = coordinator.status().await;
        let tiers: Vec<EngineTier> = status.iter().map(|(t, _)| *t).collect();
        assert_eq!(tiers, EngineTier::FALLBACK_ORDER.to_vec());
        assert!(status.iter().all(|(t, r)| r.is_ok() == (*t == EngineTier::Basic)));
    }
}
