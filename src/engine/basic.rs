use crate::error::{RecapError, Result};
use crate::level::SummaryLevel;
use crate::parse::{ResponseParser, StructuredSummary};

use super::{EngineTier, RequestContext, SummarizationEngine};

/// Extractive summaries only: sentence scoring and keyword frequency, no
/// model and no network.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicEngine;

impl BasicEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// The basic tier can always serve.
    #[must_use]
    pub const fn is_available() -> bool {
        true
    }
}

impl SummarizationEngine for BasicEngine {
    fn tier(&self) -> EngineTier {
        EngineTier::Basic
    }

    async fn readiness(&self) -> Result<()> {
        Ok(())
    }

    async fn summarize(
        &self,
        level: SummaryLevel,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        if ctx.cancel.is_cancelled() {
            return Err(RecapError::Cancelled);
        }
        let summary = ResponseParser::fallback(level, text)?;
        Ok(summary.with_tier(EngineTier::Basic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::cancel_pair;
    use crate::parse::SummaryOrigin;

    #[tokio::test]
    async fn always_ready_and_extractive() {
        let engine = BasicEngine::new();
        assert!(BasicEngine::is_available());
        assert!(engine.is_available().await);

        let summary = engine
            .summarize(
                SummaryLevel::Session,
                "We fixed the fence. The fence was old and the paint was peeling.",
                &RequestContext::default(),
            )
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(summary.origin, SummaryOrigin::Extractive);
        assert_eq!(summary.tier, Some(EngineTier::Basic));
        assert!(summary.list("topics").contains(&"fence".to_string()));
    }

    #[tokio::test]
    async fn empty_input_is_a_generation_failure() {
        let result = BasicEngine::new()
            .summarize(SummaryLevel::Chunk, " ", &RequestContext::default())
            .await;
        assert!(matches!(result, Err(RecapError::Generation(_))));
    }

    #[test]
    fn honours_cancellation() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        let ctx = RequestContext::new(token);
        let result = tokio_test::block_on(BasicEngine::new().summarize(
            SummaryLevel::Chunk,
            "text",
            &ctx,
        ));
        assert!(matches!(result, Err(RecapError::Cancelled)));
    }
}
