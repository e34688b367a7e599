pub mod assistant;
pub mod basic;
pub mod local;
pub mod remote;
pub mod runtime;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RecapError, Result};
use crate::generate::CancelToken;
use crate::level::SummaryLevel;
use crate::parse::StructuredSummary;
use crate::store::SourceUnit;

pub use assistant::{AssistantBackend, AssistantEngine};
pub use basic::BasicEngine;
pub use local::LocalEngine;
pub use remote::RemoteEngine;

/// The four summarization backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineTier {
    #[serde(rename = "basic")]
    Basic,
    #[serde(rename = "assistant")]
    OnDeviceAssistant,
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "remote")]
    Remote,
}

impl EngineTier {
    /// Order walked when no tier is preferred, best first.
    pub const FALLBACK_ORDER: [Self; 4] = [
        Self::Remote,
        Self::OnDeviceAssistant,
        Self::Local,
        Self::Basic,
    ];

    /// Whether transcript text stays on this machine.
    #[must_use]
    pub const fn is_privacy_preserving(self) -> bool {
        !matches!(self, Self::Remote)
    }

    #[must_use]
    pub const fn requires_network(self) -> bool {
        matches!(self, Self::Remote)
    }

    /// Lower is tried first.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Remote => 0,
            Self::OnDeviceAssistant => 1,
            Self::Local => 2,
            Self::Basic => 3,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::OnDeviceAssistant => "assistant",
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for EngineTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineTier {
    type Err = RecapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "assistant" | "on-device" | "ondeviceassistant" => Ok(Self::OnDeviceAssistant),
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(RecapError::Config(format!(
                "unknown engine tier: {other} (available: basic, assistant, local, remote)"
            ))),
        }
    }
}

/// Per-request inputs that are not the text itself.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// `key: value` lines added to the prompt (session title, date, ...).
    pub metadata: Vec<(String, String)>,
    pub cancel: CancelToken,
}

impl RequestContext {
    #[must_use]
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            metadata: Vec::new(),
            cancel,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }
}

/// Capability shared by every tier.
pub trait SummarizationEngine: Send + Sync {
    fn tier(&self) -> EngineTier;

    /// `Ok` when the tier can serve a request now, otherwise the reason it
    /// cannot. Never has side effects.
    fn readiness(&self) -> impl Future<Output = Result<()>> + Send;

    fn is_available(&self) -> impl Future<Output = bool> + Send {
        async { self.readiness().await.is_ok() }
    }

    fn summarize(
        &self,
        level: SummaryLevel,
        text: &str,
        ctx: &RequestContext,
    ) -> impl Future<Output = Result<StructuredSummary>> + Send;

    /// Summarize several source units as one input.
    fn summarize_units(
        &self,
        level: SummaryLevel,
        units: &[SourceUnit],
        ctx: &RequestContext,
    ) -> impl Future<Output = Result<StructuredSummary>> + Send {
        async move {
            let text = join_units(units);
            self.summarize(level, &text, ctx).await
        }
    }
}

/// Unit texts separated by blank lines, empty units skipped.
#[must_use]
pub fn join_units(units: &[SourceUnit]) -> String {
    units
        .iter()
        .map(|u| u.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The closed set of tiers.
#[derive(Debug)]
pub enum Engine {
    Basic(BasicEngine),
    Assistant(AssistantEngine),
    Local(LocalEngine),
    Remote(RemoteEngine),
}

impl SummarizationEngine for Engine {
    fn tier(&self) -> EngineTier {
        match self {
            Self::Basic(e) => e.tier(),
            Self::Assistant(e) => e.tier(),
            Self::Local(e) => e.tier(),
            Self::Remote(e) => e.tier(),
        }
    }

    async fn readiness(&self) -> Result<()> {
        match self {
            Self::Basic(e) => e.readiness().await,
            Self::Assistant(e) => e.readiness().await,
            Self::Local(e) => e.readiness().await,
            Self::Remote(e) => e.readiness().await,
        }
    }

    async fn summarize(
        &self,
        level: SummaryLevel,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        match self {
            Self::Basic(e) => e.summarize(level, text, ctx).await,
            Self::Assistant(e) => e.summarize(level, text, ctx).await,
            Self::Local(e) => e.summarize(level, text, ctx).await,
            Self::Remote(e) => e.summarize(level, text, ctx).await,
        }
    }

    async fn summarize_units(
        &self,
        level: SummaryLevel,
        units: &[SourceUnit],
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        match self {
            Self::Basic(e) => e.summarize_units(level, units, ctx).await,
            Self::Assistant(e) => e.summarize_units(level, units, ctx).await,
            Self::Local(e) => e.summarize_units(level, units, ctx).await,
            Self::Remote(e) => e.summarize_units(level, units, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_remote_leaves_the_device() {
        for tier in EngineTier::FALLBACK_ORDER {
            assert_eq!(tier.requires_network(), tier == EngineTier::Remote);
            assert_eq!(tier.is_privacy_preserving(), tier != EngineTier::Remote);
        }
    }

    #[test]
    fn fallback_order_follows_priority() {
        let priorities: Vec<u8> = EngineTier::FALLBACK_ORDER
            .iter()
            .map(|t| t.priority())
            .collect();
        assert_eq!(priorities, vec![0, 1, 2, 3]);
    }

    #[test]
    fn names_round_trip() {
        for tier in EngineTier::FALLBACK_ORDER {
            let parsed: EngineTier = tier.to_string().parse().unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(parsed, tier);
            let json = serde_json::to_string(&tier).unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(json, format!("\"{tier}\""));
        }
        assert!("cloud".parse::<EngineTier>().is_err());
    }

    #[test]
    fn join_units_skips_blank_text() {
        let units = vec![
            SourceUnit::new("a", None, " first "),
            SourceUnit::new("b", None, "   "),
            SourceUnit::new("c", None, "third"),
        ];
        assert_eq!(join_units(&units), "first\n\nthird");
    }
}
