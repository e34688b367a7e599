use std::io;

use crate::engine::EngineTier;

#[derive(Debug, thiserror::Error)]
pub enum RecapError {
    #[error("config error: {0}")]
    Config(String),

    #[error("{tier} engine unavailable: {reason}")]
    Unavailable { tier: EngineTier, reason: String },

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("transient remote error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    TransientRemote {
        status: Option<u16>,
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("fatal model error: {0}")]
    FatalModel(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(String),

    #[error("secret store error: {0}")]
    Secret(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl RecapError {
    /// Whether the caller may retry the same request later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientRemote { .. })
    }

    /// Errors an "any available" request may absorb by moving to the next tier.
    #[must_use]
    pub const fn advances_chain(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Generation(_))
    }
}

pub type Result<T> = std::result::Result<T, RecapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_remote_is_retryable() {
        let transient = RecapError::TransientRemote {
            status: Some(429),
            retry_after_secs: Some(3),
            message: "slow down".to_string(),
        };
        assert!(transient.is_retryable());
        assert!(!RecapError::Config("missing key".to_string()).is_retryable());
        assert!(!RecapError::FatalModel("bad weights".to_string()).is_retryable());
    }

    #[test]
    fn transient_display_includes_status() {
        let err = RecapError::TransientRemote {
            status: Some(503),
            retry_after_secs: None,
            message: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "transient remote error (503): overloaded");

        let err = RecapError::TransientRemote {
            status: None,
            retry_after_secs: None,
            message: "timed out".to_string(),
        };
        assert_eq!(err.to_string(), "transient remote error: timed out");
    }

    #[test]
    fn chain_advancing_errors() {
        let unavailable = RecapError::Unavailable {
            tier: EngineTier::Local,
            reason: "no weights".to_string(),
        };
        assert!(unavailable.advances_chain());
        assert!(RecapError::Generation("empty".to_string()).advances_chain());
        assert!(!RecapError::Cancelled.advances_chain());
        assert!(!RecapError::FatalModel("corrupt".to_string()).advances_chain());
    }
}
