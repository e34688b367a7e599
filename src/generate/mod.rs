pub mod cancel;
pub mod family;
pub mod stop;
pub mod stream;

use std::fmt;

pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use family::ModelFamily;
pub use stream::{FinishReason, GenerationOutcome, StreamingGenerator};

use crate::error::{RecapError, Result};

/// Sampling and termination settings for one model family.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// Family whose chat template builds the prompt.
    pub family: ModelFamily,
    pub context_window: u32,
    pub batch_size: u32,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
    /// Hard ceiling on accumulated output characters.
    pub max_output_chars: usize,
}

/// A reason a config cannot be used for generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    NoStopSequences,
    EmptyStopSequence,
    /// A stop marker belonging to another family. Generation would either cut
    /// off almost immediately or never terminate.
    ForeignStopSequence {
        stop: String,
        owner: ModelFamily,
        template: ModelFamily,
    },
    /// None of the template family's own end-of-turn markers is configured.
    MissingTerminator { template: ModelFamily },
    ZeroLimit(&'static str),
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStopSequences => write!(f, "no stop sequences configured"),
            Self::EmptyStopSequence => write!(f, "empty stop sequence"),
            Self::ForeignStopSequence {
                stop,
                owner,
                template,
            } => write!(
                f,
                "stop sequence {stop:?} belongs to the {owner} family but the prompt uses the {template} template"
            ),
            Self::MissingTerminator { template } => write!(
                f,
                "none of the {template} end-of-turn markers {:?} is a stop sequence",
                template.stop_sequences()
            ),
            Self::ZeroLimit(name) => write!(f, "{name} must be greater than zero"),
        }
    }
}

impl GenerationConfig {
    /// Defaults for a family, with that family's own stop sequences.
    #[must_use]
    pub fn for_family(family: ModelFamily) -> Self {
        let context_window = match family {
            ModelFamily::Llama3 | ModelFamily::Gemma => 8192,
            ModelFamily::ChatMl | ModelFamily::Mistral => 32768,
            ModelFamily::Phi3 => 4096,
        };

        Self {
            family,
            context_window,
            batch_size: 512,
            max_output_tokens: 1024,
            temperature: 0.3,
            stop_sequences: family
                .stop_sequences()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            max_output_chars: 8000,
        }
    }

    /// Every problem with this config, empty when it is usable.
    #[must_use]
    pub fn issues(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.stop_sequences.is_empty() {
            issues.push(ConfigIssue::NoStopSequences);
        }
        if self.stop_sequences.iter().any(String::is_empty) {
            issues.push(ConfigIssue::EmptyStopSequence);
        }

        for stop in &self.stop_sequences {
            if let Some(owner) = self.family.foreign_owner(stop) {
                issues.push(ConfigIssue::ForeignStopSequence {
                    stop: stop.clone(),
                    owner,
                    template: self.family,
                });
            }
        }

        let own = self.family.stop_sequences();
        if !self.stop_sequences.is_empty()
            && !self.stop_sequences.iter().any(|s| own.contains(&s.as_str()))
        {
            issues.push(ConfigIssue::MissingTerminator {
                template: self.family,
            });
        }

        if self.max_output_tokens == 0 {
            issues.push(ConfigIssue::ZeroLimit("max_output_tokens"));
        }
        if self.max_output_chars == 0 {
            issues.push(ConfigIssue::ZeroLimit("max_output_chars"));
        }
        if self.context_window == 0 {
            issues.push(ConfigIssue::ZeroLimit("context_window"));
        }

        issues
    }

    /// Reject the config before any generation starts.
    pub fn validate(&self) -> Result<()> {
        let issues = self.issues();
        if issues.is_empty() {
            return Ok(());
        }

        let joined: Vec<String> = issues.iter().map(ToString::to_string).collect();
        Err(RecapError::Config(format!(
            "invalid generation config: {}",
            joined.join("; ")
        )))
    }
}
