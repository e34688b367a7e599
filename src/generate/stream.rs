use tokio::sync::mpsc;

use crate::error::{RecapError, Result};

use super::GenerationConfig;
use super::cancel::CancelToken;
use super::stop::StopMatcher;

/// Why a generation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A stop sequence was emitted; it and everything after it were dropped.
    Stop,
    /// The token source closed on its own.
    EndOfStream,
    /// `max_tokens` increments were consumed.
    TokenLimit,
    /// The character ceiling was reached before any stop sequence.
    CharCeiling,
    Cancelled,
}

impl FinishReason {
    /// Output was cut off by a length bound rather than ending on its own.
    #[must_use]
    pub const fn is_limit(self) -> bool {
        matches!(self, Self::TokenLimit | Self::CharCeiling)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub text: String,
    pub finish: FinishReason,
    pub increments: usize,
}

/// Drives a token stream to completion under a validated config.
///
/// The stream is a channel of text increments; dropping the receiver when
/// `generate` returns tells the producer to stop.
#[derive(Debug)]
pub struct StreamingGenerator {
    config: GenerationConfig,
}

impl StreamingGenerator {
    /// Fails if the config pairs a template with foreign stop sequences.
    pub fn new(config: GenerationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub async fn generate(
        &self,
        mut tokens: mpsc::Receiver<Result<String>>,
        max_tokens: usize,
        cancel: &CancelToken,
    ) -> Result<GenerationOutcome> {
        let mut cancel = cancel.clone();
        let mut matcher = StopMatcher::new(&self.config.stop_sequences);
        let ceiling = self.config.max_output_chars;
        let mut chars = 0usize;
        let mut increments = 0usize;

        let finish = loop {
            if cancel.is_cancelled() {
                break FinishReason::Cancelled;
            }
            if increments >= max_tokens {
                break FinishReason::TokenLimit;
            }

            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break FinishReason::Cancelled,
                next = tokens.recv() => next,
            };

            let piece = match next {
                Some(Ok(piece)) => piece,
                Some(Err(e)) => {
                    if matcher.text().is_empty() {
                        return Err(e);
                    }
                    tracing::warn!("token source failed after partial output: {e}");
                    break FinishReason::EndOfStream;
                }
                None => break FinishReason::EndOfStream,
            };

            increments += 1;
            if matcher.push(&piece) {
                if increments == 1 {
                    tracing::warn!(
                        "stop sequence {:?} matched in the first increment; output is likely truncated",
                        matcher.matched().unwrap_or_default()
                    );
                }
                break FinishReason::Stop;
            }

            chars += piece.chars().count();
            if chars >= ceiling {
                break FinishReason::CharCeiling;
            }
        };

        drop(tokens);

        if finish.is_limit() {
            let limit = if finish == FinishReason::CharCeiling {
                format!("{ceiling} character ceiling")
            } else {
                format!("{max_tokens} token limit")
            };
            tracing::warn!(
                "generation reached the {limit} without a stop sequence ({})",
                self.config.family
            );
        }

        let mut text = matcher.into_text();
        if finish == FinishReason::CharCeiling
            && let Some((cut, _)) = text.char_indices().nth(ceiling)
        {
            text.truncate(cut);
        }

        tracing::debug!("generation finished: {finish:?} after {increments} increments");
        Ok(GenerationOutcome {
            text,
            finish,
            increments,
        })
    }
}

impl GenerationOutcome {
    /// Convert a cancelled run into the error callers surface.
    pub fn into_text(self) -> Result<String> {
        if self.finish == FinishReason::Cancelled {
            return Err(RecapError::Cancelled);
        }
        Ok(self.text)
    }
}
