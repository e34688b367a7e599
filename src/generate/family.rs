use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RecapError;

/// Instruction-tuned model families the local tier knows how to prompt.
///
/// A family owns both its chat template and its end-of-turn markers; the two
/// must always travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Llama3,
    ChatMl,
    Gemma,
    Phi3,
    Mistral,
}

impl ModelFamily {
    pub const ALL: [Self; 5] = [
        Self::Llama3,
        Self::ChatMl,
        Self::Gemma,
        Self::Phi3,
        Self::Mistral,
    ];

    /// Markers that end an assistant turn for this family.
    #[must_use]
    pub const fn stop_sequences(self) -> &'static [&'static str] {
        match self {
            Self::Llama3 => &["<|eot_id|>", "<|end_of_text|>"],
            Self::ChatMl => &["<|im_end|>", "<|endoftext|>"],
            Self::Gemma => &["<end_of_turn>", "<eos>"],
            Self::Phi3 => &["<|end|>", "<|endoftext|>"],
            Self::Mistral => &["</s>"],
        }
    }

    /// The family (other than `self`) that claims `marker`, if any.
    #[must_use]
    pub fn foreign_owner(self, marker: &str) -> Option<Self> {
        if self.stop_sequences().contains(&marker) {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|f| *f != self && f.stop_sequences().contains(&marker))
    }

    /// Render a system/user pair with this family's chat template.
    #[must_use]
    pub fn render(self, system: &str, user: &str) -> String {
        match self {
            Self::Llama3 => format!(
                "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{system}<|eot_id|>\
                 <|start_header_id|>user<|end_header_id|>\n\n{user}<|eot_id|>\
                 <|start_header_id|>assistant<|end_header_id|>\n\n"
            ),
            Self::ChatMl => format!(
                "<|im_start|>system\n{system}<|im_end|>\n<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"
            ),
            // Gemma has no system role; the system text leads the user turn.
            Self::Gemma => format!(
                "<start_of_turn>user\n{system}\n\n{user}<end_of_turn>\n<start_of_turn>model\n"
            ),
            Self::Phi3 => format!(
                "<|system|>\n{system}<|end|>\n<|user|>\n{user}<|end|>\n<|assistant|>\n"
            ),
            Self::Mistral => format!("<s>[INST] {system}\n\n{user} [/INST]"),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Llama3 => "llama3",
            Self::ChatMl => "chatml",
            Self::Gemma => "gemma",
            Self::Phi3 => "phi3",
            Self::Mistral => "mistral",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = RecapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "llama3" | "llama-3" => Ok(Self::Llama3),
            "chatml" | "qwen" => Ok(Self::ChatMl),
            "gemma" => Ok(Self::Gemma),
            "phi3" | "phi-3" => Ok(Self::Phi3),
            "mistral" => Ok(Self::Mistral),
            other => Err(RecapError::Config(format!(
                "unknown model family: {other} (available: llama3, chatml, gemma, phi3, mistral)"
            ))),
        }
    }
}
