use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::EngineTier;
use crate::engine::remote::ProviderKind;
use crate::error::{RecapError, Result};
use crate::generate::{GenerationConfig, ModelFamily};

fn default_model_path() -> String {
    let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".local/share"));
    data_dir
        .join("recap/models/llama-3.2-3b-instruct-q4_k_m.gguf")
        .to_string_lossy()
        .to_string()
}

const fn default_family() -> ModelFamily {
    ModelFamily::Llama3
}

const fn default_expected_size_bytes() -> u64 {
    2_019_377_696
}

const fn default_size_tolerance_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_runtime_command() -> String {
    "llama-cli".to_string()
}

fn default_runtime_args() -> Vec<String> {
    [
        "-m",
        "{model}",
        "-p",
        "{prompt}",
        "-n",
        "{n_predict}",
        "-c",
        "{ctx}",
        "-b",
        "{batch}",
        "--temp",
        "{temp}",
        "-no-cnv",
        "--no-display-prompt",
        "--simple-io",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

const fn default_provider() -> ProviderKind {
    ProviderKind::OpenAi
}

fn default_remote_model() -> String {
    "gpt-4o-mini".to_string()
}

const fn default_timeout_secs() -> u64 {
    60
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

const fn default_temperature() -> f32 {
    0.3
}

const fn default_max_tokens() -> u32 {
    1024
}

const fn default_min_capability() -> u32 {
    1
}

fn default_store_directory() -> String {
    let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".local/share"));
    data_dir.join("recap").to_string_lossy().to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub assistant: AssistantConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Tier selection. Without a preferred tier every tier is eligible, remote
/// first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    pub preferred: Option<EngineTier>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,

    /// Where `fetch-model` downloads the weights from.
    pub model_url: Option<String>,

    #[serde(default = "default_family")]
    pub family: ModelFamily,

    #[serde(default = "default_expected_size_bytes")]
    pub expected_size_bytes: u64,

    #[serde(default = "default_size_tolerance_bytes")]
    pub size_tolerance_bytes: u64,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub generation: GenerationOverrides,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            model_url: None,
            family: default_family(),
            expected_size_bytes: default_expected_size_bytes(),
            size_tolerance_bytes: default_size_tolerance_bytes(),
            runtime: RuntimeConfig::default(),
            generation: GenerationOverrides::default(),
        }
    }
}

impl LocalConfig {
    /// The family defaults with any configured overrides applied.
    #[must_use]
    pub fn generation_config(&self) -> GenerationConfig {
        let mut config = GenerationConfig::for_family(self.family);
        let o = &self.generation;
        if let Some(v) = o.context_window {
            config.context_window = v;
        }
        if let Some(v) = o.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = o.max_output_tokens {
            config.max_output_tokens = v;
        }
        if let Some(v) = o.temperature {
            config.temperature = v;
        }
        if let Some(v) = &o.stop_sequences {
            config.stop_sequences.clone_from(v);
        }
        if let Some(v) = o.max_output_chars {
            config.max_output_chars = v;
        }
        config
    }
}

/// The external generator process. Arguments may contain `{model}`,
/// `{prompt}`, `{n_predict}`, `{ctx}`, `{batch}` and `{temp}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_command")]
    pub command: String,

    #[serde(default = "default_runtime_args")]
    pub args: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command: default_runtime_command(),
            args: default_runtime_args(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationOverrides {
    pub context_window: Option<u32>,
    pub batch_size: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    pub max_output_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    #[serde(default = "default_remote_model")]
    pub model: String,

    /// Overrides the provider's public endpoint.
    pub base_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_remote_model(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_min_capability")]
    pub min_capability: u32,

    /// Helper program exposing the platform assistant. Unset means no
    /// assistant is installed.
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Capability level the helper reports.
    #[serde(default = "default_min_capability")]
    pub capability: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            min_capability: default_min_capability(),
            command: None,
            args: Vec::new(),
            capability: default_min_capability(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_directory")]
    pub directory: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_store_directory(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RecapError::Config(format!(
                "config file not found: {} (create it or use --config to specify a path)",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            RecapError::Config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml_ng::from_str(&contents).map_err(|e| {
            RecapError::Config(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        Ok(config)
    }

    /// Like `load`, but a missing file at the default location yields the
    /// defaults instead of an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    tracing::debug!("no config at {}, using defaults", path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    /// Write `engine.preferred` into the config file at `path`, keeping every
    /// other setting. `None` removes the preference.
    pub fn set_preferred_engine(path: &Path, preferred: Option<EngineTier>) -> Result<()> {
        use serde_yaml_ng::{Mapping, Value};

        let mut root = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                RecapError::Config(format!("failed to read config file {}: {e}", path.display()))
            })?;
            match serde_yaml_ng::from_str::<Value>(&contents) {
                Ok(Value::Mapping(m)) => m,
                Ok(Value::Null) => Mapping::new(),
                Ok(_) => {
                    return Err(RecapError::Config(format!(
                        "config file {} is not a mapping",
                        path.display()
                    )));
                }
                Err(e) => {
                    return Err(RecapError::Config(format!(
                        "failed to parse config file {}: {e}",
                        path.display()
                    )));
                }
            }
        } else {
            Mapping::new()
        };

        let engine = root
            .entry(Value::String("engine".to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()))
            .as_mapping_mut()
            .ok_or_else(|| RecapError::Config("engine section is not a mapping".to_string()))?;
        let key = Value::String("preferred".to_string());
        match preferred {
            Some(tier) => {
                engine.insert(key, Value::String(tier.as_str().to_string()));
            }
            None => {
                engine.remove(&key);
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RecapError::Config(format!(
                    "failed to create config directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let yaml = serde_yaml_ng::to_string(&Value::Mapping(root))
            .map_err(|e| RecapError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, yaml).map_err(|e| {
            RecapError::Config(format!("failed to write config file {}: {e}", path.display()))
        })
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join("recap/config.yaml")
    }

    /// Expand `~` in a path string to the user's home directory.
    #[must_use]
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: Config =
            serde_yaml_ng::from_str("{}").unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(config.engine.preferred, None);
        assert_eq!(config.local.family, ModelFamily::Llama3);
        assert_eq!(config.remote.provider, ProviderKind::OpenAi);
        assert_eq!(config.remote.timeout_secs, 60);
        assert_eq!(config.assistant.min_capability, 1);
        assert!(config.local.runtime.args.iter().any(|a| a == "{prompt}"));
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
engine:
  preferred: local

local:
  model_path: /models/qwen.gguf
  model_url: https://example.invalid/qwen.gguf
  family: chatml
  expected_size_bytes: 1000
  size_tolerance_bytes: 10
  runtime:
    command: /opt/llama/llama-cli
    args: ["-m", "{model}", "-p", "{prompt}"]
  generation:
    max_output_tokens: 256
    temperature: 0.1

remote:
  provider: anthropic
  model: claude-3-5-haiku-latest
  base_url: "http://127.0.0.1:8080"
  timeout_secs: 10

assistant:
  min_capability: 3
  command: /usr/libexec/assistant-helper
  capability: 2

store:
  directory: /tmp/recap-test
"#;
        let config: Config =
            serde_yaml_ng::from_str(yaml).unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(config.engine.preferred, Some(EngineTier::Local));
        assert_eq!(config.local.family, ModelFamily::ChatMl);
        assert_eq!(config.local.runtime.args.len(), 4);
        assert_eq!(config.remote.provider, ProviderKind::Anthropic);
        assert_eq!(config.remote.base_url.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(config.assistant.min_capability, 3);
        assert_eq!(config.assistant.capability, 2);
        assert_eq!(config.store.directory, "/tmp/recap-test");

        let generation = config.local.generation_config();
        assert_eq!(generation.max_output_tokens, 256);
        assert_eq!(generation.context_window, 32768);
        assert!(generation.stop_sequences.contains(&"<|im_end|>".to_string()));
        assert!(generation.validate().is_ok());
    }

    #[test]
    fn foreign_stop_override_fails_validation() {
        let yaml = r#"
local:
  family: llama3
  generation:
    stop_sequences: ["<|im_end|>"]
"#;
        let config: Config =
            serde_yaml_ng::from_str(yaml).unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert!(config.local.generation_config().validate().is_err());
    }

    #[test]
    fn missing_config_file_gives_error() {
        let result = Config::load(Path::new("/nonexistent/config.yaml"));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("config file not found"));
    }

    #[test]
    fn preferred_engine_is_written_in_place() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "remote:\n  model: gpt-4o\n").unwrap_or_else(|e| panic!("{e}"));

        Config::set_preferred_engine(&path, Some(EngineTier::Local))
            .unwrap_or_else(|e| panic!("{e}"));
        let config = Config::load(&path).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.engine.preferred, Some(EngineTier::Local));
        assert_eq!(config.remote.model, "gpt-4o");

        Config::set_preferred_engine(&path, None).unwrap_or_else(|e| panic!("{e}"));
        let config = Config::load(&path).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.engine.preferred, None);
    }

    #[test]
    fn expand_tilde_path() {
        let expanded = Config::expand_path("~/recap");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
