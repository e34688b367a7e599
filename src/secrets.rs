use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::{RecapError, Result};

/// Credential storage keyed by provider name (`openai`, `anthropic`).
pub trait SecretStore: Send + Sync {
    fn get(&self, provider: &str) -> Result<Option<String>>;
    fn set(&self, provider: &str, secret: &str) -> Result<()>;
    fn delete(&self, provider: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, provider: &str, secret: &str) -> Self {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.to_string(), secret.to_string());
        self
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, provider: &str) -> Result<Option<String>> {
        Ok(self
            .secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned())
    }

    fn set(&self, provider: &str, secret: &str) -> Result<()> {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, provider: &str) -> Result<()> {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(provider);
        Ok(())
    }
}

/// Reads credentials from the environment: `RECAP_<PROVIDER>_API_KEY`,
/// then the provider's own conventional variable.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    fn candidate_vars(provider: &str) -> Vec<String> {
        let upper = provider.to_ascii_uppercase();
        vec![format!("RECAP_{upper}_API_KEY"), format!("{upper}_API_KEY")]
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, provider: &str) -> Result<Option<String>> {
        Ok(Self::candidate_vars(provider)
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty()))
    }

    fn set(&self, provider: &str, _secret: &str) -> Result<()> {
        Err(RecapError::Secret(format!(
            "cannot store a {provider} key: environment secrets are read-only"
        )))
    }

    fn delete(&self, provider: &str) -> Result<()> {
        Err(RecapError::Secret(format!(
            "cannot delete the {provider} key: environment secrets are read-only"
        )))
    }
}
