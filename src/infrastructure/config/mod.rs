//! Layered settings: built-in defaults, then an optional TOML file, then
//! `DATAGENIE_` environment variables (`__` separates nested keys, e.g.
//! `DATAGENIE_LLM__MODEL_NAME`).

use crate::application::use_cases::sql_prompt_builder::PromptLimits;
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{CacheConfig, LlmConfig, LlmType, SessionConfig};
use crate::infrastructure::security::keyring::KeyringManager;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;
use validator::Validate;

pub const DEFAULT_CONFIG_FILE: &str = "datagenie.toml";
pub const ENV_PREFIX: &str = "DATAGENIE_";
pub const KEYRING_SERVICE: &str = "datagenie";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Settings {
    #[validate(nested)]
    pub llm: LlmConfig,
    #[validate(nested)]
    pub session: SessionConfig,
    pub prompt: PromptLimits,
    #[validate(nested)]
    pub cache: CacheConfig,
}

impl Settings {
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let toml = match config_path {
            Some(path) => Toml::file(path),
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };

        Figment::from(Serialized::defaults(Settings::default()))
            .merge(toml)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate. An explicit `config_path` must exist.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            if !path.is_file() {
                return Err(AppError::ConfigError(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
        }

        let settings: Settings = Self::figment(config_path)
            .extract()
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
        settings.check()?;
        Ok(settings)
    }

    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AppError::ConfigError(e.to_string().replace('\n', "; ")))?;

        let endpoint = self.llm.endpoint.trim();
        if !endpoint.is_empty() {
            Url::parse(endpoint).map_err(|e| {
                AppError::ConfigError(format!("llm.endpoint '{}' is not a valid URL: {}", endpoint, e))
            })?;
        }

        if self.llm.llm_type == LlmType::AzureOpenAI && endpoint.is_empty() {
            return Err(AppError::ConfigError(
                "llm.endpoint is required for AzureOpenAI".to_string(),
            ));
        }

        Ok(())
    }
}

pub struct ConfigService {
    keyring: KeyringManager,
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigService {
    pub fn new() -> Self {
        Self {
            keyring: KeyringManager::new(KEYRING_SERVICE),
        }
    }

    /// Settings with the API key filled from the keyring when none is configured.
    pub fn load_settings(&self, config_path: Option<&Path>) -> Result<Settings> {
        let mut settings = Settings::load(config_path)?;
        self.resolve_api_key(&mut settings.llm);

        info!(
            llm_type = ?settings.llm.llm_type,
            model = %settings.llm.model_name,
            timeout_secs = settings.llm.request_timeout_secs,
            cache_enabled = settings.cache.enabled,
            "Settings loaded"
        );
        Ok(settings)
    }

    fn resolve_api_key(&self, llm: &mut LlmConfig) {
        let configured = llm.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if configured || !llm.llm_type.requires_api_key() {
            return;
        }

        match self.keyring.get_secret(llm.llm_type.key_name()) {
            Ok(Some(key)) => {
                debug!(service = self.keyring.service(), "API key read from keyring");
                llm.api_key = Some(key);
            }
            Ok(None) => warn!(
                llm_type = ?llm.llm_type,
                "No API key configured and none stored in the keyring"
            ),
            Err(e) => warn!(error = %e, "Keyring lookup failed"),
        }
    }

    pub fn save_api_key(&self, llm_type: LlmType, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::ValidationError("API key must not be empty".to_string()));
        }
        self.keyring.set_secret(llm_type.key_name(), key)?;
        info!(llm_type = ?llm_type, "API key stored in keyring");
        Ok(())
    }

    pub fn delete_api_key(&self, llm_type: LlmType) -> Result<()> {
        self.keyring.delete_secret(llm_type.key_name())?;
        info!(llm_type = ?llm_type, "API key removed from keyring");
        Ok(())
    }
}
