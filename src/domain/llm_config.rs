use serde::{Deserialize, Serialize};
use validator::Validate;

/// Which backend family answers generation requests. Chosen once at startup.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LlmType {
    #[serde(alias = "openai")]
    OpenAI,
    #[serde(alias = "azure", alias = "azureopenai")]
    AzureOpenAI,
    #[serde(alias = "ollama")]
    Ollama,
    /// Long-lived agent process driven over a JSON-lines event stream.
    #[serde(alias = "session")]
    Session,
}

impl LlmType {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmType::OpenAI => "https://api.openai.com/v1",
            LlmType::AzureOpenAI => "",
            LlmType::Ollama => "http://localhost:11434",
            LlmType::Session => "",
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, LlmType::Session)
    }

    /// Hosted APIs that reject anonymous calls.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, LlmType::OpenAI | LlmType::AzureOpenAI)
    }

    /// Account name used when the API key lives in the OS keyring.
    pub fn key_name(&self) -> &'static str {
        match self {
            LlmType::OpenAI => "openai",
            LlmType::AzureOpenAI => "azure-openai",
            LlmType::Ollama => "ollama",
            LlmType::Session => "session",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct LlmConfig {
    pub llm_type: LlmType,
    /// Base URL of the chat API. Empty means the type's default.
    pub endpoint: String,
    pub api_key: Option<String>,
    #[validate(length(min = 1, message = "model_name is required"))]
    pub model_name: String,
    #[validate(range(min = 1, max = 3600))]
    pub request_timeout_secs: u64,
    pub max_tokens: Option<u32>,
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: f64,
}

impl LlmConfig {
    pub fn resolved_endpoint(&self) -> String {
        let trimmed = self.endpoint.trim();
        if trimmed.is_empty() {
            self.llm_type.default_endpoint().to_string()
        } else {
            trimmed.trim_end_matches('/').to_string()
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            llm_type: LlmType::OpenAI,
            endpoint: String::new(),
            api_key: None,
            model_name: "gpt-4o-mini".to_string(),
            request_timeout_secs: 120,
            max_tokens: Some(1000),
            temperature: 0.15,
        }
    }
}

/// How to launch the session agent process.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct SessionConfig {
    #[validate(length(min = 1, message = "session command is required"))]
    pub command: String,
    pub args: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: "copilot".to_string(),
            args: vec!["--server".to_string(), "--stdio".to_string()],
        }
    }
}

/// In-memory cache of raw chat replies.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct CacheConfig {
    pub enabled: bool,
    #[validate(range(min = 1, message = "cache max_entries must be at least 1"))]
    pub max_entries: usize,
    #[validate(range(min = 1, message = "cache ttl_secs must be at least 1"))]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 64,
            ttl_secs: 3600,
        }
    }
}
