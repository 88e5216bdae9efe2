pub mod cache;
pub mod chat_completion;
pub mod session;

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{CacheConfig, LlmConfig, SessionConfig};
use async_trait::async_trait;
use cache::CachedBackend;
use chat_completion::ChatCompletionBackend;
use session::{ProcessTransport, SessionBackend};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One question for a backend: the user's query, the cached system prompt and
/// optional free-text hints.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub query: String,
    pub system_prompt: Arc<str>,
    pub hints: Option<String>,
}

impl GenerationRequest {
    pub fn new(query: impl Into<String>, system_prompt: Arc<str>) -> Self {
        Self {
            query: query.into(),
            system_prompt,
            hints: None,
        }
    }

    pub fn with_hints(mut self, hints: Option<String>) -> Self {
        self.hints = hints;
        self
    }

    pub fn user_message(&self) -> String {
        build_user_message(&self.query, self.hints.as_deref())
    }
}

/// User turn sent alongside the system prompt. The hints block is left out
/// when hints are blank.
pub fn build_user_message(query: &str, hints: Option<&str>) -> String {
    let mut message = String::new();
    if let Some(hints) = hints.map(str::trim).filter(|h| !h.is_empty()) {
        message.push_str("HINTS:\n");
        message.push_str(hints);
        message.push_str("\n\n");
    }
    message.push_str("QUERY: ");
    message.push_str(query.trim());
    message.push_str("\n\nReturn only T-SQL starting with SELECT.");
    message
}

#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Raw model text for one request. Cleanup happens downstream.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Release anything held across calls. Never fails.
    async fn shutdown(&self) {}

    fn name(&self) -> &'static str;
}

/// Fixed backend chosen at startup, every call bounded by one timeout.
pub struct BackendDispatcher {
    backend: Box<dyn SqlBackend>,
    timeout: Duration,
}

impl BackendDispatcher {
    pub fn new(backend: Box<dyn SqlBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn from_settings(
        llm: &LlmConfig,
        session: &SessionConfig,
        cache: &CacheConfig,
    ) -> Result<Self> {
        let backend: Box<dyn SqlBackend> = if llm.llm_type.is_session() {
            let transport = ProcessTransport::new(session.clone());
            Box::new(SessionBackend::new(Box::new(transport), llm.model_name.clone()))
        } else {
            let chat = ChatCompletionBackend::new(llm.clone())?;
            if cache.enabled {
                Box::new(CachedBackend::new(chat, &llm.model_name, cache))
            } else {
                Box::new(chat)
            }
        };

        info!(
            backend = backend.name(),
            model = %llm.model_name,
            timeout_secs = llm.request_timeout_secs,
            "LLM backend selected"
        );

        Ok(Self::new(backend, Duration::from_secs(llm.request_timeout_secs)))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.backend.generate(request)).await;

        match outcome {
            Ok(Ok(text)) => {
                debug!(
                    backend = self.backend.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    chars = text.len(),
                    "LLM response received"
                );
                Ok(text)
            }
            Ok(Err(err)) => {
                warn!(backend = self.backend.name(), error = %err, "LLM request failed");
                Err(err)
            }
            Err(_) => {
                warn!(
                    backend = self.backend.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "LLM request timed out"
                );
                Err(AppError::TimeoutError(format!(
                    "LLM request exceeded {:?}",
                    self.timeout
                )))
            }
        }
    }

    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
    }
}
