use super::{GenerationRequest, SqlBackend};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{LlmConfig, LlmType};
use crate::shared::token_counter::TokenCounter;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

const AZURE_API_VERSION: &str = "2024-06-01";

/// One-shot chat call against an OpenAI, Azure OpenAI or Ollama endpoint.
/// No retries; the dispatcher owns the timeout.
pub struct ChatCompletionBackend {
    client: reqwest::Client,
    config: LlmConfig,
    url: Url,
}

impl ChatCompletionBackend {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let url = Self::completion_url(&config)?;
        Ok(Self {
            client: reqwest::Client::new(),
            config,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn completion_url(config: &LlmConfig) -> Result<Url> {
        let base = config.resolved_endpoint();
        if base.is_empty() {
            return Err(AppError::ConfigError(format!(
                "An endpoint is required for {:?}",
                config.llm_type
            )));
        }
        Url::parse(&base)
            .map_err(|e| AppError::ConfigError(format!("Invalid endpoint '{}': {}", base, e)))?;

        let full = match config.llm_type {
            LlmType::OpenAI => format!("{}/chat/completions", base),
            LlmType::AzureOpenAI => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base, config.model_name, AZURE_API_VERSION
            ),
            LlmType::Ollama => format!("{}/api/chat", base),
            LlmType::Session => {
                return Err(AppError::ConfigError(
                    "The session backend does not use a chat endpoint".to_string(),
                ))
            }
        };

        Url::parse(&full)
            .map_err(|e| AppError::ConfigError(format!("Invalid endpoint '{}': {}", full, e)))
    }

    fn request_body(&self, system: &str, user: &str) -> Value {
        let messages = json!([
            { "role": "system", "content": system },
            { "role": "user", "content": user }
        ]);

        match self.config.llm_type {
            LlmType::Ollama => {
                let mut options = json!({ "temperature": self.config.temperature });
                if let Some(max_tokens) = self.config.max_tokens {
                    options["num_predict"] = json!(max_tokens);
                }
                json!({
                    "model": self.config.model_name,
                    "messages": messages,
                    "stream": false,
                    "options": options,
                })
            }
            _ => {
                let mut body = json!({
                    "model": self.config.model_name,
                    "messages": messages,
                    "temperature": self.config.temperature,
                });
                if let Some(max_tokens) = self.config.max_tokens {
                    body["max_tokens"] = json!(max_tokens);
                }
                body
            }
        }
    }

    fn extract_content(&self, json: &Value) -> Result<String> {
        let content = match self.config.llm_type {
            LlmType::Ollama => json["message"]["content"].as_str(),
            _ => json["choices"][0]["message"]["content"].as_str(),
        };
        content
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::LLMError("Invalid response format".to_string()))
    }
}

fn map_send_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::TimeoutError(format!("Request timed out: {}", err))
    } else if err.is_connect() || err.is_request() {
        AppError::ConnectionError(format!("Request failed: {}", err))
    } else {
        AppError::LLMError(format!("Request failed: {}", err))
    }
}

#[async_trait]
impl SqlBackend for ChatCompletionBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let user = request.user_message();
        let body = self.request_body(&request.system_prompt, &user);

        let mut http = self.client.post(self.url.clone());
        if let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            http = match self.config.llm_type {
                LlmType::AzureOpenAI => http.header("api-key", api_key),
                _ => http.bearer_auth(api_key),
            };
        }

        let estimated_tokens = TokenCounter::estimate_messages_tokens(&[
            ("system", &*request.system_prompt),
            ("user", user.as_str()),
        ]);
        debug!(
            url = %self.url,
            model = %self.config.model_name,
            estimated_tokens,
            "Sending chat completion"
        );

        let response = http.json(&body).send().await.map_err(map_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::LLMError(format!("API error ({}): {}", status, text)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| AppError::LLMError(format!("Failed to parse JSON: {}", e)))?;

        self.extract_content(&json)
    }

    fn name(&self) -> &'static str {
        "chat"
    }
}
