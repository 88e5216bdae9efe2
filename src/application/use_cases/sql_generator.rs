use super::prompt_cache::PromptCache;
use super::sql_prompt_builder::PromptLimits;
use crate::domain::error::{AppError, Result};
use crate::infrastructure::config::Settings;
use crate::infrastructure::llm_clients::{BackendDispatcher, GenerationRequest};
use crate::infrastructure::response::clean_sql_response;
use std::sync::Arc;
use tracing::info;

/// Question in, one cleaned T-SQL statement out.
pub struct SqlGenerator {
    dispatcher: BackendDispatcher,
    prompt_cache: PromptCache,
    limits: PromptLimits,
}

impl SqlGenerator {
    pub fn new(dispatcher: BackendDispatcher, limits: PromptLimits) -> Self {
        Self {
            dispatcher,
            prompt_cache: PromptCache::new(),
            limits,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let dispatcher =
            BackendDispatcher::from_settings(&settings.llm, &settings.session, &settings.cache)?;
        Ok(Self::new(dispatcher, settings.prompt))
    }

    pub fn system_prompt(&self, database_schema_json: &str, llm_config_json: &str) -> Result<Arc<str>> {
        self.prompt_cache
            .get_or_build(database_schema_json, llm_config_json, self.limits)
    }

    pub async fn generate_statement(
        &self,
        natural_language_query: &str,
        database_schema_json: &str,
        llm_config_json: &str,
        hints: Option<&str>,
    ) -> Result<String> {
        if natural_language_query.trim().is_empty() {
            return Err(AppError::ValidationError(
                "naturalLanguageQuery: a question is required".to_string(),
            ));
        }

        let system_prompt = self.system_prompt(database_schema_json, llm_config_json)?;
        let request = GenerationRequest::new(natural_language_query, system_prompt)
            .with_hints(hints.map(str::to_string));

        let raw = self.dispatcher.generate(&request).await?;
        let sql = clean_sql_response(&raw);

        info!(
            backend = self.dispatcher.backend_name(),
            sql_chars = sql.len(),
            "SQL statement generated"
        );
        Ok(sql)
    }

    /// Release the backend. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
