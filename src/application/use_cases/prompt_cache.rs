//! Memoized system prompt.
//!
//! The prompt is keyed by a SHA-256 over the schema document, the metadata
//! document and the render limits. A call with the same inputs returns the
//! cached prompt; any change to the inputs rebuilds and replaces it. The lock
//! is held across the build so concurrent first calls render once.

use super::sql_prompt_builder::{PromptLimits, SqlPromptBuilder};
use crate::domain::error::{AppError, Result};
use crate::shared::token_counter::TokenCounter;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

struct CachedPrompt {
    key: String,
    prompt: Arc<str>,
}

#[derive(Default)]
pub struct PromptCache {
    slot: Mutex<Option<CachedPrompt>>,
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &self,
        database_schema_json: &str,
        llm_config_json: &str,
        limits: PromptLimits,
    ) -> Result<Arc<str>> {
        let key = Self::fingerprint(database_schema_json, llm_config_json, limits);

        let mut slot = self
            .slot
            .lock()
            .map_err(|_| AppError::Internal("Prompt cache lock poisoned".to_string()))?;

        if let Some(cached) = slot.as_ref().filter(|cached| cached.key == key) {
            debug!(key = %&key[..12], "System prompt cache hit");
            return Ok(cached.prompt.clone());
        }

        let prompt: Arc<str> =
            SqlPromptBuilder::build_system_prompt(database_schema_json, llm_config_json, limits)?
                .into();

        info!(
            key = %&key[..12],
            replaced = slot.is_some(),
            estimated_tokens = TokenCounter::estimate_tokens(&prompt),
            "System prompt generated and cached"
        );
        debug!(system_prompt = %prompt, "System prompt");

        *slot = Some(CachedPrompt {
            key,
            prompt: prompt.clone(),
        });
        Ok(prompt)
    }

    /// Drop the cached prompt; the next call rebuilds.
    pub fn invalidate(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    pub fn fingerprint(database_schema_json: &str, llm_config_json: &str, limits: PromptLimits) -> String {
        let mut hasher = Sha256::new();
        for part in [database_schema_json, llm_config_json] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.update((limits.max_tables as u64).to_le_bytes());
        hasher.update((limits.max_columns_per_table as u64).to_le_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{"tables":[{"tableName":"Orders","columns":[]}]}"#;
    const OTHER_SCHEMA: &str = r#"{"tables":[{"tableName":"Invoices","columns":[]}]}"#;
    const CONFIG: &str = "{}";

    #[test]
    fn test_same_inputs_reuse_the_prompt() {
        let cache = PromptCache::new();
        let first = cache.get_or_build(SCHEMA, CONFIG, PromptLimits::default()).unwrap();
        let second = cache.get_or_build(SCHEMA, CONFIG, PromptLimits::default()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_changed_inputs_rebuild() {
        let cache = PromptCache::new();
        let first = cache.get_or_build(SCHEMA, CONFIG, PromptLimits::default()).unwrap();
        let second = cache.get_or_build(OTHER_SCHEMA, CONFIG, PromptLimits::default()).unwrap();
        assert!(first.contains("[dbo].[Orders]"));
        assert!(second.contains("[dbo].[Invoices]"));
        assert!(!second.contains("[dbo].[Orders]"));
    }

    #[test]
    fn test_limits_are_part_of_the_key() {
        let limited = PromptLimits {
            max_tables: 0,
            ..Default::default()
        };
        assert_ne!(
            PromptCache::fingerprint(SCHEMA, CONFIG, PromptLimits::default()),
            PromptCache::fingerprint(SCHEMA, CONFIG, limited)
        );
    }

    #[test]
    fn test_invalidate_forces_rebuild() {
        let cache = PromptCache::new();
        let first = cache.get_or_build(SCHEMA, CONFIG, PromptLimits::default()).unwrap();
        cache.invalidate();
        let second = cache.get_or_build(SCHEMA, CONFIG, PromptLimits::default()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_failed_build_caches_nothing() {
        let cache = PromptCache::new();
        assert!(cache.get_or_build("  ", CONFIG, PromptLimits::default()).is_err());
        assert!(cache.get_or_build(SCHEMA, CONFIG, PromptLimits::default()).is_ok());
    }
}
