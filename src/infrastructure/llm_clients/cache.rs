use super::{GenerationRequest, SqlBackend};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::CacheConfig;
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

struct ResponseCacheEntry {
    text: String,
    created_at: Instant,
}

/// LRU cache of raw model replies with TTL
pub struct ResponseCache {
    entries: HashMap<String, ResponseCacheEntry>,
    max_entries: usize,
    ttl: Duration,
    access_order: Vec<String>,
    hits: usize,
    misses: usize,
}

impl ResponseCache {
    pub fn new(max_entries: usize, ttl_secs: u64) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            ttl: Duration::from_secs(ttl_secs),
            access_order: Vec::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn make_key(model: &str, system: &str, user: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [model, system, user] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        let result = self
            .entries
            .get(key)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
            .map(|entry| entry.text.clone());

        if result.is_some() {
            self.hits += 1;
            self.touch(key);
        } else {
            self.misses += 1;
            if self.entries.remove(key).is_some() {
                self.access_order.retain(|k| k != key);
            }
        }

        result
    }

    /// Store a reply. Expired entries are pruned first so they never push out
    /// live ones.
    pub fn put(&mut self, key: String, text: String) {
        self.cleanup();
        if self.entries.remove(&key).is_some() {
            self.access_order.retain(|k| k != &key);
        }

        while self.entries.len() >= self.max_entries && !self.access_order.is_empty() {
            let oldest = self.access_order.remove(0);
            self.entries.remove(&oldest);
        }

        self.entries.insert(
            key.clone(),
            ResponseCacheEntry {
                text,
                created_at: Instant::now(),
            },
        );
        self.access_order.push(key);
    }

    fn touch(&mut self, key: &str) {
        self.access_order.retain(|k| k != key);
        self.access_order.push(key.to_string());
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let total_requests = self.hits + self.misses;
        let hit_rate = if total_requests > 0 {
            self.hits as f32 / total_requests as f32
        } else {
            0.0
        };

        let valid_entries = self
            .entries
            .values()
            .filter(|e| e.created_at.elapsed() < self.ttl)
            .count();

        ResponseCacheStats {
            total_entries: self.entries.len(),
            valid_entries,
            max_entries: self.max_entries,
            hits: self.hits,
            misses: self.misses,
            hit_rate,
        }
    }

    fn cleanup(&mut self) {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.created_at.elapsed() >= ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            self.entries.remove(&key);
            self.access_order.retain(|k| k != &key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseCacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub max_entries: usize,
    pub hits: usize,
    pub misses: usize,
    pub hit_rate: f32,
}

/// Chat backend decorator that answers repeated questions from memory.
/// Failed calls are never stored.
pub struct CachedBackend<B> {
    inner: B,
    model: String,
    cache: Mutex<ResponseCache>,
}

impl<B: SqlBackend> CachedBackend<B> {
    pub fn new(inner: B, model: &str, config: &CacheConfig) -> Self {
        Self {
            inner,
            model: model.to_string(),
            cache: Mutex::new(ResponseCache::new(config.max_entries, config.ttl_secs)),
        }
    }

    fn cache(&self) -> Result<MutexGuard<'_, ResponseCache>> {
        self.cache
            .lock()
            .map_err(|_| AppError::Internal("Response cache lock poisoned".to_string()))
    }

    pub fn stats(&self) -> Result<ResponseCacheStats> {
        Ok(self.cache()?.stats())
    }
}

#[async_trait]
impl<B: SqlBackend> SqlBackend for CachedBackend<B> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let key = ResponseCache::make_key(&self.model, &request.system_prompt, &request.user_message());

        let cached = self.cache()?.get(&key);
        if let Some(text) = cached {
            debug!(key = %&key[..12], "Response cache hit");
            return Ok(text);
        }

        let text = self.inner.generate(request).await?;

        let mut cache = self.cache()?;
        cache.put(key, text.clone());
        let stats = cache.stats();
        debug!(
            entries = stats.total_entries,
            hits = stats.hits,
            misses = stats.misses,
            "Response cached"
        );

        Ok(text)
    }

    async fn shutdown(&self) {
        match self.cache() {
            Ok(mut cache) => {
                let stats = cache.stats();
                info!(
                    entries = stats.total_entries,
                    hits = stats.hits,
                    misses = stats.misses,
                    hit_rate = stats.hit_rate,
                    "Response cache released"
                );
                cache.clear();
            }
            Err(e) => warn!(error = %e, "Response cache unavailable at shutdown"),
        }
        self.inner.shutdown().await;
    }

    fn name(&self) -> &'static str {
        "cached-chat"
    }
}
