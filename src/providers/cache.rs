/*!
 * Translation cache.
 *
 * Identical source texts are common in localization files, so translations
 * are remembered per (text, source language, target language, model).
 * `CachingClient` wraps any `TranslationClient`: cached items never reach the
 * provider and only the misses are sent on.
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::ProviderError;
use crate::providers::TranslationClient;
use crate::task::models::ItemId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct CacheKey {
    source_text: String,
    source_language: String,
    target_language: String,
    model: String,
}

impl CacheKey {
    fn new(source_text: &str, source_language: &str, target_language: &str, model: &str) -> Self {
        Self {
            source_text: source_text.trim().to_string(),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            model: model.to_string(),
        }
    }
}

/// On-disk form of one cached translation
#[derive(Serialize, Deserialize)]
struct CacheEntry {
    #[serde(flatten)]
    key: CacheKey,
    translation: String,
}

/// Hit and miss counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: usize,
    /// Lookups that had to go to the provider
    pub misses: usize,
    /// Stored translations
    pub entries: usize,
}

impl CacheStats {
    /// Share of lookups answered from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hits, {} misses ({:.0}% hit rate), {} entries",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.entries
        )
    }
}

/// Shared translation memory; clones see the same entries and counters
#[derive(Debug, Clone, Default)]
pub struct TranslationCache {
    entries: Arc<RwLock<HashMap<CacheKey, String>>>,
    hits: Arc<AtomicUsize>,
    misses: Arc<AtomicUsize>,
}

impl TranslationCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache file; a missing file gives an empty cache
    pub fn load(path: &Path) -> Result<Self> {
        let cache = Self::new();
        if !path.exists() {
            return Ok(cache);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read translation cache: {}", path.display()))?;
        let entries: Vec<CacheEntry> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse translation cache: {}", path.display()))?;
        {
            let mut map = cache.entries.write();
            map.extend(entries.into_iter().map(|e| (e.key, e.translation)));
        }
        debug!("Loaded {} cached translations from {}", cache.len(), path.display());
        Ok(cache)
    }

    /// Write every entry to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
        }
        let entries: Vec<CacheEntry> = self
            .entries
            .read()
            .iter()
            .map(|(key, translation)| CacheEntry {
                key: key.clone(),
                translation: translation.clone(),
            })
            .collect();
        let json = serde_json::to_string_pretty(&entries).context("Failed to serialize translation cache")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write translation cache: {}", path.display()))
    }

    /// Look up a translation, counting the hit or miss
    pub fn get(&self, source_text: &str, source_language: &str, target_language: &str, model: &str) -> Option<String> {
        let key = CacheKey::new(source_text, source_language, target_language, model);
        let found = self.entries.read().get(&key).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Remember a translation; blank translations are ignored
    pub fn store(&self, source_text: &str, source_language: &str, target_language: &str, model: &str, translation: &str) {
        if translation.trim().is_empty() {
            return;
        }
        let key = CacheKey::new(source_text, source_language, target_language, model);
        self.entries.write().insert(key, translation.to_string());
    }

    /// Number of stored translations
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

/// `TranslationClient` that answers from a `TranslationCache` first
#[derive(Debug)]
pub struct CachingClient {
    inner: Arc<dyn TranslationClient>,
    cache: TranslationCache,
    source_language: String,
    target_language: String,
}

impl CachingClient {
    /// Wrap `inner` for one language pair
    pub fn new(
        inner: Arc<dyn TranslationClient>,
        cache: TranslationCache,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            cache,
            source_language: source_language.into(),
            target_language: target_language.into(),
        }
    }

    /// The underlying cache
    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }
}

#[async_trait]
impl TranslationClient for CachingClient {
    async fn translate_batch(
        &self,
        items: &BTreeMap<ItemId, String>,
        provider: &str,
        model: &str,
    ) -> Result<HashMap<ItemId, String>, ProviderError> {
        let mut translations = HashMap::with_capacity(items.len());
        let mut misses = BTreeMap::new();

        for (id, text) in items {
            match self.cache.get(text, &self.source_language, &self.target_language, model) {
                Some(hit) => {
                    translations.insert(*id, hit);
                }
                None => {
                    misses.insert(*id, text.clone());
                }
            }
        }

        if misses.is_empty() {
            debug!("All {} items served from the translation cache", items.len());
            return Ok(translations);
        }
        if !translations.is_empty() {
            debug!("{} cached, sending {} to the provider", translations.len(), misses.len());
        }

        let fresh = self.inner.translate_batch(&misses, provider, model).await?;
        for (id, translation) in &fresh {
            if let Some(text) = misses.get(id) {
                self.cache
                    .store(text, &self.source_language, &self.target_language, model, translation);
            }
        }
        translations.extend(fresh);
        Ok(translations)
    }
}
