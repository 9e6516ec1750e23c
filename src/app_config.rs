/*!
 * Application configuration.
 *
 * Loaded from a JSON file (`conf.json` by default). Every section has
 * defaults, so a partial file is valid.
 */

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::task::models::{StopOutcome, MAX_BATCH_SIZE};

/// Top-level configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Language of the item source texts
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Language translations are produced in
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Translation config
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Task engine config
    #[serde(default)]
    pub engine: EngineConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Supported translation backends
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    // @provider: OpenAI chat completions
    #[default]
    OpenAI,
    // @provider: Google Gemini
    Google,
    // @provider: Anthropic messages
    Anthropic,
}

impl TranslationProvider {
    /// Human-readable name for log lines
    pub fn display_name(&self) -> &str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Google => "Google Gemini",
            Self::Anthropic => "Anthropic",
        }
    }

    /// Identifier used in config files and task settings
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::OpenAI => "openai".to_string(),
            Self::Google => "google".to_string(),
            Self::Anthropic => "anthropic".to_string(),
        }
    }
}

impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "google" | "gemini" => Ok(Self::Google),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(anyhow!("Unknown translation provider: {}", other)),
        }
    }
}

/// Credentials and endpoint of one backend
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Matches `TranslationProvider::to_lowercase_string`
    #[serde(rename = "type")]
    pub provider_type: String,

    // @field: Model name
    #[serde(default = "String::new")]
    pub model: String,

    // @field: API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: HTTP timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    /// Entry with the backend's default model and endpoint and no key
    pub fn new(provider_type: TranslationProvider) -> Self {
        let (model, endpoint) = match provider_type {
            TranslationProvider::OpenAI => (default_openai_model(), default_openai_endpoint()),
            TranslationProvider::Google => (default_google_model(), default_google_endpoint()),
            TranslationProvider::Anthropic => (default_anthropic_model(), default_anthropic_endpoint()),
        };
        Self {
            provider_type: provider_type.to_lowercase_string(),
            model,
            api_key: String::new(),
            endpoint,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Provider selection and prompt settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    /// Backend used when a task does not name one
    #[serde(default)]
    pub provider: TranslationProvider,

    /// One entry per configured backend
    #[serde(default)]
    pub available_providers: Vec<ProviderConfig>,

    /// Prompt settings shared by every backend
    #[serde(default)]
    pub common: TranslationCommonConfig,
}

/// Prompt settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationCommonConfig {
    /// System prompt template for translation
    /// Placeholders: {source_language}, {target_language}
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Output token budget per batch request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Reuse earlier translations of identical texts
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
}

impl Default for TranslationCommonConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            cache_enabled: default_cache_enabled(),
        }
    }
}

/// Batch engine settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    /// Items per batch when the caller does not choose
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// Bound on a single translate call, in seconds
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Hard cap on the inter-batch delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Base delay for models missing from `model_delays`
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,

    /// Per-model base delay in milliseconds
    #[serde(default = "default_model_delays")]
    pub model_delays: BTreeMap<String, u64>,

    /// Terminal status a plain stop resolves to
    #[serde(default)]
    pub stop_outcome: StopOutcome,

    /// Heartbeat age after which another process may take over a running task
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,

    /// SQLite file; the user data directory is used when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Translation cache file; the cache lives in memory only when unset
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            batch_timeout_secs: default_batch_timeout_secs(),
            max_delay_ms: default_max_delay_ms(),
            default_delay_ms: default_delay_ms(),
            model_delays: default_model_delays(),
            stop_outcome: StopOutcome::default(),
            lease_timeout_secs: default_lease_timeout_secs(),
            database_path: None,
            cache_path: None,
        }
    }
}

impl EngineConfig {
    /// Validate engine bounds
    pub fn validate(&self) -> Result<()> {
        if self.default_batch_size == 0 {
            return Err(anyhow!("engine.default_batch_size must be at least 1"));
        }
        if self.default_batch_size > MAX_BATCH_SIZE {
            return Err(anyhow!("engine.default_batch_size must not exceed {}", MAX_BATCH_SIZE));
        }
        if self.batch_timeout_secs == 0 {
            return Err(anyhow!("engine.batch_timeout_secs must be greater than 0"));
        }
        // A healthy runner renews its lease at least once per batch and delay
        let renewal_ms = self
            .batch_timeout_secs
            .saturating_mul(1_000)
            .saturating_add(self.max_delay_ms);
        if self.lease_timeout_secs.saturating_mul(1_000) <= renewal_ms {
            return Err(anyhow!(
                "engine.lease_timeout_secs must exceed batch_timeout_secs plus max_delay_ms ({} ms)",
                renewal_ms
            ));
        }
        Ok(())
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

fn default_source_language() -> String {
    "en".to_string()
}

fn default_target_language() -> String {
    "ar".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_timeout_secs() -> u64 {
    300
}

fn default_lease_timeout_secs() -> u64 {
    900
}

fn default_cache_enabled() -> bool {
    true
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_delay_ms() -> u64 {
    500
}

fn default_model_delays() -> BTreeMap<String, u64> {
    [
        ("gpt-3.5-turbo", 300),
        ("gemini-2.5-flash", 200),
        ("gemini-2.5-pro", 500),
        ("gpt-4-turbo", 800),
        ("gpt-4o", 1000),
    ]
    .into_iter()
    .map(|(model, ms)| (model.to_string(), ms))
    .collect()
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_google_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_anthropic_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_openai_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_google_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-haiku".to_string()
}

fn default_system_prompt() -> String {
    "You are a professional software localization translator. Translate every value of the JSON object you receive from {source_language} to {target_language}. Keep placeholders, HTML tags and punctuation intact. Reply with a single JSON object using exactly the same keys and the translated strings as values.".to_string()
}

impl Config {
    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize config to JSON")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config file: {:?}", path))
    }

    /// Check the settings needed for real provider calls
    pub fn validate(&self) -> Result<()> {
        if self.source_language.trim().is_empty() || self.target_language.trim().is_empty() {
            return Err(anyhow!("Source and target languages must be set"));
        }

        if self.translation.get_api_key().is_empty() {
            return Err(anyhow!(
                "Translation API key is required for {} provider",
                self.translation.provider.display_name()
            ));
        }

        for provider in &self.translation.available_providers {
            if !provider.endpoint.is_empty() {
                Url::parse(&provider.endpoint).with_context(|| {
                    format!("Invalid endpoint for {}: {}", provider.provider_type, provider.endpoint)
                })?;
            }
        }

        self.engine.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: default_source_language(),
            target_language: default_target_language(),
            translation: TranslationConfig::default(),
            engine: EngineConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl TranslationConfig {
    /// Entry of the selected backend
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        self.get_provider_config(&self.provider)
    }

    /// Get a specific provider configuration by type
    pub fn get_provider_config(&self, provider_type: &TranslationProvider) -> Option<&ProviderConfig> {
        let provider_str = provider_type.to_lowercase_string();
        self.available_providers
            .iter()
            .find(|p| p.provider_type == provider_str)
    }

    /// Model of the selected backend, falling back to its default
    pub fn get_model(&self) -> String {
        if let Some(provider_config) = self.get_active_provider_config() {
            if !provider_config.model.is_empty() {
                return provider_config.model.clone();
            }
        }

        match self.provider {
            TranslationProvider::OpenAI => default_openai_model(),
            TranslationProvider::Google => default_google_model(),
            TranslationProvider::Anthropic => default_anthropic_model(),
        }
    }

    /// API key of the selected backend; empty when unset
    pub fn get_api_key(&self) -> String {
        self.get_active_provider_config()
            .map(|p| p.api_key.clone())
            .unwrap_or_default()
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::default(),
            available_providers: vec![
                ProviderConfig::new(TranslationProvider::OpenAI),
                ProviderConfig::new(TranslationProvider::Google),
                ProviderConfig::new(TranslationProvider::Anthropic),
            ],
            common: TranslationCommonConfig::default(),
        }
    }
}
