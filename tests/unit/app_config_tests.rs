/*!
 * Tests for application configuration functionality
 */

use std::time::Duration;

use transbatch::app_config::{Config, LogLevel, TranslationProvider};
use transbatch::task::models::StopOutcome;
use transbatch::task::{ControllerOptions, SchedulerOptions};

/// Test default configuration values
#[test]
fn test_defaultConfig_withNoParameters_shouldHaveCorrectDefaults() {
    let config = Config::default();

    assert_eq!(config.source_language, "en");
    assert_eq!(config.target_language, "ar");
    assert_eq!(config.translation.provider, TranslationProvider::OpenAI);
    assert_eq!(config.log_level, LogLevel::Info);

    let google = config
        .translation
        .get_provider_config(&TranslationProvider::Google)
        .expect("Google provider config should exist");
    assert_eq!(google.model, "gemini-2.5-flash");
    assert_eq!(google.timeout_secs, 120);

    assert_eq!(config.translation.get_model(), "gpt-3.5-turbo");
    assert!(config.translation.get_api_key().is_empty());
    assert!(config.engine.database_path.is_none());
}

/// Test configuration validation
#[test]
fn test_configValidation_withVariousConfigs_shouldValidateCorrectly() {
    let mut config = Config::default();
    config.translation.available_providers[0].api_key = "sk-test".to_string();
    assert!(config.validate().is_ok());

    config.target_language = " ".to_string();
    assert!(config.validate().is_err());
    config.target_language = "fr".to_string();

    // Switching provider requires that provider's key
    config.translation.provider = TranslationProvider::Anthropic;
    assert!(config.validate().is_err());
    config.translation.available_providers[2].api_key = "anthropic-key".to_string();
    assert!(config.validate().is_ok());

    config.engine.default_batch_size = 0;
    assert!(config.validate().is_err());
    config.engine.default_batch_size = 10;

    config.engine.batch_timeout_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_saveAndLoad_shouldPreserveSettings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conf.json");

    let mut config = Config::default();
    config.target_language = "de".to_string();
    config.translation.provider = TranslationProvider::Google;
    config.engine.stop_outcome = StopOutcome::Failed;
    config.engine.model_delays.insert("custom-model".to_string(), 42);
    config.save(&path).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.target_language, "de");
    assert_eq!(loaded.translation.provider, TranslationProvider::Google);
    assert_eq!(loaded.engine.stop_outcome, StopOutcome::Failed);
    assert_eq!(loaded.engine.model_delays.get("custom-model"), Some(&42));

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"provider\": \"google\""));
    assert!(raw.contains("\"stop_outcome\": \"failed\""));
}

#[test]
fn test_fromFile_withMissingOrBrokenFile_shouldFail() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::from_file(dir.path().join("missing.json")).is_err());

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    assert!(Config::from_file(&broken).is_err());
}

#[test]
fn test_controllerOptions_fromEngineConfig_shouldCarryValues() {
    let mut config = Config::default();
    config.engine.batch_timeout_secs = 12;
    config.engine.stop_outcome = StopOutcome::Failed;
    config.engine.default_delay_ms = 250;

    let options = ControllerOptions::from_config(&config.engine);
    assert_eq!(options.stop_outcome, StopOutcome::Failed);
    assert_eq!(options.scheduler.batch_timeout, Duration::from_secs(12));
    assert_eq!(options.scheduler.rate.base_delay_ms("gpt-4o"), 1_000);
    assert_eq!(options.scheduler.rate.base_delay_ms("unlisted"), 250);

    let defaults = SchedulerOptions::default();
    assert_eq!(defaults.batch_timeout, Duration::from_secs(300));
}

#[test]
fn test_providerParsing_shouldAcceptKnownNames() {
    assert_eq!("OpenAI".parse::<TranslationProvider>().unwrap(), TranslationProvider::OpenAI);
    assert_eq!("gemini".parse::<TranslationProvider>().unwrap(), TranslationProvider::Google);
    assert_eq!(TranslationProvider::Anthropic.to_string(), "anthropic");
    assert!("lmstudio".parse::<TranslationProvider>().is_err());
}
