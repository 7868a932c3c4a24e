use std::io::Write;

use agri_core_common::{EngineConfig, ProviderKind};

#[test]
fn test_default_config_is_valid() {
    let config = EngineConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.retrieval.default_top_k, 5);
    assert_eq!(config.retrieval.context_byte_budget, 8_192);
    assert_eq!(config.workflow.ttl_seconds, 3_600);
    assert_eq!(config.workflow.cap, 10_000);
    assert_eq!(config.llm.retry.max_attempts, 3);
    assert_eq!(config.llm.retry.base_ms, 500);
    assert_eq!(config.llm.retry.cap_ms, 4_000);
    assert_eq!(config.limits.max_subtasks, 10);
}

#[test]
fn test_backoff_schedule() {
    let retry = EngineConfig::default().llm.retry;
    assert_eq!(retry.backoff_ms(0), 500);
    assert_eq!(retry.backoff_ms(1), 1_000);
    assert_eq!(retry.backoff_ms(2), 2_000);
    assert_eq!(retry.backoff_ms(3), 4_000);
    // Capped from here on
    assert_eq!(retry.backoff_ms(10), 4_000);
}

#[test]
fn test_load_from_file_with_partial_sections() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[llm]
default_provider = "ollama"
default_model = "qwen2.5:7b"
temperature = 0.1

[retrieval]
default_top_k = 3
"#
    )
    .unwrap();

    let config = EngineConfig::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.llm.default_provider, ProviderKind::Ollama);
    assert_eq!(config.llm.default_model, "qwen2.5:7b");
    assert_eq!(config.retrieval.default_top_k, 3);
    // Untouched sections fall back to defaults
    assert_eq!(config.embedding.dimension, 384);
    assert_eq!(config.workflow.cap, 10_000);
}

#[test]
fn test_invalid_temperature_rejected() {
    let mut config = EngineConfig::default();
    config.llm.temperature = 3.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_top_k_rejected() {
    let mut config = EngineConfig::default();
    config.retrieval.default_top_k = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_file_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "not [valid toml").unwrap();
    assert!(EngineConfig::from_file(file.path().to_str().unwrap()).is_err());
}
