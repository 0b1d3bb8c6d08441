// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator.
//
// Loads genai-bff.yaml, resolves `${VAR}` interpolation, validates bounds,
// and computes a deterministic config hash for the startup log.

mod defaults;
mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use defaults::*;
pub use error::ConfigError;
pub use loader::{compute_hash, load_config};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn load(yaml: &str) -> Result<Config, ConfigError> {
        load_config(&StringSource::new(yaml))
    }

    const MINIMAL: &str = r#"
bff: v1
llama_stack:
  url: http://localhost:8321
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = load(MINIMAL).unwrap();
        assert_eq!(config.version, "v1");
        assert_eq!(config.environment, "development");
        assert_eq!(config.llama_stack.url, "http://localhost:8321");
        assert_eq!(config.moderation.on_failure, FailureMode::Open);
        assert_eq!(config.moderation.min_words, 10);
        assert_eq!(config.moderation.max_words, 30);
        assert_eq!(config.moderation.result_buffer, 100);
        assert!(config.maas.is_none());
        assert!(config.config_hash.starts_with("sha256:"));
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
bff: v1
environment: production
llama_stack:
  url: https://lsd.example/
  timeout_ms: 5000
moderation:
  on_failure: closed
  min_words: 5
  max_words: 20
  result_buffer: 8
  timeout_ms: 2000
  violation_message: "Blocked."
maas:
  url: https://maas.example
  token_ttl_secs: 600
  cache_ttl_secs: 540
  cleanup_interval_secs: 60
"#;
        let config = load(yaml).unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.llama_stack.url, "https://lsd.example");
        assert_eq!(config.llama_stack.timeout, Some(Duration::from_millis(5000)));
        assert_eq!(config.moderation.on_failure, FailureMode::Closed);
        assert_eq!(config.moderation.min_words, 5);
        assert_eq!(config.moderation.max_words, 20);
        assert_eq!(config.moderation.violation_message, "Blocked.");
        let maas = config.maas.unwrap();
        assert_eq!(maas.cache_ttl, Duration::from_secs(540));
        assert_eq!(maas.cleanup_interval, Duration::from_secs(60));
    }

    #[test]
    fn wrong_version_rejected() {
        let err = load("bff: v2\nllama_stack:\n  url: http://x\n").unwrap_err();
        assert!(err.to_string().contains("v2"));
    }

    #[test]
    fn unknown_top_level_field_rejected() {
        let err = load("bff: v1\nllama_stack:\n  url: http://x\nsurprise: 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));
    }

    #[test]
    fn unknown_failure_mode_rejected() {
        let yaml = "bff: v1\nllama_stack:\n  url: http://x\nmoderation:\n  on_failure: maybe\n";
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn max_words_below_min_rejected() {
        let yaml =
            "bff: v1\nllama_stack:\n  url: http://x\nmoderation:\n  min_words: 10\n  max_words: 5\n";
        assert!(matches!(load(yaml), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn empty_violation_message_rejected() {
        let yaml = "bff: v1\nllama_stack:\n  url: http://x\nmoderation:\n  violation_message: \"  \"\n";
        let err = load(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("violation_message"));
    }

    #[test]
    fn cache_ttl_longer_than_token_ttl_rejected() {
        let yaml = r#"
bff: v1
llama_stack:
  url: http://x
maas:
  url: http://maas
  token_ttl_secs: 60
  cache_ttl_secs: 120
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("cache_ttl_secs"));
    }

    #[test]
    fn non_http_url_rejected() {
        let err = load("bff: v1\nllama_stack:\n  url: localhost:8321\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn url_interpolated_from_environment() {
        std::env::set_var("GENAI_BFF_TEST_LSD_URL", "http://lsd.internal:8321");
        let config = load("bff: v1\nllama_stack:\n  url: ${GENAI_BFF_TEST_LSD_URL}\n").unwrap();
        assert_eq!(config.llama_stack.url, "http://lsd.internal:8321");
    }

    #[test]
    fn hash_is_deterministic_and_content_sensitive() {
        assert_eq!(compute_hash(MINIMAL), compute_hash(MINIMAL));
        assert_ne!(compute_hash(MINIMAL), compute_hash("bff: v1\n"));
    }

    #[test]
    fn file_source_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genai-bff.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = load_config(&FileSource::new(&path)).unwrap();
        assert_eq!(config.llama_stack.url, "http://localhost:8321");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(&FileSource::new("/nonexistent/genai-bff.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
