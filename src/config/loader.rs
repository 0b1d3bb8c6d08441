// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use sha2::{Digest, Sha256};

use super::defaults::*;
use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate the BFF config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate version and numeric bounds
/// 5. Resolve `${VAR}` interpolation in URL fields
/// 6. Build typed Config
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.bff != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.bff
        )));
    }

    let llama_stack = build_llama_stack(raw.llama_stack)?;
    let moderation = raw
        .moderation
        .map(build_moderation)
        .transpose()?
        .unwrap_or_default();
    let maas = raw.maas.map(build_maas).transpose()?;

    Ok(Config {
        version: raw.bff,
        environment: raw.environment.unwrap_or_else(|| "development".to_string()),
        llama_stack,
        moderation,
        maas,
        config_hash,
    })
}

/// Compute "sha256:{hex}" over the raw config text.
pub fn compute_hash(raw_yaml: &str) -> String {
    let digest = Sha256::digest(raw_yaml.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("sha256:{hex}")
}

fn build_llama_stack(raw: raw::RawLlamaStackConfig) -> Result<LlamaStackConfig, ConfigError> {
    let url = resolve_url("llama_stack.url", &raw.url)?;
    if raw.timeout_ms == Some(0) {
        return Err(ConfigError::Validation(
            "llama_stack.timeout_ms must be > 0".into(),
        ));
    }
    Ok(LlamaStackConfig {
        url,
        timeout: raw.timeout_ms.map(Duration::from_millis),
    })
}

fn build_moderation(raw: raw::RawModerationConfig) -> Result<ModerationConfig, ConfigError> {
    let on_failure = match raw.on_failure.as_deref() {
        None | Some("open") => FailureMode::Open,
        Some("closed") => FailureMode::Closed,
        Some(other) => {
            return Err(ConfigError::Validation(format!(
                "unknown moderation.on_failure \"{other}\", expected \"open\" or \"closed\""
            )))
        }
    };

    let min_words = raw.min_words.unwrap_or(DEFAULT_MIN_WORDS);
    let max_words = raw.max_words.unwrap_or(DEFAULT_MAX_WORDS);
    if min_words < 1 {
        return Err(ConfigError::Validation(
            "moderation.min_words must be >= 1".into(),
        ));
    }
    if max_words < min_words {
        return Err(ConfigError::Validation(format!(
            "moderation.max_words ({max_words}) must be >= min_words ({min_words})"
        )));
    }

    let result_buffer = raw.result_buffer.unwrap_or(DEFAULT_RESULT_BUFFER);
    if result_buffer < 1 {
        return Err(ConfigError::Validation(
            "moderation.result_buffer must be >= 1".into(),
        ));
    }

    let timeout_ms = raw.timeout_ms.unwrap_or(DEFAULT_MODERATION_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "moderation.timeout_ms must be > 0".into(),
        ));
    }

    let violation_message = raw
        .violation_message
        .unwrap_or_else(|| DEFAULT_VIOLATION_MESSAGE.to_string());
    if violation_message.trim().is_empty() {
        return Err(ConfigError::Validation(
            "moderation.violation_message must not be empty".into(),
        ));
    }

    Ok(ModerationConfig {
        on_failure,
        min_words,
        max_words,
        result_buffer,
        timeout: Duration::from_millis(timeout_ms),
        violation_message,
    })
}

fn build_maas(raw: raw::RawMaasConfig) -> Result<MaasConfig, ConfigError> {
    let url = resolve_url("maas.url", &raw.url)?;
    let token_ttl = raw.token_ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
    let cache_ttl = raw.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    let cleanup = raw
        .cleanup_interval_secs
        .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS);

    if token_ttl == 0 || cache_ttl == 0 || cleanup == 0 {
        return Err(ConfigError::Validation(
            "maas token_ttl_secs, cache_ttl_secs and cleanup_interval_secs must be > 0".into(),
        ));
    }
    // A cached token must never outlive the credential it stands for.
    if cache_ttl > token_ttl {
        return Err(ConfigError::Validation(format!(
            "maas.cache_ttl_secs ({cache_ttl}) must be <= token_ttl_secs ({token_ttl})"
        )));
    }

    Ok(MaasConfig {
        url,
        token_ttl: Duration::from_secs(token_ttl),
        cache_ttl: Duration::from_secs(cache_ttl),
        cleanup_interval: Duration::from_secs(cleanup),
    })
}

fn resolve_url(field: &str, value: &str) -> Result<String, ConfigError> {
    let resolved = resolve_variables(value)?;
    let trimmed = resolved.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::Validation(format!("{field} must not be empty")));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "{field} must be an http(s) URL, got \"{trimmed}\""
        )));
    }
    Ok(trimmed.to_string())
}
