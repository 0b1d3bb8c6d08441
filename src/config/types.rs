// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use super::defaults::*;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated BFF config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Config schema version. Always "v1".
    pub version: String,
    /// Environment label (e.g. "development", "production").
    pub environment: String,
    pub llama_stack: LlamaStackConfig,
    pub moderation: ModerationConfig,
    /// Token issuance is disabled when absent.
    pub maas: Option<MaasConfig>,
    /// SHA256 of the raw YAML: "sha256:{hex}".
    pub config_hash: String,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Where the Llama Stack responses and safety APIs live.
#[derive(Debug, Clone)]
pub struct LlamaStackConfig {
    /// Base URL with no trailing slash.
    pub url: String,
    /// Per-request timeout for non-streaming calls.
    pub timeout: Option<Duration>,
}

/// Streaming output moderation tuning.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// "open" treats a failed moderation call as safe; "closed" as unsafe.
    pub on_failure: FailureMode,
    pub min_words: usize,
    pub max_words: usize,
    /// Capacity of the per-request result channel.
    pub result_buffer: usize,
    pub timeout: Duration,
    /// Reason shown to the user when the shield gives none.
    pub violation_message: String,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            on_failure: FailureMode::Open,
            min_words: DEFAULT_MIN_WORDS,
            max_words: DEFAULT_MAX_WORDS,
            result_buffer: DEFAULT_RESULT_BUFFER,
            timeout: Duration::from_millis(DEFAULT_MODERATION_TIMEOUT_MS),
            violation_message: DEFAULT_VIOLATION_MESSAGE.to_string(),
        }
    }
}

/// What a moderation infrastructure failure resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Open,
    Closed,
}

/// Model-as-a-Service token issuance and caching.
#[derive(Debug, Clone)]
pub struct MaasConfig {
    pub url: String,
    /// Lifetime requested from the issuer.
    pub token_ttl: Duration,
    /// How long an issued token is reused from the cache.
    pub cache_ttl: Duration,
    /// Interval of the background purge of expired entries.
    pub cleanup_interval: Duration,
}
