// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal).
// Kept apart from the public Config so interpolation and validation happen
// between parsing and building the typed structs.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub bff: String,
    pub environment: Option<String>,
    pub llama_stack: RawLlamaStackConfig,
    pub moderation: Option<RawModerationConfig>,
    pub maas: Option<RawMaasConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RawLlamaStackConfig {
    pub url: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RawModerationConfig {
    pub on_failure: Option<String>,
    pub min_words: Option<usize>,
    pub max_words: Option<usize>,
    pub result_buffer: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub violation_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawMaasConfig {
    pub url: String,
    pub token_ttl_secs: Option<u64>,
    pub cache_ttl_secs: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
}
