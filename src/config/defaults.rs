// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

/// Minimum words before a sentence boundary may close a moderation chunk.
pub const DEFAULT_MIN_WORDS: usize = 10;

/// Word count at which a chunk is closed regardless of punctuation.
pub const DEFAULT_MAX_WORDS: usize = 30;

/// Capacity of the per-request moderation result channel.
pub const DEFAULT_RESULT_BUFFER: usize = 100;

/// Timeout applied to each moderation call.
pub const DEFAULT_MODERATION_TIMEOUT_MS: u64 = 10_000;

/// Shown to the user when the shield flags output without a reason.
pub const DEFAULT_VIOLATION_MESSAGE: &str =
    "This response was stopped because it may violate the content safety policy.";

pub const DEFAULT_TOKEN_TTL_SECS: u64 = 600;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 540;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
