// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Moderation adapter
//
// Transport (ModerationService) and failure policy (FailureMode) are kept
// apart: the service reports a verdict or an error, the adapter turns that
// into a per-chunk ModerationResult.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::types::ModerationResult;
use crate::config::FailureMode;

// ---------------------------------------------------------------------------
// Service boundary
// ---------------------------------------------------------------------------

/// Infrastructure failures of a moderation call. Never surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModerationError {
    #[error("moderation request failed: {0}")]
    Transport(String),
    #[error("moderation call timed out after {0:?}")]
    Timeout(Duration),
    #[error("moderation service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid moderation response: {0}")]
    InvalidResponse(String),
}

/// What the shield said about a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    NotFlagged,
    /// `reason` is the detection type when the shield reported one.
    Flagged { reason: Option<String> },
}

/// Runs a shield over a piece of model output.
#[async_trait]
pub trait ModerationService: Send + Sync {
    async fn moderate(&self, text: &str, shield_id: &str)
        -> Result<ModerationVerdict, ModerationError>;
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Applies the timeout and failure policy around a ModerationService.
pub struct ModerationAdapter {
    service: Arc<dyn ModerationService>,
    on_failure: FailureMode,
    timeout: Option<Duration>,
}

impl ModerationAdapter {
    pub fn new(service: Arc<dyn ModerationService>, on_failure: FailureMode) -> Self {
        Self {
            service,
            on_failure,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Moderate one chunk's text.
    ///
    /// Whitespace-only text is safe without a service call. An error becomes
    /// safe under `FailureMode::Open` and unsafe with an empty reason under
    /// `FailureMode::Closed`; either way the error is attached to the result.
    pub async fn check(&self, seq: u64, text: &str, shield_id: &str) -> ModerationResult {
        if text.trim().is_empty() {
            return ModerationResult {
                seq,
                safe: true,
                reason: String::new(),
                infrastructure_error: None,
            };
        }

        let call = self.service.moderate(text, shield_id);
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(ModerationError::Timeout(limit))),
            None => call.await,
        };

        match outcome {
            Ok(ModerationVerdict::NotFlagged) => ModerationResult {
                seq,
                safe: true,
                reason: String::new(),
                infrastructure_error: None,
            },
            Ok(ModerationVerdict::Flagged { reason }) => ModerationResult {
                seq,
                safe: false,
                reason: reason.unwrap_or_default(),
                infrastructure_error: None,
            },
            Err(err) => ModerationResult {
                seq,
                safe: self.on_failure == FailureMode::Open,
                reason: String::new(),
                infrastructure_error: Some(err),
            },
        }
    }
}
