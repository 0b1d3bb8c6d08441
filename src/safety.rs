// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Llama Stack shield client
//
// Runs a shield over assistant output through `POST /v1/safety/run-shield`
// and parses the answer into a ModerationVerdict.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::stream::{ModerationError, ModerationService, ModerationVerdict};

/// Path inside `violation` where the detection type lives.
pub const REASON_PATH: [&str; 2] = ["metadata", "violation_type"];

#[derive(Debug, Deserialize)]
struct RunShieldResponse {
    #[serde(default)]
    violation: Option<ShieldViolation>,
}

#[derive(Debug, Deserialize)]
struct ShieldViolation {
    #[serde(default)]
    violation_level: Option<String>,
}

/// Parse a run-shield response body.
///
/// - `violation` null or absent -> not flagged
/// - `violation_level: "info"` -> not flagged (advisory only)
/// - otherwise flagged, with `metadata.violation_type` as the reason when it
///   is a non-empty string
///
/// Unknown fields are ignored.
pub fn parse_verdict(body: &Value) -> Result<ModerationVerdict, ModerationError> {
    let parsed = RunShieldResponse::deserialize(body)
        .map_err(|e| ModerationError::InvalidResponse(e.to_string()))?;

    let Some(violation) = parsed.violation else {
        return Ok(ModerationVerdict::NotFlagged);
    };
    if violation.violation_level.as_deref() == Some("info") {
        return Ok(ModerationVerdict::NotFlagged);
    }

    let reason = REASON_PATH
        .iter()
        .try_fold(&body["violation"], |v, key| v.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok(ModerationVerdict::Flagged { reason })
}

pub struct LlamaStackSafetyClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl LlamaStackSafetyClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl ModerationService for LlamaStackSafetyClient {
    async fn moderate(
        &self,
        text: &str,
        shield_id: &str,
    ) -> Result<ModerationVerdict, ModerationError> {
        let url = format!("{}/v1/safety/run-shield", self.base_url.trim_end_matches('/'));
        let body = json!({
            "shield_id": shield_id,
            "messages": [{"role": "assistant", "content": text}],
            "params": {},
        });

        let mut req = self.client.post(url).json(&body);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ModerationError::Timeout(self.timeout.unwrap_or_default())
            } else {
                ModerationError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| ModerationError::InvalidResponse(e.to_string()))?;
        parse_verdict(&value)
    }
}
