// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Model-as-a-Service token issuer
//
// Exchanges the caller's bearer credential for a short-lived model serving
// token. Only called on a token cache miss.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaasError {
    #[error("token request failed: {0}")]
    Transport(String),
    #[error("token issuer returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
    #[error("token issuer returned an empty token")]
    EmptyToken,
}

/// Who a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
    pub namespace: String,
    pub user: String,
    /// Bearer credential of the caller, without the `Bearer ` prefix.
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues model serving tokens.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, identity: &RequestIdentity, ttl: Duration)
        -> Result<IssuedToken, MaasError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(default)]
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

pub struct ReqwestTokenIssuer {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTokenIssuer {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TokenIssuer for ReqwestTokenIssuer {
    async fn issue(
        &self,
        identity: &RequestIdentity,
        ttl: Duration,
    ) -> Result<IssuedToken, MaasError> {
        let url = format!("{}/v1/tokens", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&identity.credential)
            .json(&json!({"expiration": format!("{}s", ttl.as_secs())}))
            .send()
            .await
            .map_err(|e| MaasError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MaasError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| MaasError::InvalidResponse(e.to_string()))?;
        if parsed.token.trim().is_empty() {
            return Err(MaasError::EmptyToken);
        }
        let fallback = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(IssuedToken {
            token: parsed.token,
            expires_at: parsed.expires_at.unwrap_or_else(|| Utc::now() + fallback),
        })
    }
}
