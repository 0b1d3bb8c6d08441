// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Responsibilities:
// - Validate and translate create-response requests
// - Resolve the caller's model token when MaaS is configured
// - Stream responses through the moderation dispatcher
// - Uniform JSON error envelope
// - Health check

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use crate::config::Config;
use crate::maas::{ReqwestTokenIssuer, RequestIdentity};
use crate::safety::LlamaStackSafetyClient;
use crate::stream::{
    ModerationAdapter, RequestScope, ResponseData, ResponsesEventClassifier, SseWriter,
    StreamDispatcher, SSE_CHANNEL_CAPACITY,
};
use crate::token_cache::{InMemoryTokenCache, TokenCache, TokenResolver};
use crate::upstream::{
    ChatMessage, McpServer, ReqwestResponsesClient, ResponseParams, ResponsesClient,
    UpstreamError,
};

/// Route of the create-response endpoint.
pub const RESPONSES_PATH: &str = "/gen-ai/api/v1/responses";

/// Header carrying the authenticated user name.
pub const USER_HEADER: &str = "kubeflow-userid";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned to the client as `{"error":{"code","message"}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::ModelNotFound(model) => ApiError::ModelNotFound(model),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::ModelNotFound(model) => (
                StatusCode::NOT_FOUND,
                format!("model '{model}' was not found"),
            ),
            ApiError::Upstream(detail) => {
                error!(error = %detail, "upstream call failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "the server encountered a problem and could not process your request"
                        .to_string(),
                )
            }
        };
        let body = json!({"error": {"code": status.as_u16().to_string(), "message": message}});
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request body
// ---------------------------------------------------------------------------

/// Body of `POST /gen-ai/api/v1/responses`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateResponseRequest {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub instructions: Option<String>,
    #[serde(default)]
    pub vector_store_ids: Vec<String>,
    #[serde(default)]
    pub chat_context: Vec<ChatMessage>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServer>,
    pub previous_response_id: Option<String>,
    /// Shield run over the model's output. Empty disables moderation.
    #[serde(default)]
    pub output_shield_id: String,
}

impl CreateResponseRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.input.trim().is_empty() {
            return Err(ApiError::BadRequest("input is required".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ApiError::BadRequest("model is required".into()));
        }
        for (i, server) in self.mcp_servers.iter().enumerate() {
            if server.server_label.trim().is_empty() {
                return Err(ApiError::BadRequest(format!(
                    "mcp_servers[{i}]: server_label is required"
                )));
            }
            if server.server_url.trim().is_empty() {
                return Err(ApiError::BadRequest(format!(
                    "mcp_servers[{i}]: server_url is required"
                )));
            }
        }
        let has_previous = self
            .previous_response_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty());
        if has_previous && !self.chat_context.is_empty() {
            return Err(ApiError::BadRequest(
                "chat_context and previous_response_id cannot be used together".into(),
            ));
        }
        Ok(())
    }

    fn into_params(self, model_token: Option<String>) -> ResponseParams {
        ResponseParams {
            model: self.model,
            input: self.input,
            chat_context: self.chat_context,
            instructions: self.instructions,
            temperature: self.temperature,
            top_p: self.top_p,
            vector_store_ids: self.vector_store_ids,
            mcp_servers: self.mcp_servers,
            previous_response_id: self.previous_response_id.filter(|id| !id.trim().is_empty()),
            model_token,
        }
    }
}

/// Caller identity for token issuance. `None` unless namespace, user and
/// bearer credential are all present.
pub fn request_identity(
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Option<RequestIdentity> {
    let namespace = query.get("namespace").map(|s| s.trim()).filter(|s| !s.is_empty())?;
    let user = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    Some(RequestIdentity {
        namespace: namespace.to_string(),
        user: user.to_string(),
        credential: credential.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub responses: Arc<dyn ResponsesClient>,
    pub dispatcher: Arc<StreamDispatcher>,
    /// Present when MaaS token issuance is configured.
    pub tokens: Option<Arc<TokenResolver>>,
}

impl AppState {
    /// Wire the production clients from config. Also returns the token
    /// cache so the caller can run its periodic purge.
    pub fn from_config(config: &Config) -> (Self, Option<Arc<dyn TokenCache>>) {
        let client = reqwest::Client::new();

        let responses = ReqwestResponsesClient::new(client.clone(), &config.llama_stack.url)
            .with_timeout(config.llama_stack.timeout);
        let shield = LlamaStackSafetyClient::new(client.clone(), &config.llama_stack.url)
            .with_timeout(config.moderation.timeout);
        let adapter = ModerationAdapter::new(Arc::new(shield), config.moderation.on_failure)
            .with_timeout(config.moderation.timeout);
        let dispatcher = StreamDispatcher::new(
            Arc::new(ResponsesEventClassifier),
            Arc::new(adapter),
            &config.moderation,
        );

        let (tokens, cache) = match &config.maas {
            Some(maas) => {
                let cache: Arc<dyn TokenCache> = Arc::new(InMemoryTokenCache::new());
                let issuer = ReqwestTokenIssuer::new(client, &maas.url);
                let resolver = TokenResolver::new(
                    cache.clone(),
                    Arc::new(issuer),
                    maas.token_ttl,
                    maas.cache_ttl,
                );
                (Some(Arc::new(resolver)), Some(cache))
            }
            None => (None, None),
        };

        let state = Self {
            responses: Arc::new(responses),
            dispatcher: Arc::new(dispatcher),
            tokens,
        };
        (state, cache)
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Health check: GET /healthcheck -> 200 {"status":"available"}
pub async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({"status": "available"}))
}

/// Create a response, streamed through output moderation or returned whole.
pub async fn create_response(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("request body is empty".into()));
    }
    let request: CreateResponseRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?;
    request.validate()?;

    let model_token = match (&state.tokens, request_identity(&query, &headers)) {
        (Some(tokens), Some(identity)) => tokens.resolve(&identity, &request.model).await,
        _ => None,
    };

    let stream = request.stream;
    let shield_id = request.output_shield_id.trim().to_string();
    let params = request.into_params(model_token);

    if let Some(previous) = &params.previous_response_id {
        if let Err(e) = state.responses.get_response(previous).await {
            info!(previous_response_id = %previous, error = %e, "previous response lookup failed");
            return Err(ApiError::BadRequest(format!(
                "invalid previous response ID: {previous}"
            )));
        }
    }

    if !stream {
        let raw = state.responses.create_response(&params).await?;
        let mut data: ResponseData = serde_json::from_value(raw)
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;
        data.previous_response_id = params.previous_response_id.clone();
        return Ok((StatusCode::CREATED, Json(json!({"data": data}))).into_response());
    }

    let upstream = state.responses.create_response_stream(&params).await?;
    let scope = RequestScope::new(shield_id);
    info!(
        request_id = %scope.request_id,
        model = %params.model,
        shield_id = %scope.shield_id,
        "streaming response"
    );

    let (writer, rx) = SseWriter::channel(SSE_CHANNEL_CAPACITY);
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        dispatcher.run(scope, upstream, writer).await;
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Ok(sse_response(body))
}

fn sse_response(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router. All clients come in through `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route(RESPONSES_PATH, post(create_response))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
