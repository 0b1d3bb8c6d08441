// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Upstream Responses API client
//
// Opens streaming and non-streaming responses against the Llama Stack
// server and decodes its SSE body into raw JSON events for the dispatcher.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Header carrying per-request provider credentials to Llama Stack.
pub const PROVIDER_DATA_HEADER: &str = "x-llamastack-provider-data";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl UpstreamError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Request parameters
// ---------------------------------------------------------------------------

/// One prior conversation turn sent as input context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// An MCP server exposed to the model as a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServer {
    #[serde(default)]
    pub server_label: String,
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Parameters for creating a response.
#[derive(Debug, Clone, Default)]
pub struct ResponseParams {
    pub model: String,
    pub input: String,
    pub chat_context: Vec<ChatMessage>,
    pub instructions: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub vector_store_ids: Vec<String>,
    pub mcp_servers: Vec<McpServer>,
    pub previous_response_id: Option<String>,
    /// Model-serving token injected through the provider data header.
    pub model_token: Option<String>,
}

impl ResponseParams {
    /// Request body for `POST /v1/openai/v1/responses`.
    pub fn to_body(&self, stream: bool) -> Value {
        let input = if self.chat_context.is_empty() {
            Value::String(self.input.clone())
        } else {
            let mut items: Vec<Value> = self
                .chat_context
                .iter()
                .map(|m| {
                    let role = match m.role.as_str() {
                        "user" | "assistant" | "system" => m.role.as_str(),
                        _ => "user",
                    };
                    serde_json::json!({"type": "message", "role": role, "content": m.content})
                })
                .collect();
            items.push(serde_json::json!({"type": "message", "role": "user", "content": self.input}));
            Value::Array(items)
        };

        let mut body = serde_json::json!({
            "model": self.model,
            "input": input,
            "stream": stream,
            "store": true,
        });
        let Some(obj) = body.as_object_mut() else {
            return body;
        };
        if let Some(instructions) = &self.instructions {
            obj.insert("instructions".into(), Value::String(instructions.clone()));
        }
        if let Some(t) = self.temperature {
            obj.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(p) = self.top_p {
            obj.insert("top_p".into(), serde_json::json!(p));
        }
        let mut tools = Vec::new();
        if !self.vector_store_ids.is_empty() {
            tools.push(serde_json::json!({
                "type": "file_search",
                "vector_store_ids": self.vector_store_ids,
            }));
        }
        for server in &self.mcp_servers {
            tools.push(serde_json::json!({
                "type": "mcp",
                "server_label": server.server_label,
                "server_url": server.server_url,
                "headers": server.headers,
            }));
        }
        if !tools.is_empty() {
            obj.insert("tools".into(), Value::Array(tools));
        }
        if let Some(prev) = &self.previous_response_id {
            obj.insert("previous_response_id".into(), Value::String(prev.clone()));
        }
        body
    }

    /// Value of the provider data header, when a token is present.
    pub fn provider_data(&self) -> Option<String> {
        self.model_token
            .as_ref()
            .map(|token| serde_json::json!({"vllm_api_token": token}).to_string())
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// An open upstream event stream.
///
/// `next_event` yields raw JSON events until the stream ends (`None`) or
/// fails (`Some(Err)`, after which the stream is finished).
#[async_trait]
pub trait UpstreamStream: Send {
    async fn next_event(&mut self) -> Option<Result<Value, UpstreamError>>;
    async fn close(&mut self);
}

/// Creates responses on the model server.
#[async_trait]
pub trait ResponsesClient: Send + Sync {
    async fn create_response_stream(
        &self,
        params: &ResponseParams,
    ) -> Result<Box<dyn UpstreamStream>, UpstreamError>;

    async fn create_response(&self, params: &ResponseParams) -> Result<Value, UpstreamError>;

    /// Fetch a stored response by id.
    async fn get_response(&self, response_id: &str) -> Result<Value, UpstreamError>;
}

// ---------------------------------------------------------------------------
// SSE decoding
// ---------------------------------------------------------------------------

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

/// Decodes an SSE byte stream into JSON events.
///
/// `data:` lines accumulate until a blank line. Comments and other fields
/// are ignored, `[DONE]` ends the stream, and payloads that are not JSON
/// are skipped.
pub struct SseEventStream {
    bytes: Option<ByteStream>,
    buffer: BytesMut,
    data: String,
    finished: bool,
}

impl SseEventStream {
    pub fn new(bytes: impl Stream<Item = Result<Bytes, UpstreamError>> + Send + 'static) -> Self {
        Self {
            bytes: Some(Box::pin(bytes)),
            buffer: BytesMut::new(),
            data: String::new(),
            finished: false,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let line = self.buffer.split_to(pos + 1);
        let text = String::from_utf8_lossy(&line);
        Some(text.trim_end_matches(|c| c == '\n' || c == '\r').to_string())
    }

    /// Feed one line; returns a finished event payload on a blank line.
    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.data));
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
        None
    }

    /// Turn a payload into an event. `Err(())` means the stream is done.
    fn decode(&mut self, payload: String) -> Result<Option<Value>, ()> {
        if payload.trim() == "[DONE]" {
            return Err(());
        }
        match serde_json::from_str::<Value>(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                debug!(error = %err, "skipping unparseable upstream event");
                Ok(None)
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.bytes = None;
    }
}

#[async_trait]
impl UpstreamStream for SseEventStream {
    async fn next_event(&mut self) -> Option<Result<Value, UpstreamError>> {
        loop {
            if self.finished {
                return None;
            }
            while let Some(line) = self.next_line() {
                if let Some(payload) = self.accept_line(&line) {
                    match self.decode(payload) {
                        Ok(Some(value)) => return Some(Ok(value)),
                        Ok(None) => {}
                        Err(()) => {
                            self.finish();
                            return None;
                        }
                    }
                }
            }

            let next = match self.bytes.as_mut() {
                Some(bytes) => bytes.next().await,
                None => None,
            };
            match next {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    self.finish();
                    return Some(Err(err));
                }
                None => {
                    // Flush a trailing event that lacked its blank line.
                    let tail = std::mem::take(&mut self.buffer);
                    let tail = String::from_utf8_lossy(&tail).to_string();
                    let mut payload = None;
                    for line in tail.lines() {
                        payload = self.accept_line(line).or(payload);
                    }
                    let payload = payload.or_else(|| self.accept_line(""));
                    self.finish();
                    if let Some(payload) = payload {
                        if let Ok(Some(value)) = self.decode(payload) {
                            return Some(Ok(value));
                        }
                    }
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        self.finish();
    }
}

// ---------------------------------------------------------------------------
// Reqwest client
// ---------------------------------------------------------------------------

pub struct ReqwestResponsesClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl ReqwestResponsesClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/openai/v1/responses", self.base_url.trim_end_matches('/'))
    }

    async fn post(
        &self,
        params: &ResponseParams,
        stream: bool,
    ) -> Result<reqwest::Response, UpstreamError> {
        let mut req = self.client.post(self.endpoint()).json(&params.to_body(stream));
        if stream {
            req = req.header(reqwest::header::ACCEPT, "text/event-stream");
        }
        if let Some(provider_data) = params.provider_data() {
            req = req.header(PROVIDER_DATA_HEADER, provider_data);
        }
        // A streaming timeout would cut the body off mid-response.
        if let (Some(timeout), false) = (self.timeout, stream) {
            req = req.timeout(timeout);
        }

        let resp = req.send().await.map_err(UpstreamError::from_reqwest)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), body, &params.model))
    }
}

/// Map a failed status to an error, spotting unknown-model answers.
pub fn classify_status(status: u16, body: String, model: &str) -> UpstreamError {
    let lower = body.to_ascii_lowercase();
    let mentions_missing_model = lower.contains("not found") && lower.contains("model");
    if status == 404 || (status == 400 && mentions_missing_model) {
        return UpstreamError::ModelNotFound(model.to_string());
    }
    UpstreamError::Status { status, body }
}

#[async_trait]
impl ResponsesClient for ReqwestResponsesClient {
    async fn create_response_stream(
        &self,
        params: &ResponseParams,
    ) -> Result<Box<dyn UpstreamStream>, UpstreamError> {
        let resp = self.post(params, true).await?;
        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(UpstreamError::from_reqwest));
        Ok(Box::new(SseEventStream::new(bytes)))
    }

    async fn create_response(&self, params: &ResponseParams) -> Result<Value, UpstreamError> {
        let resp = self.post(params, false).await?;
        resp.json::<Value>()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
    }

    async fn get_response(&self, response_id: &str) -> Result<Value, UpstreamError> {
        let url = format!("{}/{}", self.endpoint(), response_id);
        let mut req = self.client.get(url);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await.map_err(UpstreamError::from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
    }
}
