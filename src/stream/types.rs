// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Canonical downstream events, moderation chunks, per-chunk verdicts,
// and the outcomes a streamed request can end with.

use serde::{Deserialize, Serialize};

use super::moderation::ModerationError;

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// The closed set of upstream event types forwarded to the client.
/// Everything else is dropped by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Start marker; carries response id and model.
    #[serde(rename = "response.created")]
    ResponseCreated,
    /// Structural event with no user-visible text.
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded,
    /// Text chunk carrying `delta`.
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta,
    /// Part terminator; moderation barrier.
    #[serde(rename = "response.content_part.done")]
    ContentPartDone,
    /// Stream terminator; moderation barrier.
    #[serde(rename = "response.completed")]
    ResponseCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ResponseCreated => "response.created",
            EventKind::ContentPartAdded => "response.content_part.added",
            EventKind::OutputTextDelta => "response.output_text.delta",
            EventKind::ContentPartDone => "response.content_part.done",
            EventKind::ResponseCompleted => "response.completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "response.created" => Some(EventKind::ResponseCreated),
            "response.content_part.added" => Some(EventKind::ContentPartAdded),
            "response.output_text.delta" => Some(EventKind::OutputTextDelta),
            "response.content_part.done" => Some(EventKind::ContentPartDone),
            "response.completed" => Some(EventKind::ResponseCompleted),
            _ => None,
        }
    }

    /// Barrier events are held until every earlier chunk has been released.
    pub fn is_barrier(&self) -> bool {
        matches!(self, EventKind::ContentPartDone | EventKind::ResponseCompleted)
    }
}

// ---------------------------------------------------------------------------
// Downstream event schema
// ---------------------------------------------------------------------------

/// One event as written to the client: `data: <json>\n\n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub sequence_number: i64,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub output_index: i64,
    /// Present only on `response.output_text.delta`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    /// Present only on `response.created` and `response.completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseData>,
}

impl StreamEvent {
    /// Delta text, or "" for events that carry none.
    pub fn delta_text(&self) -> &str {
        self.delta.as_deref().unwrap_or("")
    }
}

/// Response object embedded in `response.created` / `response.completed`,
/// and returned as-is for non-streaming requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardrail_triggered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Moderation chunks
// ---------------------------------------------------------------------------

/// Where a registered chunk is in its moderation lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStatus {
    /// Moderation scheduled, no verdict yet.
    Scheduled,
    /// Moderated and safe; releasable once every earlier chunk is out.
    Safe,
    /// Moderated and flagged. Terminal; the reason lives on the engine.
    Flagged,
}

/// A contiguous run of text deltas moderated as one unit.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Per-request creation order, starting at 0.
    pub seq: u64,
    /// Buffered `output_text.delta` events, in upstream order.
    pub events: Vec<StreamEvent>,
    /// Concatenated delta text.
    pub text: String,
    pub status: ChunkStatus,
}

impl Chunk {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            events: Vec::new(),
            text: String::new(),
            status: ChunkStatus::Scheduled,
        }
    }

    /// Append a delta event and its text.
    pub fn push(&mut self, event: StreamEvent) {
        self.text.push_str(event.delta_text());
        self.events.push(event);
    }

    pub fn is_moderated(&self) -> bool {
        self.status != ChunkStatus::Scheduled
    }
}

/// Verdict for one chunk, as delivered to the engine's result loop.
#[derive(Debug)]
pub struct ModerationResult {
    pub seq: u64,
    pub safe: bool,
    /// Detection reason; empty when safe or when the shield gave none.
    pub reason: String,
    /// Set when the verdict came from the failure policy, not the shield.
    pub infrastructure_error: Option<ModerationError>,
}

// ---------------------------------------------------------------------------
// Outcomes and errors
// ---------------------------------------------------------------------------

/// How a streamed request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Upstream ended and everything was released.
    Completed,
    /// A chunk was flagged; the violation sequence was written.
    Violation { reason: String },
    /// The client went away; nothing further was written.
    Disconnected,
    /// Upstream failed mid-stream; the terminal error record was written.
    UpstreamError,
}

/// Why waiting for the engine to drain stopped early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrainError {
    #[error("output flagged by moderation: {0:?}")]
    Violation(String),
    #[error("moderation cancelled")]
    Cancelled,
}
