// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Event classifier
//
// Normalises raw upstream Responses API events into the canonical
// StreamEvent shape and drops every type outside the supported set.

use serde::Deserialize;
use serde_json::Value;

use super::types::{EventKind, ResponseData, StreamEvent};

// ---------------------------------------------------------------------------
// Trait: EventClassifier
// ---------------------------------------------------------------------------

/// Decides whether an upstream event is forwarded, and in what shape.
///
/// Implementations must not mutate the input.
pub trait EventClassifier: Send + Sync {
    fn classify(&self, raw: &Value) -> Option<StreamEvent>;
}

// ---------------------------------------------------------------------------
// Responses API classifier
// ---------------------------------------------------------------------------

/// Classifies Llama Stack / OpenAI Responses streaming events.
///
/// - `{"type":"response.output_text.delta","sequence_number":4,"item_id":"msg_1","delta":"Hi"}` -> delta
/// - `{"type":"response.created","response":{"id":"resp_1","model":"m"}}` -> created, with metadata
/// - `{"type":"response.output_item.added",...}` -> dropped
/// - anything without a string `type` -> dropped
pub struct ResponsesEventClassifier;

impl EventClassifier for ResponsesEventClassifier {
    fn classify(&self, raw: &Value) -> Option<StreamEvent> {
        let kind = raw.get("type").and_then(Value::as_str).and_then(EventKind::parse)?;

        let sequence_number = raw
            .get("sequence_number")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let item_id = raw
            .get("item_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let output_index = raw.get("output_index").and_then(Value::as_i64).unwrap_or(0);

        let delta = match kind {
            EventKind::OutputTextDelta => Some(
                raw.get("delta")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => None,
        };

        let response = match kind {
            EventKind::ResponseCreated | EventKind::ResponseCompleted => raw
                .get("response")
                .and_then(|r| ResponseData::deserialize(r).ok()),
            _ => None,
        };

        Some(StreamEvent {
            kind,
            sequence_number,
            item_id,
            output_index,
            delta,
            response,
        })
    }
}
