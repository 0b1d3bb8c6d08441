// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Streaming dispatcher
//
// Per-request driver: pulls upstream events, classifies them, builds
// moderation chunks, forwards structural events, and ends the stream on
// completion, violation, disconnect, or upstream failure.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::classifier::EventClassifier;
use super::engine::ModerationEngine;
use super::moderation::ModerationAdapter;
use super::segmenter::{count_words, Segmenter};
use super::types::{Chunk, DrainError, EventKind, ResponseData, StreamEvent, StreamOutcome};
use super::writer::SseWriter;
use crate::config::ModerationConfig;
use crate::upstream::UpstreamStream;

// ---------------------------------------------------------------------------
// Request scope and state
// ---------------------------------------------------------------------------

/// Values scoped to one streamed request, handed explicitly to the engine
/// and its moderation tasks.
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub request_id: String,
    /// Empty means output moderation is off.
    pub shield_id: String,
    /// Cancelled when the client goes away.
    pub cancel: CancellationToken,
}

impl RequestScope {
    pub fn new(shield_id: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            shield_id: shield_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn moderation_enabled(&self) -> bool {
        !self.shield_id.trim().is_empty()
    }
}

/// What the dispatcher remembers about the stream so far.
#[derive(Debug, Default)]
pub struct RequestState {
    pub response_id: String,
    pub response_model: String,
    pub current_item_id: String,
    pub last_seq_seen: i64,
    pub shield_id: String,
    /// Chunk under construction; not yet known to the engine's map.
    pub current_chunk: Option<Chunk>,
    pub word_count: usize,
}

impl RequestState {
    pub fn new(shield_id: &str) -> Self {
        Self {
            shield_id: shield_id.to_string(),
            ..Self::default()
        }
    }
}

/// The three records that replace the rest of a flagged response.
///
/// `message` is shown to the user; `reason` is reported verbatim in the
/// completed response and may be empty.
pub fn violation_events(state: &RequestState, reason: &str, message: &str) -> [StreamEvent; 3] {
    let delta = StreamEvent {
        kind: EventKind::OutputTextDelta,
        sequence_number: state.last_seq_seen + 1,
        item_id: state.current_item_id.clone(),
        output_index: 0,
        delta: Some(message.to_string()),
        response: None,
    };
    let part_done = StreamEvent {
        kind: EventKind::ContentPartDone,
        sequence_number: state.last_seq_seen + 2,
        item_id: state.current_item_id.clone(),
        output_index: 0,
        delta: None,
        response: None,
    };
    let completed = StreamEvent {
        kind: EventKind::ResponseCompleted,
        sequence_number: state.last_seq_seen + 3,
        item_id: String::new(),
        output_index: 0,
        delta: None,
        response: Some(ResponseData {
            id: state.response_id.clone(),
            model: state.response_model.clone(),
            status: "completed".to_string(),
            created_at: 0,
            output: vec![json!({
                "id": state.current_item_id,
                "type": "message",
                "role": "assistant",
                "status": "completed",
                "content": [{"type": "output_text", "text": message}],
            })],
            previous_response_id: None,
            guardrail_triggered: Some(true),
            violation_reason: Some(reason.to_string()),
        }),
    };
    [delta, part_done, completed]
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Drives one streamed response from upstream to the client.
pub struct StreamDispatcher {
    classifier: Arc<dyn EventClassifier>,
    adapter: Arc<ModerationAdapter>,
    segmenter: Segmenter,
    result_buffer: usize,
    violation_message: String,
}

impl StreamDispatcher {
    pub fn new(
        classifier: Arc<dyn EventClassifier>,
        adapter: Arc<ModerationAdapter>,
        config: &ModerationConfig,
    ) -> Self {
        Self {
            classifier,
            adapter,
            segmenter: Segmenter::from_config(config),
            result_buffer: config.result_buffer,
            violation_message: config.violation_message.clone(),
        }
    }

    /// Run the stream to its end. The upstream is closed before returning and
    /// every task spawned for the request has been joined.
    pub async fn run(
        &self,
        scope: RequestScope,
        mut upstream: Box<dyn UpstreamStream>,
        writer: SseWriter,
    ) -> StreamOutcome {
        let outcome = if scope.moderation_enabled() {
            let mut engine = ModerationEngine::start(
                &scope,
                self.adapter.clone(),
                writer.clone(),
                self.result_buffer,
            );
            let mut state = RequestState::new(&scope.shield_id);
            let outcome = self
                .run_moderated(&scope, upstream.as_mut(), &writer, &mut engine, &mut state)
                .await;
            engine.shutdown().await;
            outcome
        } else {
            self.run_passthrough(&scope, upstream.as_mut(), &writer).await
        };
        upstream.close().await;
        info!(request_id = %scope.request_id, outcome = ?outcome, "stream finished");
        outcome
    }

    async fn run_passthrough(
        &self,
        scope: &RequestScope,
        upstream: &mut dyn UpstreamStream,
        writer: &SseWriter,
    ) -> StreamOutcome {
        loop {
            let item = tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => return disconnected(scope),
                _ = writer.closed() => return disconnected(scope),
                item = upstream.next_event() => item,
            };
            let raw = match item {
                None => return StreamOutcome::Completed,
                Some(Ok(raw)) => raw,
                Some(Err(err)) => {
                    error!(request_id = %scope.request_id, error = %err, "upstream stream failed");
                    let _ = writer.write_error().await;
                    return StreamOutcome::UpstreamError;
                }
            };
            let Some(event) = self.classifier.classify(&raw) else {
                continue;
            };
            if writer.write_event(&event).await.is_err() {
                return disconnected(scope);
            }
        }
    }

    async fn run_moderated(
        &self,
        scope: &RequestScope,
        upstream: &mut dyn UpstreamStream,
        writer: &SseWriter,
        engine: &mut ModerationEngine,
        state: &mut RequestState,
    ) -> StreamOutcome {
        loop {
            let item = tokio::select! {
                biased;
                _ = engine.cancelled() => return self.halt(scope, engine, state, writer).await,
                _ = writer.closed() => return disconnected(scope),
                item = upstream.next_event() => item,
            };
            let raw = match item {
                None => break,
                Some(Ok(raw)) => raw,
                Some(Err(err)) => {
                    error!(request_id = %scope.request_id, error = %err, "upstream stream failed");
                    // Release what was already moderated before the error record.
                    finalise(engine, state);
                    if let Err(outcome) = self.drain(scope, engine, state, writer).await {
                        return outcome;
                    }
                    let _ = writer.write_error().await;
                    return StreamOutcome::UpstreamError;
                }
            };
            let Some(event) = self.classifier.classify(&raw) else {
                continue;
            };

            if event.kind == EventKind::ResponseCreated {
                if let Some(response) = &event.response {
                    state.response_id = response.id.clone();
                    state.response_model = response.model.clone();
                }
                if let Err(outcome) = self.forward(scope, engine, state, writer, &event).await {
                    return outcome;
                }
                continue;
            }

            if !event.item_id.is_empty() {
                state.current_item_id = event.item_id.clone();
            }
            state.last_seq_seen = event.sequence_number;

            match event.kind {
                EventKind::OutputTextDelta => {
                    if event.delta_text().is_empty() {
                        continue;
                    }
                    let words = count_words(event.delta_text());
                    let chunk = state
                        .current_chunk
                        .get_or_insert_with(|| engine.create_chunk());
                    chunk.push(event);
                    state.word_count += words;
                    if self.segmenter.is_ready(&chunk.text, state.word_count) {
                        finalise(engine, state);
                    }
                }
                EventKind::ContentPartAdded => {
                    finalise(engine, state);
                    if let Err(outcome) = self.forward(scope, engine, state, writer, &event).await {
                        return outcome;
                    }
                }
                kind if kind.is_barrier() => {
                    finalise(engine, state);
                    if let Err(outcome) = self.drain(scope, engine, state, writer).await {
                        return outcome;
                    }
                    if let Err(outcome) = self.forward(scope, engine, state, writer, &event).await {
                        return outcome;
                    }
                }
                _ => {}
            }
        }

        finalise(engine, state);
        match self.drain(scope, engine, state, writer).await {
            Ok(()) => StreamOutcome::Completed,
            Err(outcome) => outcome,
        }
    }

    /// Block until the engine has released every registered chunk.
    async fn drain(
        &self,
        scope: &RequestScope,
        engine: &ModerationEngine,
        state: &RequestState,
        writer: &SseWriter,
    ) -> Result<(), StreamOutcome> {
        let drained = tokio::select! {
            drained = engine.wait_for_drain() => drained,
            _ = writer.closed() => Err(DrainError::Cancelled),
        };
        match drained {
            Ok(()) => Ok(()),
            Err(DrainError::Violation(reason)) => {
                Err(self.emit_violation(scope, state, writer, reason).await)
            }
            Err(DrainError::Cancelled) => Err(self.halt(scope, engine, state, writer).await),
        }
    }

    /// Write one event unless the request has already been stopped. The check
    /// happens under the writer lock, so nothing slips out after a violation.
    async fn forward(
        &self,
        scope: &RequestScope,
        engine: &ModerationEngine,
        state: &RequestState,
        writer: &SseWriter,
        event: &StreamEvent,
    ) -> Result<(), StreamOutcome> {
        let written = {
            let mut out = writer.lock().await;
            if engine.is_cancelled() {
                None
            } else {
                Some(out.write_event(event).await)
            }
        };
        match written {
            Some(Ok(())) => Ok(()),
            Some(Err(_)) => Err(disconnected(scope)),
            None => Err(self.halt(scope, engine, state, writer).await),
        }
    }

    /// The engine was cancelled: a violation if one was recorded, otherwise
    /// the client went away.
    async fn halt(
        &self,
        scope: &RequestScope,
        engine: &ModerationEngine,
        state: &RequestState,
        writer: &SseWriter,
    ) -> StreamOutcome {
        match engine.violation() {
            Some(reason) => self.emit_violation(scope, state, writer, reason).await,
            None => disconnected(scope),
        }
    }

    async fn emit_violation(
        &self,
        scope: &RequestScope,
        state: &RequestState,
        writer: &SseWriter,
        reason: String,
    ) -> StreamOutcome {
        info!(
            request_id = %scope.request_id,
            shield_id = %scope.shield_id,
            reason = %reason,
            "output blocked by guardrails"
        );
        let message = if reason.trim().is_empty() {
            self.violation_message.as_str()
        } else {
            reason.as_str()
        };
        let events = violation_events(state, &reason, message);
        // Best effort: the client may already be gone.
        let _ = writer.lock().await.write_events(&events).await;
        StreamOutcome::Violation { reason }
    }
}

/// Register the chunk under construction, if any, and reset the word count.
fn finalise(engine: &mut ModerationEngine, state: &mut RequestState) {
    if let Some(chunk) = state.current_chunk.take() {
        engine.register(chunk);
    }
    state.word_count = 0;
}

fn disconnected(scope: &RequestScope) -> StreamOutcome {
    info!(request_id = %scope.request_id, "client disconnected, stopping stream processing");
    scope.cancel.cancel();
    StreamOutcome::Disconnected
}
