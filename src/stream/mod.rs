// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Streaming output moderation
//
// Responsibilities:
// - Classify upstream Responses events, dropping unsupported types
// - Group text deltas into chunks at sentence or size boundaries
// - Moderate chunks concurrently with continued generation
// - Release moderated chunks to the client strictly in order
// - Replace the rest of the response with a violation sequence when a
//   chunk is flagged
// - Stop all per-request work on client disconnect

mod classifier;
mod dispatcher;
mod engine;
mod moderation;
mod segmenter;
mod types;
mod writer;

pub use classifier::{EventClassifier, ResponsesEventClassifier};
pub use dispatcher::{violation_events, RequestScope, RequestState, StreamDispatcher};
pub use engine::ModerationEngine;
pub use moderation::{ModerationAdapter, ModerationError, ModerationService, ModerationVerdict};
pub use segmenter::{count_words, Segmenter};
pub use types::{
    Chunk, ChunkStatus, DrainError, EventKind, ModerationResult, ResponseData, StreamEvent,
    StreamOutcome,
};
pub use writer::{encode_record, error_record, ClientDisconnected, SseWriter, SSE_CHANNEL_CAPACITY};
