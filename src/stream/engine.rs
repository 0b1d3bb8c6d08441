// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Async moderation engine
//
// Owns the per-request chunk log. Each registered chunk gets one moderation
// task; verdicts come back over a bounded channel in arrival order and a
// single result loop releases the contiguous safe prefix downstream.
//
// Locking: the release path takes the writer lock, then the state lock, and
// drops the state lock before writing. Nothing takes them in the other
// order, and the state lock is never held across an await. Because chunks
// leave the map only while the writer lock is held, anyone who observes an
// empty map and then writes is ordered after the released records.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use super::dispatcher::RequestScope;
use super::moderation::ModerationAdapter;
use super::types::{Chunk, ChunkStatus, DrainError, ModerationResult};
use super::writer::SseWriter;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct EngineState {
    /// Registered, unreleased chunks keyed by seq.
    chunks: BTreeMap<u64, Chunk>,
    /// Smallest seq not yet released.
    next_to_send: u64,
    /// Seq for the next created chunk.
    next_seq: u64,
    /// Reason of the first flagged chunk.
    violation: Option<String>,
}

impl EngineState {
    fn take_ready_prefix(&mut self) -> Vec<Chunk> {
        let mut ready = Vec::new();
        while self
            .chunks
            .get(&self.next_to_send)
            .is_some_and(|c| c.status == ChunkStatus::Safe)
        {
            if let Some(chunk) = self.chunks.remove(&self.next_to_send) {
                ready.push(chunk);
            }
            self.next_to_send += 1;
        }
        ready
    }
}

struct EngineInner {
    state: Mutex<EngineState>,
    writer: SseWriter,
    cancel: CancellationToken,
    progress: Notify,
    request_id: String,
    shield_id: String,
}

impl EngineInner {
    /// A panicking holder leaves the map consistent: every mutation is a
    /// single insert, remove, or field store.
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn apply_result(&self, result: ModerationResult) -> ControlFlow<()> {
        let seq = result.seq;
        if let Some(err) = &result.infrastructure_error {
            warn!(
                request_id = %self.request_id,
                shield_id = %self.shield_id,
                seq,
                error = %err,
                treated_as_safe = result.safe,
                "moderation call failed, applying failure policy"
            );
        }

        let mut out = self.writer.lock().await;
        if self.cancel.is_cancelled() {
            return ControlFlow::Break(());
        }

        let released = {
            let mut state = self.lock_state();
            match state.chunks.get_mut(&seq) {
                None => {
                    debug!(request_id = %self.request_id, seq, "result for unknown chunk ignored");
                    return ControlFlow::Continue(());
                }
                Some(chunk) if chunk.is_moderated() => {
                    warn!(request_id = %self.request_id, seq, "duplicate moderation result ignored");
                    return ControlFlow::Continue(());
                }
                Some(chunk) => {
                    chunk.status = if result.safe {
                        ChunkStatus::Safe
                    } else {
                        ChunkStatus::Flagged
                    };
                }
            }
            if result.safe {
                Some(state.take_ready_prefix())
            } else {
                state.violation = Some(result.reason.clone());
                None
            }
        };

        let Some(released) = released else {
            info!(
                request_id = %self.request_id,
                shield_id = %self.shield_id,
                seq,
                reason = %result.reason,
                "chunk flagged by moderation"
            );
            self.cancel.cancel();
            drop(out);
            self.progress.notify_waiters();
            return ControlFlow::Break(());
        };

        for chunk in &released {
            if out.write_events(&chunk.events).await.is_err() {
                info!(request_id = %self.request_id, "client disconnected during release");
                self.cancel.cancel();
                drop(out);
                self.progress.notify_waiters();
                return ControlFlow::Break(());
            }
            debug!(
                request_id = %self.request_id,
                seq = chunk.seq,
                events = chunk.events.len(),
                "chunk released"
            );
        }
        drop(out);
        self.progress.notify_waiters();
        ControlFlow::Continue(())
    }
}

async fn run_result_loop(inner: Arc<EngineInner>, mut results: mpsc::Receiver<ModerationResult>) {
    loop {
        let result = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            received = results.recv() => match received {
                Some(result) => result,
                None => break,
            },
        };
        if inner.apply_result(result).await.is_break() {
            break;
        }
    }
    inner.progress.notify_waiters();
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Per-request moderation engine. Owned by the dispatcher.
pub struct ModerationEngine {
    inner: Arc<EngineInner>,
    adapter: Arc<ModerationAdapter>,
    results_tx: mpsc::Sender<ModerationResult>,
    tasks: JoinSet<()>,
    result_loop: Option<JoinHandle<()>>,
}

impl ModerationEngine {
    /// Start the result loop. The engine's cancel signal is a child of the
    /// request scope's, so a client disconnect reaches every task.
    pub fn start(
        scope: &RequestScope,
        adapter: Arc<ModerationAdapter>,
        writer: SseWriter,
        result_buffer: usize,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::channel(result_buffer.max(1));
        let inner = Arc::new(EngineInner {
            state: Mutex::new(EngineState {
                chunks: BTreeMap::new(),
                next_to_send: 0,
                next_seq: 0,
                violation: None,
            }),
            writer,
            cancel: scope.cancel.child_token(),
            progress: Notify::new(),
            request_id: scope.request_id.clone(),
            shield_id: scope.shield_id.clone(),
        });
        let result_loop = tokio::spawn(run_result_loop(inner.clone(), results_rx));
        Self {
            inner,
            adapter,
            results_tx,
            tasks: JoinSet::new(),
            result_loop: Some(result_loop),
        }
    }

    /// New empty chunk with the next seq.
    pub fn create_chunk(&self) -> Chunk {
        let mut state = self.inner.lock_state();
        let chunk = Chunk::new(state.next_seq);
        state.next_seq += 1;
        chunk
    }

    /// Hand a chunk to the engine and schedule its moderation task.
    /// Chunks registered after cancellation are discarded.
    pub fn register(&mut self, chunk: Chunk) {
        if self.inner.cancel.is_cancelled() {
            debug!(request_id = %self.inner.request_id, seq = chunk.seq, "chunk discarded after cancel");
            return;
        }
        while self.tasks.try_join_next().is_some() {}

        let seq = chunk.seq;
        let text: Arc<str> = Arc::from(chunk.text.as_str());
        debug!(
            request_id = %self.inner.request_id,
            seq,
            words = text.split_whitespace().count(),
            "chunk registered for moderation"
        );
        self.inner.lock_state().chunks.insert(seq, chunk);

        let adapter = self.adapter.clone();
        let results = self.results_tx.clone();
        let cancel = self.inner.cancel.clone();
        let shield_id = self.inner.shield_id.clone();
        self.tasks.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = adapter.check(seq, &text, &shield_id) => result,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = results.send(result) => {}
            }
        });
    }

    /// Wait until every registered chunk is released.
    ///
    /// Returns `Violation` as soon as a chunk is flagged and `Cancelled` if
    /// the request is cancelled first.
    pub async fn wait_for_drain(&self) -> Result<(), DrainError> {
        loop {
            let notified = self.inner.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.inner.lock_state();
                if let Some(reason) = &state.violation {
                    return Err(DrainError::Violation(reason.clone()));
                }
                if state.chunks.is_empty() {
                    return Ok(());
                }
            }
            if self.inner.cancel.is_cancelled() {
                return Err(DrainError::Cancelled);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.inner.cancel.cancelled() => {}
            }
        }
    }

    /// Reason of the first flagged chunk, if any.
    pub fn violation(&self) -> Option<String> {
        self.inner.lock_state().violation.clone()
    }

    /// Number of registered chunks not yet released.
    pub fn pending(&self) -> usize {
        self.inner.lock_state().chunks.len()
    }

    /// Smallest seq not yet released.
    pub fn next_to_send(&self) -> u64 {
        self.inner.lock_state().next_to_send
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves on violation, disconnect, or shutdown.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    /// Cancel outstanding work and join every task spawned for this request.
    pub async fn shutdown(mut self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.result_loop.take() {
            let _ = handle.await;
        }
        self.tasks.shutdown().await;
        let discarded = self.pending();
        if discarded > 0 {
            debug!(request_id = %self.inner.request_id, discarded, "unreleased chunks discarded");
        }
    }
}

impl Drop for ModerationEngine {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.result_loop.take() {
            handle.abort();
        }
    }
}
