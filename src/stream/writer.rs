// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Downstream SSE writer
//
// One writer per request, shared by the dispatcher and the engine's release
// path. Every SSE record is a single channel message, so records never
// interleave; the mutex orders multi-record batches.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, MutexGuard};

use super::types::StreamEvent;

/// Capacity of the channel feeding the response body.
pub const SSE_CHANNEL_CAPACITY: usize = 64;

/// The downstream receiver is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("downstream client disconnected")]
pub struct ClientDisconnected;

/// Encode one SSE record: `data: <json>\n\n`.
pub fn encode_record<T: Serialize>(payload: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(payload)?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

/// The terminal record written when upstream fails mid-stream.
pub fn error_record() -> Bytes {
    Bytes::from_static(
        b"data: {\"error\":{\"message\":\"Streaming error occurred\",\"code\":\"500\"}}\n\n",
    )
}

#[derive(Clone)]
pub struct SseWriter {
    tx: Arc<Mutex<mpsc::Sender<Bytes>>>,
    // Unlocked handle used only to observe receiver shutdown.
    watch: mpsc::Sender<Bytes>,
}

impl SseWriter {
    /// Create a writer and the receiver that feeds the response body.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let writer = Self {
            watch: tx.clone(),
            tx: Arc::new(Mutex::new(tx)),
        };
        (writer, rx)
    }

    /// Exclusive access for writing several records back to back.
    pub async fn lock(&self) -> SseWriterGuard<'_> {
        SseWriterGuard {
            tx: self.tx.lock().await,
        }
    }

    pub async fn write_event(&self, event: &StreamEvent) -> Result<(), ClientDisconnected> {
        self.lock().await.write_event(event).await
    }

    pub async fn write_error(&self) -> Result<(), ClientDisconnected> {
        self.lock().await.send(error_record()).await
    }

    /// Resolves once the client side has gone away.
    pub async fn closed(&self) {
        self.watch.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.watch.is_closed()
    }
}

pub struct SseWriterGuard<'a> {
    tx: MutexGuard<'a, mpsc::Sender<Bytes>>,
}

impl SseWriterGuard<'_> {
    pub async fn write_event(&mut self, event: &StreamEvent) -> Result<(), ClientDisconnected> {
        match encode_record(event) {
            Ok(record) => self.send(record).await,
            Err(err) => {
                tracing::warn!(error = %err, kind = event.kind.as_str(), "failed to encode stream event, skipping");
                Ok(())
            }
        }
    }

    pub async fn write_events(&mut self, events: &[StreamEvent]) -> Result<(), ClientDisconnected> {
        for event in events {
            self.write_event(event).await?;
        }
        Ok(())
    }

    async fn send(&mut self, record: Bytes) -> Result<(), ClientDisconnected> {
        self.tx.send(record).await.map_err(|_| ClientDisconnected)
    }
}
