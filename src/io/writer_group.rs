// ABOUTME: Fan-out of one container output stream to a changing set of sinks.
// ABOUTME: Sinks that fail are dropped; closing the group closes every sink.

use crate::runtime::IoWriter;
use std::collections::HashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, oneshot};

struct Sink {
    writer: IoWriter,
    done: Option<oneshot::Sender<()>>,
}

impl Sink {
    async fn close(mut self) {
        let _ = self.writer.shutdown().await;
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

#[derive(Default)]
struct GroupState {
    sinks: HashMap<String, Sink>,
    closed: bool,
}

/// A set of writers receiving the same output.
///
/// Every sink added gets a receiver that fires once the sink is closed,
/// whether by removal, a write failure, or the group closing.
#[derive(Default)]
pub struct WriterGroup {
    state: Mutex<GroupState>,
}

impl WriterGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink under `key`, replacing and closing any sink with that key.
    pub async fn add(&self, key: impl Into<String>, writer: IoWriter) -> oneshot::Receiver<()> {
        let (done, closed) = oneshot::channel();
        let sink = Sink {
            writer,
            done: Some(done),
        };
        let mut state = self.state.lock().await;
        if state.closed {
            drop(state);
            sink.close().await;
            return closed;
        }
        if let Some(previous) = state.sinks.insert(key.into(), sink) {
            previous.close().await;
        }
        closed
    }

    /// Close and remove the sink under `key`, if present.
    pub async fn remove(&self, key: &str) {
        let sink = self.state.lock().await.sinks.remove(key);
        if let Some(sink) = sink {
            sink.close().await;
        }
    }

    /// Write `data` to every sink. A sink that fails is closed and removed.
    pub async fn write(&self, data: &[u8]) {
        let mut state = self.state.lock().await;
        let mut failed = Vec::new();
        for (key, sink) in state.sinks.iter_mut() {
            let written = match sink.writer.write_all(data).await {
                Ok(()) => sink.writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                tracing::debug!("Dropping output sink {}: {}", key, e);
                failed.push(key.clone());
            }
        }
        for key in failed {
            if let Some(sink) = state.sinks.remove(&key) {
                sink.close().await;
            }
        }
    }

    /// Close every sink. Sinks added afterwards are closed immediately.
    pub async fn close(&self) {
        let sinks = {
            let mut state = self.state.lock().await;
            state.closed = true;
            std::mem::take(&mut state.sinks)
        };
        for sink in sinks.into_values() {
            sink.close().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.sinks.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}
