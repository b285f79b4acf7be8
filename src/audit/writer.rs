//! Non-blocking queue in front of an [`AuditSink`].
//!
//! [`AuditWriter`] implements both observer traits. Records are pushed
//! onto a bounded channel with `try_send` so request handling never waits
//! on the database; a single background task pops them in order and
//! writes them to the sink. Because one task drains one FIFO queue, a
//! request record always reaches the sink before the response record that
//! was enqueued after it.

use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{AuditSink, RequestObserver, ResponseObserver, TrafficRecord};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

enum Command {
    Record(TrafficRecord),
    Close(oneshot::Sender<()>),
}

pub struct AuditWriter {
    tx: mpsc::Sender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
    sink_name: &'static str,
}

impl AuditWriter {
    /// Spawn the writer task. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink_name = sink.name();
        let task = tokio::spawn(write_loop(sink, rx));
        Self {
            tx,
            task: Mutex::new(Some(task)),
            sink_name,
        }
    }

    /// Queue `record` for writing. False when it was dropped.
    fn enqueue(&self, record: TrafficRecord) -> bool {
        match self.tx.try_send(Command::Record(record)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(Command::Record(record))) => {
                tracing::warn!(
                    correlation_id = %record.correlation_id,
                    sink = self.sink_name,
                    "audit queue full, dropping record"
                );
                false
            }
            Err(_) => {
                tracing::debug!(sink = self.sink_name, "audit writer closed, dropping record");
                false
            }
        }
    }

    /// Drain queued records and close the sink.
    ///
    /// Only the first call does any work.
    pub async fn close(&self) {
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(task) = task else {
            return;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        // `send` waits for queue space, so every record accepted so far is
        // written before the close command is handled.
        if self.tx.send(Command::Close(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(e) = task.await {
            tracing::error!(error = %e, "audit writer task failed");
        }
    }
}

impl RequestObserver for AuditWriter {
    fn observe_request(&self, record: TrafficRecord) -> bool {
        self.enqueue(record)
    }
}

impl ResponseObserver for AuditWriter {
    fn observe_response(&self, record: TrafficRecord) {
        let _ = self.enqueue(record);
    }
}

async fn write_loop(sink: Arc<dyn AuditSink>, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Record(record) => {
                let result = if record.is_request() {
                    sink.record_request(&record).await
                } else {
                    sink.record_response(&record).await
                };
                if let Err(e) = result {
                    tracing::warn!(
                        correlation_id = %record.correlation_id,
                        sink = sink.name(),
                        error = %e,
                        "audit write failed"
                    );
                }
            }
            Command::Close(ack) => {
                rx.close();
                if let Err(e) = sink.close().await {
                    tracing::warn!(sink = sink.name(), error = %e, "audit sink close failed");
                }
                let _ = ack.send(());
                return;
            }
        }
    }

    // Every sender is gone without an explicit close.
    if let Err(e) = sink.close().await {
        tracing::warn!(sink = sink.name(), error = %e, "audit sink close failed");
    }
}
