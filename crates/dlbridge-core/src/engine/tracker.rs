//! Transfer tracker - owns a transfer descriptor and relays its events
//!
//! Progress and completion both go through the listener lock, which is what
//! guarantees that nothing is delivered after the completion event.

use crate::error::DlbridgeError;
use chrono::Utc;
use dlbridge_types::{Transfer, TransferEvent, TransferStatus};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receiving end of a transfer's notifications
#[derive(Debug)]
pub struct TransferSubscription {
    rx: mpsc::UnboundedReceiver<TransferEvent>,
}

impl TransferSubscription {
    /// Next event, or `None` once the subscription has been replaced or the
    /// engine is gone
    pub async fn recv(&mut self) -> Option<TransferEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TransferEvent> {
        self.rx.try_recv().ok()
    }
}

/// Descriptor plus notification relay for a single transfer
#[derive(Debug)]
pub struct TransferTracker {
    transfer: RwLock<Transfer>,
    listener: Mutex<Option<mpsc::UnboundedSender<TransferEvent>>>,
    finished: CancellationToken,
}

impl TransferTracker {
    pub fn new(transfer: Transfer) -> Self {
        Self {
            transfer: RwLock::new(transfer),
            listener: Mutex::new(None),
            finished: CancellationToken::new(),
        }
    }

    pub fn snapshot(&self) -> Transfer {
        self.transfer.read().clone()
    }

    /// Register the listener. A previous listener is dropped and its
    /// subscription ends.
    pub fn subscribe(&self) -> TransferSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.listener.lock() = Some(tx);
        TransferSubscription { rx }
    }

    /// Fired once the completion event has been emitted
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Move to a non-terminal status. Ignored once finished.
    pub fn set_status(&self, status: TransferStatus) {
        let _listener = self.listener.lock();
        if self.is_finished() || status.is_terminal() {
            return;
        }
        self.transfer.write().status = status;
    }

    /// Record a progress tick and relay it to the listener, if any
    pub fn progress(&self, speed: u64, bytes_done: u64, bytes_total: u64) {
        let listener = self.listener.lock();
        if self.is_finished() {
            return;
        }

        let event = {
            let mut transfer = self.transfer.write();
            transfer.bytes_done = transfer.bytes_done.max(bytes_done);
            transfer.bytes_total = transfer.bytes_total.max(bytes_total);
            transfer.speed = speed;
            TransferEvent::Progress {
                speed,
                bytes_done: transfer.bytes_done,
                bytes_total: transfer.bytes_total,
            }
        };

        if let Some(tx) = listener.as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Classify the outcome, update the descriptor and emit the completion
    /// event. Only the first call has any effect.
    pub fn complete(&self, outcome: Result<(), DlbridgeError>) -> bool {
        let listener = self.listener.lock();
        if self.is_finished() {
            return false;
        }

        let error = {
            let mut transfer = self.transfer.write();
            transfer.speed = 0;
            transfer.completed_at = Some(Utc::now());
            match outcome {
                Ok(()) => {
                    transfer.bytes_total = transfer.bytes_total.max(transfer.bytes_done);
                    transfer.bytes_done = transfer.bytes_total;
                    transfer.status = TransferStatus::Completed;
                    transfer.error = None;
                }
                Err(DlbridgeError::Cancelled) => {
                    transfer.status = TransferStatus::Cancelled;
                    transfer.error = Some(DlbridgeError::Cancelled.to_string());
                }
                Err(e) => {
                    transfer.status = TransferStatus::Failed;
                    transfer.error = Some(e.to_string());
                }
            }
            transfer.error.clone()
        };

        self.finished.cancel();
        if let Some(tx) = listener.as_ref() {
            let _ = tx.send(TransferEvent::Completed { error });
        }
        true
    }
}
