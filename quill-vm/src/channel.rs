//! Script channels backed by crossbeam
//!
//! Blocking operations race the cancellation token. When both are ready
//! cancellation wins.

use crate::tasks::CancelToken;
use crate::value::Value;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

pub struct Channel {
    id: u64,
    capacity: usize,
    tx: Mutex<Option<Sender<Value>>>,
    rx: Receiver<Value>,
}

/// Result of a blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Closed,
    Cancelled,
}

/// Result of a blocking receive
#[derive(Debug, Clone)]
pub enum RecvOutcome {
    Value(Value),
    Closed,
    Cancelled,
}

impl Channel {
    /// A channel holding up to `capacity` values; 0 is a rendezvous channel
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self {
            id: NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed),
            capacity,
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Values currently buffered
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Closes the channel; false when it was already closed
    pub fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    pub fn send(&self, value: Value, cancel: &CancelToken) -> SendOutcome {
        // clone so the lock is not held while blocked
        let tx = match self.tx.lock().as_ref() {
            Some(tx) => tx.clone(),
            None => return SendOutcome::Closed,
        };
        if cancel.is_cancelled() {
            return SendOutcome::Cancelled;
        }
        select! {
            send(tx, value) -> res => match res {
                Ok(()) => SendOutcome::Sent,
                Err(_) => SendOutcome::Closed,
            },
            recv(cancel.receiver()) -> _ => SendOutcome::Cancelled,
        }
    }

    pub fn recv(&self, cancel: &CancelToken) -> RecvOutcome {
        if cancel.is_cancelled() {
            return RecvOutcome::Cancelled;
        }
        let outcome = select! {
            recv(self.rx) -> msg => match msg {
                Ok(v) => RecvOutcome::Value(v),
                Err(_) => RecvOutcome::Closed,
            },
            recv(cancel.receiver()) -> _ => RecvOutcome::Cancelled,
        };
        match outcome {
            RecvOutcome::Value(_) if cancel.is_cancelled() => RecvOutcome::Cancelled,
            other => other,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
