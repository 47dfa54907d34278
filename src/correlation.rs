//! Request correlation.
//!
//! Bridges asynchronous delivery from the reader task to callers awaiting a
//! specific reply. Two independent tables:
//!
//! | Table    | Keyed by                                   | Delivers        |
//! |----------|--------------------------------------------|-----------------|
//! | `direct` | the request id the caller sent             | `Frame`         |
//! | `nested` | the `cid` claim inside an inbound JWS      | `Message`       |
//!
//! The id spaces are unrelated, so they never share a table.
//!
//! Each table is guarded by its own lock, held only while the map is
//! mutated. Delivery and waiting happen on oneshot channels outside the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

use crate::connection::{Frame, Message};
use crate::error::{ClientError, Result};

struct Pending<T> {
    /// Distinguishes this registration from a later one under the same id
    seq: u64,
    tx: Option<oneshot::Sender<T>>,
    rx: Option<oneshot::Receiver<T>>,
}

struct Table<T> {
    next_seq: u64,
    pending: HashMap<String, Pending<T>>,
    /// Set once by `drain`; every later wait fails with `Closed`
    closed: bool,
}

/// One keyed-waiter table. At most one entry per id; registering an id
/// again replaces the previous entry (last writer wins).
pub struct CorrelationTable<T> {
    inner: Arc<Mutex<Table<T>>>,
}

impl<T> Clone for CorrelationTable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for CorrelationTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CorrelationTable<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Table {
                next_seq: 0,
                pending: HashMap::new(),
                closed: false,
            })),
        }
    }

    /// Create a single-slot waiter under `id`, replacing any existing one.
    pub async fn register(&self, id: &str) -> Waiter<T> {
        let (tx, rx) = oneshot::channel();

        let mut table = self.inner.lock().await;
        table.next_seq += 1;
        let seq = table.next_seq;
        if table.closed {
            drop(table);
            return Waiter {
                id: id.to_string(),
                table: self.clone(),
            };
        }
        table.pending.insert(
            id.to_string(),
            Pending {
                seq,
                tx: Some(tx),
                rx: Some(rx),
            },
        );

        Waiter {
            id: id.to_string(),
            table: self.clone(),
        }
    }

    /// Hand `value` to the waiter registered under `id`.
    ///
    /// Returns the value back when nobody is waiting for it, or when the slot
    /// was already filled by an earlier response.
    pub async fn resolve(&self, id: &str, value: T) -> std::result::Result<(), T> {
        let tx = {
            let mut table = self.inner.lock().await;
            table.pending.get_mut(id).and_then(|p| p.tx.take())
        };

        match tx {
            Some(tx) => tx.send(value),
            None => Err(value),
        }
    }

    /// Remove a waiter without delivering to it.
    pub async fn cancel(&self, id: &str) {
        self.inner.lock().await.pending.remove(id);
    }

    /// Wait for the value delivered under `id`.
    ///
    /// The entry is consumed whether the wait succeeds or times out, so
    /// a second wait on the same id times out unless it is registered again.
    /// After `drain` every wait fails with `ClientError::Closed` at once.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Result<T> {
        let taken = {
            let mut table = self.inner.lock().await;
            if table.closed {
                return Err(ClientError::Closed);
            }
            table
                .pending
                .get_mut(id)
                .and_then(|p| p.rx.take().map(|rx| (p.seq, rx)))
        };

        let Some((seq, rx)) = taken else {
            tokio::time::sleep(timeout).await;
            return Err(ClientError::RequestTimeout(id.to_string()));
        };

        let outcome = tokio::time::timeout(timeout, rx).await;

        let superseded = {
            let mut table = self.inner.lock().await;
            match table.pending.get(id) {
                Some(p) if p.seq == seq => {
                    table.pending.remove(id);
                    false
                }
                Some(_) => true,
                None => false,
            }
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            // Sender dropped: replaced by a newer registration, or drained on close
            Ok(Err(_)) if superseded => Err(ClientError::RequestTimeout(id.to_string())),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::RequestTimeout(id.to_string())),
        }
    }

    /// Drop every entry and close the table for good.
    ///
    /// Anyone still waiting sees `ClientError::Closed`, and so does every
    /// later wait.
    pub async fn drain(&self) -> usize {
        let mut table = self.inner.lock().await;
        table.closed = true;
        let count = table.pending.len();
        table.pending.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Handle returned by `register`.
pub struct Waiter<T> {
    id: String,
    table: CorrelationTable<T>,
}

impl<T> Waiter<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(self, timeout: Duration) -> Result<T> {
        self.table.wait(&self.id, timeout).await
    }
}

/// Both correlation tables.
#[derive(Clone, Default)]
pub struct CorrelationCache {
    /// Responses to requests we sent, keyed by our request id
    pub direct: CorrelationTable<Frame>,
    /// Messages carrying a JWS whose `cid` claim matches a registration
    pub nested: CorrelationTable<Message>,
}

impl CorrelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every outstanding wait on both tables.
    pub async fn drain(&self) {
        self.direct.drain().await;
        self.nested.drain().await;
    }
}
