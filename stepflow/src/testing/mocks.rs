//! In-memory collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::context::{EventPublisher, State, Transaction, TransactionWork, TransactionalDatabase};

/// The transaction handle handed out by [`InMemoryDatabase`].
///
/// Writes are staged and only reach the database when the work succeeds.
#[derive(Debug, Default)]
pub struct InMemoryTransaction {
    staged: Mutex<State>,
    snapshot: State,
}

impl InMemoryTransaction {
    /// Stages a write.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.staged.lock().insert(key.into(), value);
    }

    /// Reads a key, seeing staged writes first.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.staged
            .lock()
            .get(key)
            .or_else(|| self.snapshot.get(key))
            .cloned()
    }
}

/// A key-value "database" with commit/rollback semantics.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    data: Mutex<State>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl InMemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a committed value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    /// Returns all committed data.
    #[must_use]
    pub fn snapshot(&self) -> State {
        self.data.lock().clone()
    }

    /// Returns the number of committed transactions.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Returns the number of rolled back transactions.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionalDatabase for InMemoryDatabase {
    async fn transaction(&self, work: TransactionWork) -> anyhow::Result<Option<State>> {
        let tx = std::sync::Arc::new(InMemoryTransaction {
            staged: Mutex::new(State::new()),
            snapshot: self.snapshot(),
        });

        match work(Transaction::from_arc(std::sync::Arc::clone(&tx))).await {
            Ok(result) => {
                let staged = std::mem::take(&mut *tx.staged.lock());
                self.data.lock().extend(staged);
                self.commits.fetch_add(1, Ordering::SeqCst);
                Ok(result)
            }
            Err(err) => {
                self.rollbacks.fetch_add(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }
}

/// An event publisher that records what it is given.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Value)>>,
    failure: Option<String>,
}

impl RecordingPublisher {
    /// Creates a publisher that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a publisher whose every publish fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    /// Returns every `(channel, event)` published, in order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().clone()
    }

    /// Returns the events published to `channel`, in order.
    #[must_use]
    pub fn events_on(&self, channel: &str) -> Vec<Value> {
        self.published
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Returns the number of published events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    /// Returns true if nothing was published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, channel: &str, event: Value) -> anyhow::Result<()> {
        if let Some(message) = &self.failure {
            anyhow::bail!("{message}");
        }
        self.published.lock().push((channel.to_string(), event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::State;
    use futures::future::BoxFuture;
    use serde_json::json;

    type TxFuture = BoxFuture<'static, anyhow::Result<Option<State>>>;

    #[tokio::test]
    async fn test_transaction_commits_staged_writes() {
        let db = InMemoryDatabase::new();
        let work: TransactionWork = Box::new(|tx: Transaction| -> TxFuture {
            Box::pin(async move {
                let handle = tx
                    .downcast_ref::<InMemoryTransaction>()
                    .ok_or_else(|| anyhow::anyhow!("wrong handle"))?;
                handle.put("order", json!(1));
                assert_eq!(handle.get("order"), Some(json!(1)));
                Ok(Some(State::new()))
            })
        });

        db.transaction(work).await.unwrap();
        assert_eq!(db.get("order"), Some(json!(1)));
        assert_eq!(db.commits(), 1);
        assert_eq!(db.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let db = InMemoryDatabase::new();
        let work: TransactionWork = Box::new(|tx: Transaction| -> TxFuture {
            Box::pin(async move {
                if let Some(handle) = tx.downcast_ref::<InMemoryTransaction>() {
                    handle.put("order", json!(1));
                }
                anyhow::bail!("constraint violated")
            })
        });

        assert!(db.transaction(work).await.is_err());
        assert!(db.get("order").is_none());
        assert_eq!(db.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_recording_publisher() {
        let publisher = RecordingPublisher::new();
        publisher.publish("orders", json!({"n": 1})).await.unwrap();
        publisher.publish("audit", json!({"n": 2})).await.unwrap();

        assert_eq!(publisher.len(), 2);
        assert_eq!(publisher.events_on("orders"), vec![json!({"n": 1})]);

        let failing = RecordingPublisher::failing("broker down");
        let err = failing.publish("orders", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "broker down");
        assert!(failing.is_empty());
    }
}
