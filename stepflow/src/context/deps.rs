//! The dependency bag and the collaborator capabilities it may expose.

use super::State;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

/// Capability set handed to every step.
///
/// Both capabilities are optional; the engine checks for presence before
/// dispatching transactional and event steps. Implement this on your own
/// dependency type, or use [`DependencyBag`].
pub trait Dependencies: Send + Sync + 'static {
    /// Returns the transactional database, if any.
    fn database(&self) -> Option<&dyn TransactionalDatabase> {
        None
    }

    /// Returns the event publisher, if any.
    fn event_publisher(&self) -> Option<&dyn EventPublisher> {
        None
    }
}

impl Dependencies for () {}

/// Work executed inside a transaction scope.
pub type TransactionWork =
    Box<dyn FnOnce(Transaction) -> BoxFuture<'static, anyhow::Result<Option<State>>> + Send>;

/// A database that can run work under commit/rollback semantics.
///
/// Implementations open a transaction, call `work` with a handle to it,
/// commit when the work succeeds and roll back when it fails, returning the
/// work's result either way.
#[async_trait]
pub trait TransactionalDatabase: Send + Sync {
    /// Runs `work` inside a transaction.
    async fn transaction(&self, work: TransactionWork) -> anyhow::Result<Option<State>>;
}

/// Opaque handle to an open transaction.
///
/// The database decides what the handle is; handlers recover it with
/// [`Transaction::downcast_ref`].
#[derive(Clone)]
pub struct Transaction {
    handle: Arc<dyn Any + Send + Sync>,
}

impl Transaction {
    /// Wraps a database-specific handle.
    pub fn new<T: Any + Send + Sync>(handle: T) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Wraps an already shared handle.
    pub fn from_arc<T: Any + Send + Sync>(handle: Arc<T>) -> Self {
        Self { handle }
    }

    /// Returns the handle as `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}

/// A sink for domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `event` to `channel`.
    async fn publish(&self, channel: &str, event: Value) -> anyhow::Result<()>;
}

/// A domain event produced by an event step.
///
/// The engine adds `correlationId` when publishing; any value the handler
/// put under that key is replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The event type.
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Arbitrary payload fields.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl Event {
    /// Creates an event with no payload fields.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Renders the published shape: `{eventType, ...fields, correlationId}`.
    #[must_use]
    pub fn into_published(self, correlation_id: &str) -> Value {
        let mut map = self.fields;
        map.insert("eventType".to_string(), Value::String(self.event_type));
        map.insert(
            "correlationId".to_string(),
            Value::String(correlation_id.to_string()),
        );
        Value::Object(map)
    }
}

/// A ready-made dependency bag holding optional shared collaborators.
#[derive(Clone, Default)]
pub struct DependencyBag {
    database: Option<Arc<dyn TransactionalDatabase>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl DependencyBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transactional database.
    #[must_use]
    pub fn with_database(mut self, database: Arc<dyn TransactionalDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn with_event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }
}

impl Dependencies for DependencyBag {
    fn database(&self) -> Option<&dyn TransactionalDatabase> {
        self.database.as_deref()
    }

    fn event_publisher(&self) -> Option<&dyn EventPublisher> {
        self.publisher.as_deref()
    }
}

impl std::fmt::Debug for DependencyBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyBag")
            .field("database", &self.database.is_some())
            .field("publisher", &self.publisher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_published_shape() {
        let event = Event::new("order.placed")
            .with_field("orderId", json!(7))
            .with_field("correlationId", json!("spoofed"));

        let published = event.into_published("corr-1");
        assert_eq!(
            published,
            json!({"eventType": "order.placed", "orderId": 7, "correlationId": "corr-1"})
        );
    }

    #[test]
    fn test_event_deserializes_flat() {
        let event: Event =
            serde_json::from_value(json!({"eventType": "a", "x": 1})).unwrap();
        assert_eq!(event.event_type, "a");
        assert_eq!(event.fields["x"], 1);
    }

    #[test]
    fn test_unit_has_no_capabilities() {
        assert!(().database().is_none());
        assert!(().event_publisher().is_none());
    }

    #[test]
    fn test_transaction_downcast() {
        let tx = Transaction::new(42_u32);
        assert_eq!(tx.downcast_ref::<u32>(), Some(&42));
        assert!(tx.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_empty_bag_debug() {
        let bag = DependencyBag::new();
        assert!(bag.database().is_none());
        assert_eq!(
            format!("{bag:?}"),
            "DependencyBag { database: false, publisher: false }"
        );
    }
}
