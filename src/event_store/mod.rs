use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CqrsError, Envelope, Event, Guid, Result, UNASSIGNED_VERSION};

pub mod memory;
pub mod transactional;

pub use memory::{MemoryBackend, MemoryTransaction};
pub use transactional::TransactionalEventStore;

/// Logical name of the collection holding one envelope per event, keyed by event id.
pub const EVENTS_COLLECTION: &str = "events";

/// Logical name of the collection holding one [`AggregateRecord`] per aggregate id.
pub const AGGREGATES_COLLECTION: &str = "aggregates";

/// The `EventStore` trait defines the behavior for storing and loading events,
/// allowing the application to keep a historical record of state changes.
///
/// Writes follow an optimistic-concurrency protocol: the caller states the version it believes
/// the aggregate is at, and the store rejects the write with
/// [`CqrsError::Concurrency`] when that belief is stale.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to the stream of `aggregate_id`.
    ///
    /// `expected_version` is `-1` for an aggregate that has never been saved, otherwise the
    /// version of its last persisted event. The events receive the versions
    /// `expected_version + 1`, `expected_version + 2`, ... in order; these are written back
    /// onto `events` once the store has accepted them. Either all events are appended or none;
    /// an empty `events` still has its `expected_version` checked.
    async fn save_events(
        &self,
        aggregate_type: &str,
        aggregate_id: Guid,
        events: &mut [Box<dyn Event>],
        expected_version: i64,
    ) -> Result<()>;

    /// Loads the full history of `aggregate_id` in ascending version order.
    ///
    /// An aggregate without history yields an empty vector.
    async fn get_events_for_aggregate(&self, aggregate_id: Guid) -> Result<Vec<Box<dyn Event>>>;
}

#[async_trait]
impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    async fn save_events(
        &self,
        aggregate_type: &str,
        aggregate_id: Guid,
        events: &mut [Box<dyn Event>],
        expected_version: i64,
    ) -> Result<()> {
        (**self)
            .save_events(aggregate_type, aggregate_id, events, expected_version)
            .await
    }

    async fn get_events_for_aggregate(&self, aggregate_id: Guid) -> Result<Vec<Box<dyn Event>>> {
        (**self).get_events_for_aggregate(aggregate_id).await
    }
}

/// The store-side concurrency anchor of one aggregate.
///
/// Its version always equals the version of the most recently appended event of the aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub aggregate_id: Guid,

    pub version: i64,

    /// Set on records synthesized for aggregates that have never been saved.
    #[serde(skip)]
    pub is_new: bool,
}

impl AggregateRecord {
    /// The record assumed for an aggregate id that has no record yet.
    pub fn new(aggregate_id: Guid) -> Self {
        Self {
            aggregate_id,
            version: 0,
            is_new: true,
        }
    }

    /// Accepts or rejects a write made under `expected_version`.
    pub fn check_expected_version(&self, expected_version: i64) -> Result<()> {
        let (accepted, actual) = if self.is_new {
            (expected_version == UNASSIGNED_VERSION, UNASSIGNED_VERSION)
        } else {
            (self.version == expected_version, self.version)
        };

        if accepted {
            Ok(())
        } else {
            Err(CqrsError::Concurrency {
                aggregate_id: self.aggregate_id,
                expected: expected_version,
                actual: Some(actual),
            })
        }
    }
}

/// Failure to commit a backend transaction.
#[derive(Debug, Error)]
pub enum TxError {
    /// Data read by the transaction changed before it could commit.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A transactional document backend the event store protocol runs on.
///
/// Implement this trait (together with [`Transaction`]) to plug a concrete database into
/// [`TransactionalEventStore`]. The backend stores two collections,
/// [`EVENTS_COLLECTION`] and [`AGGREGATES_COLLECTION`].
#[async_trait]
pub trait Backend: Send + Sync {
    type Transaction: Transaction;

    /// Starts a transaction with at least snapshot isolation.
    async fn begin(&self) -> anyhow::Result<Self::Transaction>;

    /// Reads every envelope of `aggregate_id`, in no particular order.
    async fn read_stream(&self, aggregate_id: Guid) -> anyhow::Result<Vec<Envelope>>;
}

/// One backend transaction: read one document by key, write documents, then commit or abort.
///
/// Writes stay invisible to other readers until [`Transaction::commit`] succeeds. A commit
/// must fail with [`TxError::Conflict`] when an aggregate record read through this
/// transaction was changed by someone else in the meantime.
#[async_trait]
pub trait Transaction: Send {
    async fn read_aggregate(&mut self, aggregate_id: Guid) -> anyhow::Result<Option<AggregateRecord>>;

    async fn write_events(&mut self, envelopes: Vec<Envelope>) -> anyhow::Result<()>;

    /// Creates or replaces the record of `record.aggregate_id`.
    async fn write_aggregate(&mut self, record: AggregateRecord) -> anyhow::Result<()>;

    async fn commit(self) -> Result<(), TxError>;

    async fn abort(self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_accepts_only_unassigned_version() {
        let record = AggregateRecord::new(Guid::new());

        assert!(record.check_expected_version(-1).is_ok());
        let err = record.check_expected_version(0).unwrap_err();
        assert!(matches!(
            err,
            CqrsError::Concurrency { expected: 0, actual: Some(-1), .. }
        ));
    }

    #[test]
    fn existing_record_requires_exact_version() {
        let record = AggregateRecord {
            aggregate_id: Guid::new(),
            version: 2,
            is_new: false,
        };

        assert!(record.check_expected_version(2).is_ok());
        assert!(record.check_expected_version(1).is_err());
        assert!(record.check_expected_version(-1).is_err());

        let msg = record.check_expected_version(3).unwrap_err().to_string();
        assert!(msg.contains("expected version 3"));
        assert!(msg.contains("found 2"));
    }

    #[test]
    fn is_new_is_not_persisted() {
        let record = AggregateRecord::new(Guid::new());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("is_new").is_none());

        let back: AggregateRecord = serde_json::from_value(json).unwrap();
        assert!(!back.is_new);
    }
}
