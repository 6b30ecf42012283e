use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::anyhow;
use async_trait::async_trait;

use super::{AggregateRecord, Backend, Transaction, TxError};
use crate::{Envelope, Guid};

#[derive(Default)]
struct Collections {
    // keyed by event id; iteration order is arbitrary, like most document stores
    events: HashMap<Guid, Envelope>,
    aggregates: HashMap<Guid, AggregateRecord>,
}

/// In-memory [`Backend`] with optimistic transactions.
///
/// Transactions buffer their writes and remember the version of every aggregate record they
/// read. Commit validates those versions under a lock and then applies all writes at once, so
/// concurrent writers to the same aggregate serialize exactly like they would on a database
/// with snapshot isolation. Cloning the backend shares the underlying data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Collections>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn collections(&self) -> MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next commit fail with a backend error, as if the connection dropped.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of envelopes in the events collection.
    pub fn event_count(&self) -> usize {
        self.collections().events.len()
    }

    /// The committed record of `aggregate_id`, if any.
    pub fn aggregate_record(&self, aggregate_id: Guid) -> Option<AggregateRecord> {
        self.collections().aggregates.get(&aggregate_id).cloned()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> anyhow::Result<MemoryTransaction> {
        Ok(MemoryTransaction {
            backend: self.clone(),
            read_set: HashMap::new(),
            events: Vec::new(),
            aggregates: HashMap::new(),
        })
    }

    async fn read_stream(&self, aggregate_id: Guid) -> anyhow::Result<Vec<Envelope>> {
        Ok(self
            .collections()
            .events
            .values()
            .filter(|envelope| envelope.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }
}

/// A transaction on a [`MemoryBackend`].
pub struct MemoryTransaction {
    backend: MemoryBackend,
    // record versions observed by this transaction, `None` for absent records
    read_set: HashMap<Guid, Option<i64>>,
    events: Vec<Envelope>,
    aggregates: HashMap<Guid, AggregateRecord>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn read_aggregate(&mut self, aggregate_id: Guid) -> anyhow::Result<Option<AggregateRecord>> {
        if let Some(pending) = self.aggregates.get(&aggregate_id) {
            return Ok(Some(pending.clone()));
        }

        let committed = self.backend.aggregate_record(aggregate_id);
        self.read_set
            .entry(aggregate_id)
            .or_insert_with(|| committed.as_ref().map(|record| record.version));

        Ok(committed)
    }

    async fn write_events(&mut self, envelopes: Vec<Envelope>) -> anyhow::Result<()> {
        self.events.extend(envelopes);
        Ok(())
    }

    async fn write_aggregate(&mut self, record: AggregateRecord) -> anyhow::Result<()> {
        self.aggregates.insert(record.aggregate_id, record);
        Ok(())
    }

    async fn commit(self) -> Result<(), TxError> {
        if self.backend.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(TxError::Backend(anyhow!("injected commit failure")));
        }

        let mut collections = self.backend.collections();

        for (aggregate_id, seen) in &self.read_set {
            let current = collections
                .aggregates
                .get(aggregate_id)
                .map(|record| record.version);
            if current != *seen {
                return Err(TxError::Conflict(format!(
                    "aggregate {aggregate_id} moved from {seen:?} to {current:?}"
                )));
            }
        }

        // the events collection is insert-only
        for envelope in &self.events {
            if collections.events.contains_key(&envelope.event_id) {
                return Err(TxError::Backend(anyhow!(
                    "duplicate key: event {} already exists",
                    envelope.event_id
                )));
            }
        }

        for envelope in self.events {
            collections.events.insert(envelope.event_id, envelope);
        }
        for (aggregate_id, mut record) in self.aggregates {
            record.is_new = false;
            collections.aggregates.insert(aggregate_id, record);
        }

        Ok(())
    }

    async fn abort(self) {
        tracing::debug!(
            discarded_events = self.events.len(),
            "aborted in-memory transaction"
        );
    }
}
