use std::sync::Arc;

use async_trait::async_trait;

use super::{AggregateRecord, Backend, EventStore, Transaction, TxError};
use crate::{Correlation, CqrsError, Envelope, Event, EventPublisher, Guid, Result, TypeRegistry};

/// An [`EventStore`] that runs the optimistic-concurrency protocol on top of any transactional
/// [`Backend`].
///
/// A save reads the aggregate record, checks the caller's expected version against it, writes
/// one envelope per event plus the bumped record, and commits, all inside one backend
/// transaction. Any failure aborts the transaction as a whole.
///
/// Reads decode envelopes through the shared [`TypeRegistry`] and always return events sorted
/// by version, whatever order the backend hands them out in.
pub struct TransactionalEventStore<B> {
    backend: B,
    registry: Arc<TypeRegistry>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl<B: Backend> TransactionalEventStore<B> {
    pub fn new(backend: B, registry: Arc<TypeRegistry>) -> Self {
        Self {
            backend,
            registry,
            publisher: None,
        }
    }

    /// Publishes every saved event to `publisher` once its save has committed.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Like [`EventStore::save_events`], stamping every envelope with `correlation`.
    #[tracing::instrument(skip(self, events, correlation), fields(event_count = events.len()))]
    pub async fn save_events_with(
        &self,
        aggregate_type: &str,
        aggregate_id: Guid,
        events: &mut [Box<dyn Event>],
        expected_version: i64,
        correlation: Correlation,
    ) -> Result<()> {
        let store_error = |source: anyhow::Error| CqrsError::Store {
            aggregate_id,
            source,
        };

        let mut tx = self.backend.begin().await.map_err(store_error)?;

        let last_version = match append(
            &mut tx,
            aggregate_type,
            aggregate_id,
            events,
            expected_version,
            correlation,
        )
        .await
        {
            Ok(Some(version)) => version,
            Ok(None) => {
                tx.abort().await;
                tracing::debug!("nothing to append");
                return Ok(());
            }
            Err(err) => {
                tx.abort().await;
                if err.is_concurrency_conflict() {
                    tracing::warn!(%err, "rejected stale write");
                }
                return Err(err);
            }
        };

        tx.commit().await.map_err(|err| match err {
            TxError::Conflict(reason) => {
                tracing::warn!(%reason, "concurrent writer committed first");
                CqrsError::Concurrency {
                    aggregate_id,
                    expected: expected_version,
                    actual: None,
                }
            }
            TxError::Backend(source) => store_error(source),
        })?;

        let mut version = expected_version;
        for event in events.iter_mut() {
            version += 1;
            event.set_version(version);
        }

        tracing::info!(new_version = last_version, "appended events to event store");

        if let Some(publisher) = &self.publisher {
            for event in events.iter() {
                match publisher.publish_event(Arc::from(event.clone_event())) {
                    Ok(_) => {}
                    Err(CqrsError::NoProcessor(event_type)) => {
                        tracing::debug!(event_type, "no processor for saved event");
                    }
                    Err(err) => tracing::warn!(%err, "failed to publish saved event"),
                }
            }
        }

        Ok(())
    }
}

/// Runs the read-check-write part of a save inside `tx` and returns the last assigned version,
/// or `None` when the version check passed but there was nothing to write.
async fn append<T: Transaction>(
    tx: &mut T,
    aggregate_type: &str,
    aggregate_id: Guid,
    events: &[Box<dyn Event>],
    expected_version: i64,
    correlation: Correlation,
) -> Result<Option<i64>> {
    let store_error = |source: anyhow::Error| CqrsError::Store {
        aggregate_id,
        source,
    };

    let record = tx
        .read_aggregate(aggregate_id)
        .await
        .map_err(store_error)?
        .unwrap_or_else(|| AggregateRecord::new(aggregate_id));

    record.check_expected_version(expected_version)?;
    if events.is_empty() {
        return Ok(None);
    }

    let mut version = expected_version;
    let mut envelopes = Vec::with_capacity(events.len());
    for event in events {
        version += 1;
        envelopes.push(Envelope::seal(
            event.as_ref(),
            aggregate_type,
            aggregate_id,
            version,
            correlation,
        )?);
    }

    tx.write_events(envelopes).await.map_err(store_error)?;
    tx.write_aggregate(AggregateRecord {
        aggregate_id,
        version,
        is_new: false,
    })
    .await
    .map_err(store_error)?;

    Ok(Some(version))
}

#[async_trait]
impl<B: Backend> EventStore for TransactionalEventStore<B> {
    async fn save_events(
        &self,
        aggregate_type: &str,
        aggregate_id: Guid,
        events: &mut [Box<dyn Event>],
        expected_version: i64,
    ) -> Result<()> {
        self.save_events_with(
            aggregate_type,
            aggregate_id,
            events,
            expected_version,
            Correlation::new(),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_events_for_aggregate(&self, aggregate_id: Guid) -> Result<Vec<Box<dyn Event>>> {
        let mut envelopes = self
            .backend
            .read_stream(aggregate_id)
            .await
            .map_err(|source| CqrsError::Store {
                aggregate_id,
                source,
            })?;

        envelopes.sort_by_key(|envelope| envelope.version);

        let events = envelopes
            .iter()
            .map(|envelope| envelope.open(&self.registry))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(event_count = events.len(), "loaded events for aggregate");
        Ok(events)
    }
}
