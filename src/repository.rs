use std::marker::PhantomData;

use crate::{Aggregate, CqrsError, EventStore, Guid, Result};

/// A generic repository for event-sourced aggregates.
///
/// Loading replays every persisted event onto a fresh instance; saving appends only the
/// events applied since the aggregate was loaded, under the caller's expected version.
pub struct Repository<A, S> {
    store: S,
    factory: fn() -> A,
    marker: PhantomData<A>,
}

impl<A, S> Repository<A, S>
where
    A: Aggregate,
    S: EventStore,
{
    /// A repository that hydrates `A::default()` instances.
    pub fn new(store: S) -> Self {
        Self::with_factory(store, A::default)
    }

    /// A repository that starts hydration from `factory()` instead of `A::default()`.
    pub fn with_factory(store: S, factory: fn() -> A) -> Self {
        Self {
            store,
            factory,
            marker: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the aggregate by replaying its history.
    ///
    /// Fails with [`CqrsError::AggregateNotFound`] when the aggregate has no events: callers
    /// that want "create or load" have to handle that case themselves.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE))]
    pub async fn get_by_id(&self, id: Guid) -> Result<A> {
        let events = self.store.get_events_for_aggregate(id).await?;
        if events.is_empty() {
            return Err(CqrsError::AggregateNotFound(id));
        }

        let mut aggregate = (self.factory)();
        aggregate.root_mut().set_id(id);
        aggregate.load_from_history(&events);

        tracing::debug!(version = aggregate.version(), "hydrated aggregate");
        Ok(aggregate)
    }

    /// Persists the uncommitted events of `aggregate`.
    ///
    /// Pass `-1` as `expected_version` when the aggregate is being created, otherwise the
    /// version it was loaded at. On success the uncommitted events are drained and the
    /// aggregate's version moves to the last assigned one; on failure they are kept.
    #[tracing::instrument(skip(self, aggregate), fields(aggregate_type = A::AGGREGATE_TYPE, aggregate_id = %aggregate.id()))]
    pub async fn save(&self, aggregate: &mut A, expected_version: i64) -> Result<()> {
        let aggregate_id = aggregate.id();

        self.store
            .save_events(
                A::AGGREGATE_TYPE,
                aggregate_id,
                aggregate.root_mut().uncommitted_events_mut(),
                expected_version,
            )
            .await?;

        aggregate.root_mut().mark_committed();
        Ok(())
    }
}

impl<A, S: Clone> Clone for Repository<A, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            factory: self.factory,
            marker: PhantomData,
        }
    }
}
