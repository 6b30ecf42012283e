use std::{marker::PhantomData, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::Event;

/// A trait that defines the behavior of an event processor.
///
/// Processors subscribe to one event type through the [`Mediator`](crate::Mediator). Under
/// asynchronous publication the same processor may run concurrently with itself, so any state
/// it keeps needs its own synchronization.
#[async_trait]
pub trait EventProcessor<E: Event>: Send + Sync + 'static {
    async fn process(&self, event: &E) -> anyhow::Result<()>;
}

/// A processor with its event type erased, as stored by the mediator.
#[async_trait]
pub(crate) trait ErasedProcessor: Send + Sync {
    async fn process(&self, event: &dyn Event) -> anyhow::Result<()>;
}

pub(crate) struct TypedProcessor<E: Event> {
    inner: Arc<dyn EventProcessor<E>>,
    marker: PhantomData<fn(E)>,
}

impl<E: Event> TypedProcessor<E> {
    pub(crate) fn new(inner: Arc<dyn EventProcessor<E>>) -> Self {
        Self {
            inner,
            marker: PhantomData,
        }
    }
}

#[async_trait]
impl<E: Event> ErasedProcessor for TypedProcessor<E> {
    async fn process(&self, event: &dyn Event) -> anyhow::Result<()> {
        let event = event
            .downcast_ref::<E>()
            .ok_or_else(|| anyhow!("event is not a {}", std::any::type_name::<E>()))?;
        self.inner.process(event).await
    }
}

/// A registered processor together with the identity used to reject duplicates.
#[derive(Clone)]
pub(crate) struct ProcessorEntry {
    pub(crate) identity: usize,
    pub(crate) processor: Arc<dyn ErasedProcessor>,
}

impl ProcessorEntry {
    pub(crate) fn new<E: Event>(processor: Arc<dyn EventProcessor<E>>) -> Self {
        Self {
            identity: identity_of(&processor),
            processor: Arc::new(TypedProcessor::new(processor)),
        }
    }
}

/// Two processors are the same when they share one allocation.
pub(crate) fn identity_of<T: ?Sized>(processor: &Arc<T>) -> usize {
    Arc::as_ptr(processor) as *const () as usize
}
