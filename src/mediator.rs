use std::{
    any::{Any, TypeId},
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::Duration,
};

use anyhow::anyhow;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    Command, CommandHandler, CommandOutcome, CqrsError, Event, EventProcessor, MediatorConfig,
    Result,
    command::{ErasedCommandHandler, TypedCommandHandler},
    config::induce_delay,
    processor::{ProcessorEntry, identity_of},
};

/// The receiving half of a command's reply channel.
pub type ReplyReceiver = oneshot::Receiver<CommandOutcome>;

/// Something that fans events out to processors.
///
/// [`TransactionalEventStore::with_publisher`](crate::TransactionalEventStore::with_publisher)
/// takes one to publish events after they are committed.
pub trait EventPublisher: Send + Sync {
    fn publish_event(&self, event: Arc<dyn Event>) -> Result<PublishHandle>;
}

/// The processor tasks spawned by one asynchronous publish.
#[must_use = "dropping a PublishHandle detaches the processor tasks"]
#[derive(Debug, Default)]
pub struct PublishHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl PublishHandle {
    /// Number of processors the event was handed to.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits until every processor has finished with the event.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(%err, "event processor task failed");
            }
        }
    }
}

struct QueuedCommand {
    type_name: &'static str,
    command: Box<dyn Any + Send>,
    handler: Arc<dyn ErasedCommandHandler>,
    reply: Option<oneshot::Sender<CommandOutcome>>,
}

/// In-process command and event bus.
///
/// Commands are routed to exactly one handler per command type and processed one at a time, in
/// submission order, by a single worker task. Events are fanned out to every processor
/// registered for their type, either concurrently ([`Mediator::publish`]) or in registration
/// order on the caller's task ([`Mediator::publish_sync`]).
///
/// Handlers usually need the mediator themselves (to publish events), so it is typically shared
/// behind an [`Arc`].
pub struct Mediator {
    command_handlers: RwLock<HashMap<TypeId, Arc<dyn ErasedCommandHandler>>>,
    event_processors: RwLock<HashMap<TypeId, Vec<ProcessorEntry>>>,
    queue: Mutex<Option<mpsc::Sender<QueuedCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: MediatorConfig,
}

impl Mediator {
    /// Creates a mediator with the default configuration and starts its worker.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn new() -> Self {
        Self::with_config(MediatorConfig::default())
    }

    /// Creates a mediator and starts its worker.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn with_config(config: MediatorConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.effective_capacity());
        let worker = tokio::spawn(run_worker(receiver, config.induced_delay));

        tracing::debug!(
            queue_capacity = config.effective_capacity(),
            induced_delay = ?config.induced_delay,
            "started mediator"
        );

        Self {
            command_handlers: RwLock::default(),
            event_processors: RwLock::default(),
            queue: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            config,
        }
    }

    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    /// Registers the handler for commands of type `C`.
    ///
    /// A command type has at most one handler; registering a second one fails and keeps the
    /// first in place.
    pub fn register_command_handler<C, H>(&self, handler: H) -> Result<()>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let type_name = std::any::type_name::<C>();
        let mut handlers = self
            .command_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match handlers.entry(TypeId::of::<C>()) {
            Entry::Occupied(_) => Err(CqrsError::DuplicateRegistration {
                kind: "command handler",
                type_name,
            }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(TypedCommandHandler::new(handler)));
                tracing::info!(command = type_name, "registered command handler");
                Ok(())
            }
        }
    }

    /// Subscribes `processor` to events of type `E`.
    ///
    /// Registering the same `Arc` twice for one event type fails without side effects.
    pub fn register_event_processor<E: Event>(
        &self,
        processor: Arc<dyn EventProcessor<E>>,
    ) -> Result<()> {
        let type_name = std::any::type_name::<E>();
        let mut processors = self
            .event_processors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let registered = processors.entry(TypeId::of::<E>()).or_default();

        if registered
            .iter()
            .any(|entry| entry.identity == identity_of(&processor))
        {
            return Err(CqrsError::DuplicateRegistration {
                kind: "event processor",
                type_name,
            });
        }

        registered.push(ProcessorEntry::new(processor));
        tracing::info!(
            event = type_name,
            processors = registered.len(),
            "registered event processor"
        );
        Ok(())
    }

    /// Subscribes every processor in `processors` to events of type `E`.
    ///
    /// Processors that can be registered are, even when others fail; the failures are reported
    /// together.
    pub fn register_event_processors<E: Event>(
        &self,
        processors: impl IntoIterator<Item = Arc<dyn EventProcessor<E>>>,
    ) -> Result<()> {
        let errors: Vec<CqrsError> = processors
            .into_iter()
            .filter_map(|processor| self.register_event_processor(processor).err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CqrsError::ProcessorRegistration {
                event_type: std::any::type_name::<E>(),
                errors,
            })
        }
    }

    fn command_handler<C: Command>(&self) -> Result<Arc<dyn ErasedCommandHandler>> {
        self.command_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<C>())
            .cloned()
            .ok_or(CqrsError::NoHandler(std::any::type_name::<C>()))
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<QueuedCommand>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `command` for its handler.
    ///
    /// Returns once the command is accepted by the queue, not once it is handled. When `reply`
    /// is given, the worker sends the handler's outcome through it. Commands without a handler
    /// are rejected immediately and never queued.
    pub async fn dispatch<C: Command>(
        &self,
        command: C,
        reply: Option<oneshot::Sender<CommandOutcome>>,
    ) -> Result<()> {
        let type_name = std::any::type_name::<C>();
        let handler = self.command_handler::<C>()?;
        let queue = self.sender().clone().ok_or(CqrsError::MediatorClosed)?;

        tracing::info!(command = type_name, "dispatching command");

        queue
            .send(QueuedCommand {
                type_name,
                command: Box::new(command),
                handler,
                reply,
            })
            .await
            .map_err(|_| CqrsError::MediatorClosed)
    }

    /// Queues `command` and returns the receiver its outcome will be sent to.
    pub async fn dispatch_with_reply<C: Command>(&self, command: C) -> Result<ReplyReceiver> {
        let (reply, receiver) = oneshot::channel();
        self.dispatch(command, Some(reply)).await?;
        Ok(receiver)
    }

    /// Runs the handler of `command` on the caller's task and returns its outcome.
    ///
    /// Bypasses the queue, so it is not ordered with respect to dispatched commands.
    pub async fn dispatch_sync<C: Command>(&self, command: C) -> Result<()> {
        let handler = self.command_handler::<C>()?;

        tracing::info!(command = std::any::type_name::<C>(), "handling command inline");
        induce_delay(self.config.induced_delay).await;

        handler
            .handle(Box::new(command))
            .await
            .map_err(CqrsError::Handler)
    }

    /// Hands `event` to every processor of its type, each on its own task.
    ///
    /// Returns as soon as the tasks are spawned; await the returned handle to wait for them.
    /// Processor failures are logged and otherwise dropped.
    pub fn publish<E: Event>(&self, event: E) -> Result<PublishHandle> {
        self.publish_dyn(Arc::new(event))
    }

    /// [`Mediator::publish`] for an event whose type is only known at runtime.
    pub fn publish_dyn(&self, event: Arc<dyn Event>) -> Result<PublishHandle> {
        let processors = self.processors_for(event.as_ref())?;
        let delay = self.config.induced_delay;

        tracing::info!(
            event = event.event_type(),
            processors = processors.len(),
            "publishing event"
        );

        let tasks = processors
            .into_iter()
            .map(|entry| {
                let event = Arc::clone(&event);
                tokio::spawn(async move {
                    induce_delay(delay).await;
                    if let Err(err) = entry.processor.process(event.as_ref()).await {
                        tracing::warn!(event = event.event_type(), error = %err, "event processor failed");
                    }
                })
            })
            .collect();

        Ok(PublishHandle { tasks })
    }

    /// Hands `event` to every processor of its type, one after another in registration order,
    /// on the caller's task.
    ///
    /// A failing processor is logged and does not stop the others.
    pub async fn publish_sync<E: Event>(&self, event: E) -> Result<()> {
        let processors = self.processors_for(&event)?;

        tracing::info!(
            event = event.event_type(),
            processors = processors.len(),
            "publishing event inline"
        );

        for entry in processors {
            induce_delay(self.config.induced_delay).await;
            if let Err(err) = entry.processor.process(&event).await {
                tracing::warn!(event = event.event_type(), error = %err, "event processor failed");
            }
        }

        Ok(())
    }

    fn processors_for(&self, event: &dyn Event) -> Result<Vec<ProcessorEntry>> {
        let processors = self
            .event_processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Any::type_id(event.as_any()))
            .cloned()
            .unwrap_or_default();

        if processors.is_empty() {
            return Err(CqrsError::NoProcessor(event.event_type()));
        }
        Ok(processors)
    }

    /// Stops accepting commands and waits for the worker to finish the ones already queued.
    ///
    /// Later dispatches fail with [`CqrsError::MediatorClosed`]; publishing keeps working.
    pub async fn shutdown(&self) {
        self.sender().take();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                tracing::error!(%err, "command worker failed");
            }
        }
        tracing::debug!("mediator shut down");
    }
}

impl Default for Mediator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for Mediator {
    fn publish_event(&self, event: Arc<dyn Event>) -> Result<PublishHandle> {
        self.publish_dyn(event)
    }
}

async fn run_worker(mut queue: mpsc::Receiver<QueuedCommand>, delay: Option<Duration>) {
    while let Some(QueuedCommand {
        type_name,
        command,
        handler,
        reply,
    }) = queue.recv().await
    {
        induce_delay(delay).await;

        // a panicking handler must not take the worker down with it
        let outcome = match tokio::spawn(async move { handler.handle(command).await }).await {
            Ok(outcome) => outcome,
            Err(err) => Err(anyhow!("command handler did not complete: {err}")),
        };

        match &outcome {
            Ok(()) => tracing::debug!(command = type_name, "handled command"),
            Err(err) => tracing::warn!(command = type_name, error = %err, "command handler failed"),
        }

        if let Some(reply) = reply {
            // the caller may have stopped listening
            let _ = reply.send(outcome);
        }
    }

    tracing::debug!("command queue closed");
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::EventMeta;

    #[derive(Debug)]
    struct Ping;
    impl Command for Ping {}

    #[derive(Debug)]
    struct Unhandled;
    impl Command for Unhandled {}

    #[derive(Debug)]
    struct Explode;
    impl Command for Explode {}

    #[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
    struct Pinged {
        #[serde(flatten)]
        meta: EventMeta,
    }
    crate::domain_event!(Pinged);

    #[derive(Default)]
    struct Counter {
        seen: Mutex<usize>,
    }

    #[async_trait]
    impl EventProcessor<Pinged> for Counter {
        async fn process(&self, _event: &Pinged) -> anyhow::Result<()> {
            *self.seen.lock().unwrap() += 1;
            Ok(())
        }
    }

    async fn ok_handler(_: Ping) -> CommandOutcome {
        Ok(())
    }

    async fn failing_handler(_: Ping) -> CommandOutcome {
        Err(anyhow!("must never run"))
    }

    async fn exploding_handler(_: Explode) -> CommandOutcome {
        panic!("boom")
    }

    #[tokio::test]
    async fn second_command_handler_is_rejected() {
        let mediator = Mediator::new();

        mediator
            .register_command_handler::<Ping, _>(ok_handler)
            .unwrap();
        let err = mediator
            .register_command_handler::<Ping, _>(failing_handler)
            .unwrap_err();

        assert!(matches!(
            err,
            CqrsError::DuplicateRegistration {
                kind: "command handler",
                ..
            }
        ));
        assert!(mediator.dispatch_sync(Ping).await.is_ok());
    }

    #[tokio::test]
    async fn same_processor_is_registered_once() {
        let mediator = Mediator::new();
        let counter = Arc::new(Counter::default());

        mediator
            .register_event_processor::<Pinged>(counter.clone())
            .unwrap();
        let err = mediator
            .register_event_processor::<Pinged>(counter.clone())
            .unwrap_err();
        assert!(matches!(err, CqrsError::DuplicateRegistration { .. }));

        mediator.publish_sync(Pinged::default()).await.unwrap();
        assert_eq!(*counter.seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn grouped_registration_reports_every_failure() {
        let mediator = Mediator::new();
        let first: Arc<dyn EventProcessor<Pinged>> = Arc::new(Counter::default());
        let second: Arc<dyn EventProcessor<Pinged>> = Arc::new(Counter::default());

        let err = mediator
            .register_event_processors::<Pinged>([
                first.clone(),
                first.clone(),
                second.clone(),
                second,
            ])
            .unwrap_err();

        match err {
            CqrsError::ProcessorRegistration { errors, .. } => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(mediator.publish(Pinged::default()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unrouted_messages_are_rejected() {
        let mediator = Mediator::new();

        assert!(matches!(
            mediator.dispatch(Unhandled, None).await,
            Err(CqrsError::NoHandler(_))
        ));
        assert!(matches!(
            mediator.dispatch_sync(Unhandled).await,
            Err(CqrsError::NoHandler(_))
        ));
        assert!(matches!(
            mediator.publish(Pinged::default()),
            Err(CqrsError::NoProcessor("Pinged"))
        ));
        assert!(matches!(
            mediator.publish_sync(Pinged::default()).await,
            Err(CqrsError::NoProcessor(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_fails() {
        let mediator = Mediator::new();
        mediator
            .register_command_handler::<Ping, _>(ok_handler)
            .unwrap();

        mediator.shutdown().await;

        assert!(matches!(
            mediator.dispatch(Ping, None).await,
            Err(CqrsError::MediatorClosed)
        ));
    }

    #[tokio::test]
    async fn panicking_handler_reports_an_error_and_keeps_the_worker() {
        let mediator = Mediator::new();
        mediator
            .register_command_handler::<Explode, _>(exploding_handler)
            .unwrap();
        mediator
            .register_command_handler::<Ping, _>(ok_handler)
            .unwrap();

        let failed = mediator.dispatch_with_reply(Explode).await.unwrap();
        let handled = mediator.dispatch_with_reply(Ping).await.unwrap();

        assert!(failed.await.unwrap().is_err());
        assert!(handled.await.unwrap().is_ok());
    }
}
