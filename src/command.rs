use std::{any::Any, fmt::Debug, future::Future, marker::PhantomData};

use anyhow::anyhow;
use async_trait::async_trait;

/// What a command handler reports back: success, or the error it failed with.
pub type CommandOutcome = anyhow::Result<()>;

/// The `Command` trait marks a request to change state.
///
/// Commands are routed by their concrete type: the [`Mediator`](crate::Mediator) holds at
/// most one [`CommandHandler`] per command type.
pub trait Command: Debug + Send + 'static {}

/// Handles one command type.
///
/// Any `Fn(C) -> impl Future<Output = CommandOutcome>` closure is a handler too.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    async fn handle(&self, command: C) -> CommandOutcome;
}

#[async_trait]
impl<C, F, Fut> CommandHandler<C> for F
where
    C: Command,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CommandOutcome> + Send,
{
    async fn handle(&self, command: C) -> CommandOutcome {
        (self)(command).await
    }
}

/// A command handler with its command type erased, as stored by the mediator.
#[async_trait]
pub(crate) trait ErasedCommandHandler: Send + Sync {
    async fn handle(&self, command: Box<dyn Any + Send>) -> CommandOutcome;
}

pub(crate) struct TypedCommandHandler<C, H> {
    handler: H,
    marker: PhantomData<fn(C)>,
}

impl<C, H> TypedCommandHandler<C, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, H> ErasedCommandHandler for TypedCommandHandler<C, H>
where
    C: Command,
    H: CommandHandler<C>,
{
    async fn handle(&self, command: Box<dyn Any + Send>) -> CommandOutcome {
        let command = command
            .downcast::<C>()
            .map_err(|_| anyhow!("command is not a {}", std::any::type_name::<C>()))?;
        self.handler.handle(*command).await
    }
}
