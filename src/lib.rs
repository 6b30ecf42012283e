//! # cqrs_mediator
//!
//! A small runtime for event-sourced, CQRS-style applications.
//!
//! - [`Mediator`]: an in-process bus that routes each command to its single handler, one
//!   command at a time, and fans events out to any number of processors.
//! - [`Aggregate`]: aggregates whose state is a fold over their own events, tracking the
//!   events applied since they were loaded.
//! - [`EventStore`]: an append-only store with optimistic concurrency on the aggregate version.
//!   [`TransactionalEventStore`] implements it on any transactional [`Backend`], such as the
//!   bundled [`MemoryBackend`].
//! - [`Repository`]: loads aggregates by replaying their history and saves their new events.
//! - [`TypeRegistry`]: maps the type tag stored with each event back to its concrete type.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cqrs_mediator::{
//!     Command, CommandOutcome, Mediator, MemoryBackend, TransactionalEventStore, TypeRegistry,
//! };
//!
//! #[derive(Debug)]
//! struct Greet(String);
//! impl Command for Greet {}
//!
//! async fn greet(command: Greet) -> CommandOutcome {
//!     println!("hello, {}", command.0);
//!     Ok(())
//! }
//!
//! # async fn run() -> cqrs_mediator::Result<()> {
//! let mediator = Arc::new(Mediator::new());
//! mediator.register_command_handler::<Greet, _>(greet)?;
//!
//! let store = TransactionalEventStore::new(MemoryBackend::new(), Arc::new(TypeRegistry::new()))
//!     .with_publisher(mediator.clone());
//! # let _ = store;
//!
//! let reply = mediator.dispatch_with_reply(Greet("world".into())).await?;
//! reply.await.ok();
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod event_store;
pub mod guid;
pub mod mediator;
pub mod processor;
pub mod registry;
pub mod repository;

pub use aggregate::{Aggregate, AggregateEvents, AggregateRoot};
pub use command::{Command, CommandHandler, CommandOutcome};
pub use config::MediatorConfig;
pub use envelope::{Correlation, Envelope};
pub use error::{CqrsError, Result};
pub use event::{DomainEvent, Event, EventMeta, UNASSIGNED_VERSION};
pub use event_store::{
    AggregateRecord, Backend, EventStore, MemoryBackend, Transaction, TransactionalEventStore,
    TxError,
};
pub use guid::Guid;
pub use mediator::{EventPublisher, Mediator, PublishHandle, ReplyReceiver};
pub use processor::EventProcessor;
pub use registry::{Instantiator, TypeRegistry};
pub use repository::Repository;

pub use uuid::Uuid;
