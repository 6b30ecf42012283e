use thiserror::Error;

use crate::Guid;

#[derive(Error, Debug)]
pub enum CqrsError {
    #[error("Failed to (de)serialize event payload: {0}")]
    PayloadSerialization(#[from] serde_json::Error),

    #[error("Event store operation failed for aggregate {aggregate_id}: {source}")]
    Store {
        aggregate_id: Guid,
        #[source]
        source: anyhow::Error,
    },

    #[error("Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, {} (reload and retry)", describe_actual(.actual))]
    Concurrency {
        aggregate_id: Guid,
        expected: i64,
        /// `None` when a racing writer committed first and the winning version is unknown.
        actual: Option<i64>,
    },

    #[error("Aggregate '{0}' not found")]
    AggregateNotFound(Guid),

    #[error("Event type '{0}' is not registered")]
    TypeNotRegistered(String),

    #[error("A {kind} is already registered for '{type_name}'")]
    DuplicateRegistration {
        kind: &'static str,
        type_name: &'static str,
    },

    #[error("Failed to register {} processor(s) for event '{event_type}'", .errors.len())]
    ProcessorRegistration {
        event_type: &'static str,
        errors: Vec<CqrsError>,
    },

    #[error("No handler registered for command '{0}'")]
    NoHandler(&'static str),

    #[error("No processor registered for event '{0}'")]
    NoProcessor(&'static str),

    #[error("Command handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Mediator is closed and no longer accepts commands")]
    MediatorClosed,
}

impl CqrsError {
    /// Whether the caller may reload the aggregate and retry the operation.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

fn describe_actual(actual: &Option<i64>) -> String {
    match actual {
        Some(-1) => "found an empty stream".to_string(),
        Some(version) => format!("found {version}"),
        None => "lost the race to a concurrent writer".to_string(),
    }
}

// Result alias within the library
pub type Result<T, E = CqrsError> = std::result::Result<T, E>;
