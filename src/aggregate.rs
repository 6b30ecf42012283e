use crate::{Event, Guid, UNASSIGNED_VERSION};

/// The base state every aggregate composes: its id, its version and the events applied since
/// it was last saved.
#[derive(Debug)]
pub struct AggregateRoot {
    id: Guid,
    version: i64,
    changes: Vec<Box<dyn Event>>,
}

impl Default for AggregateRoot {
    fn default() -> Self {
        Self {
            id: Guid::nil(),
            version: UNASSIGNED_VERSION,
            changes: Vec::new(),
        }
    }
}

impl AggregateRoot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Guid {
        self.id
    }

    pub fn set_id(&mut self, id: Guid) {
        self.id = id;
    }

    /// The version of the last persisted event folded into the aggregate, `-1` if none.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    pub fn uncommitted_events(&self) -> &[Box<dyn Event>] {
        &self.changes
    }

    pub fn uncommitted_events_mut(&mut self) -> &mut [Box<dyn Event>] {
        &mut self.changes
    }

    /// Drains the uncommitted events after the store accepted them, advancing the version to
    /// the last one assigned.
    pub fn mark_committed(&mut self) -> Vec<Box<dyn Event>> {
        if let Some(last) = self.changes.last() {
            if last.version() != UNASSIGNED_VERSION {
                self.version = last.version();
            }
        }
        std::mem::take(&mut self.changes)
    }

    fn record(&mut self, event: Box<dyn Event>) {
        self.changes.push(event);
    }
}

/// The closed set of events an aggregate knows how to fold.
///
/// Usually generated with [`aggregate_events!`](crate::aggregate_events).
pub trait AggregateEvents: Sized {
    /// Recognizes `event`, returning `None` for event types outside this set.
    fn from_event(event: &dyn Event) -> Option<Self>;
}

/// The `Aggregate` trait defines the behavior of an aggregate, whose state is derived entirely
/// from its own event history.
///
/// An implementation supplies the fold ([`Aggregate::apply`]) over its own event sum type and
/// access to its [`AggregateRoot`]; everything else is provided:
///
/// - [`Aggregate::apply_change`] folds a new event and records it as uncommitted, for use
///   while handling a command;
/// - [`Aggregate::apply_from_history`] folds a persisted event without recording it, for
///   hydration from the store.
///
/// Events the aggregate does not recognize are ignored, so older code keeps replaying streams
/// that contain newer event types.
pub trait Aggregate: Default + Send + Sync + 'static {
    /// The events this aggregate can fold.
    type Event: AggregateEvents;

    /// The aggregate type name recorded on every envelope.
    const AGGREGATE_TYPE: &'static str;

    fn root(&self) -> &AggregateRoot;

    fn root_mut(&mut self) -> &mut AggregateRoot;

    /// Folds one recognized event into the aggregate's state.
    fn apply(&mut self, event: &Self::Event);

    fn id(&self) -> Guid {
        self.root().id()
    }

    fn version(&self) -> i64 {
        self.root().version()
    }

    fn uncommitted_events(&self) -> &[Box<dyn Event>] {
        self.root().uncommitted_events()
    }

    /// Applies a new event: folds it and records it as uncommitted.
    fn apply_change<E: Event>(&mut self, event: E) {
        self.apply_change_boxed(Box::new(event));
    }

    fn apply_change_boxed(&mut self, event: Box<dyn Event>) {
        self.fold(event.as_ref());
        self.root_mut().record(event);
    }

    /// Applies a persisted event: folds it and moves the version forward.
    fn apply_from_history(&mut self, event: &dyn Event) {
        self.fold(event);
        if event.version() != UNASSIGNED_VERSION {
            self.root_mut().set_version(event.version());
        }
    }

    /// Replays a full history, which must be in ascending version order.
    fn load_from_history(&mut self, events: &[Box<dyn Event>]) {
        for event in events {
            self.apply_from_history(event.as_ref());
        }
    }

    /// Dispatches `event` to [`Aggregate::apply`] when it belongs to [`Aggregate::Event`].
    fn fold(&mut self, event: &dyn Event) {
        if let Some(event) = <Self::Event as AggregateEvents>::from_event(event) {
            self.apply(&event);
        }
    }
}

/// Declares the event sum type of an aggregate and implements [`AggregateEvents`] for it.
///
/// Each variant wraps one concrete event type; incoming events are matched by downcasting and
/// anything else is not recognized.
///
/// ```rust
/// use cqrs_mediator::{aggregate_events, domain_event, EventMeta};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// struct Opened { #[serde(flatten)] meta: EventMeta }
/// domain_event!(Opened);
///
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// struct Closed { #[serde(flatten)] meta: EventMeta }
/// domain_event!(Closed);
///
/// aggregate_events! {
///     #[derive(Debug)]
///     pub enum DoorEvent {
///         Opened(Opened),
///         Closed(Closed),
///     }
/// }
/// ```
#[macro_export]
macro_rules! aggregate_events {
    (
        $(#[$attr: meta])*
        $vis: vis enum $Name: ident {
            $($Variant: ident($Event: ty)),* $(,)?
        }
    ) => {
        $(#[$attr])*
        $vis enum $Name {
            $($Variant($Event),)*
        }

        impl $crate::AggregateEvents for $Name {
            fn from_event(event: &dyn $crate::Event) -> Option<Self> {
                $(
                    if let Some(inner) = event.downcast_ref::<$Event>() {
                        return Some($Name::$Variant(::std::clone::Clone::clone(inner)));
                    }
                )*
                None
            }
        }
    };
}
