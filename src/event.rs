use std::{any::Any, fmt::Debug};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Guid, Result};

/// Logical version carried by an event that the store has not accepted yet.
pub const UNASSIGNED_VERSION: i64 = -1;

/// Identity and logical version shared by every event.
///
/// Concrete events embed this struct (usually `#[serde(flatten)]`) and expose
/// it through [`DomainEvent::meta`]. The version stays at
/// [`UNASSIGNED_VERSION`] until the event store assigns one on save.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// The ID of the event.
    pub message_id: Guid,

    /// The logical version of the event inside its aggregate stream.
    pub version: i64,
}

impl EventMeta {
    /// Metadata for a freshly created event: new id, no version yet.
    pub fn new() -> Self {
        Self {
            message_id: Guid::new(),
            version: UNASSIGNED_VERSION,
        }
    }
}

// The zero value, used when the type registry allocates an empty instance.
impl Default for EventMeta {
    fn default() -> Self {
        Self {
            message_id: Guid::nil(),
            version: UNASSIGNED_VERSION,
        }
    }
}

/// The `DomainEvent` trait is implemented by every concrete event type.
///
/// `EVENT_TYPE` is the type tag written to each envelope; the [`TypeRegistry`](crate::TypeRegistry)
/// maps it back to this type when events are read from the store. Most types implement this
/// trait through the [`domain_event!`](crate::domain_event) macro, which uses the type's own name
/// as the tag.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Clone + Debug + Default + Send + Sync + 'static
{
    /// The type tag of this event.
    const EVENT_TYPE: &'static str;

    fn meta(&self) -> &EventMeta;

    fn meta_mut(&mut self) -> &mut EventMeta;
}

/// The object-safe capability set of an event, as handled by stores, aggregates and the
/// mediator without knowing the concrete type.
///
/// Every [`DomainEvent`] implements it through a blanket impl.
pub trait Event: Debug + Send + Sync + 'static {
    fn event_id(&self) -> Guid;

    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    /// The type tag used to recover the concrete type from an envelope.
    fn event_type(&self) -> &'static str;

    /// Serializes the event body.
    fn to_body(&self) -> Result<String>;

    fn as_any(&self) -> &dyn Any;

    fn clone_event(&self) -> Box<dyn Event>;
}

impl<T: DomainEvent> Event for T {
    fn event_id(&self) -> Guid {
        self.meta().message_id
    }

    fn version(&self) -> i64 {
        self.meta().version
    }

    fn set_version(&mut self, version: i64) {
        self.meta_mut().version = version;
    }

    fn event_type(&self) -> &'static str {
        T::EVENT_TYPE
    }

    fn to_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_event(&self) -> Box<dyn Event> {
        Box::new(self.clone())
    }
}

impl dyn Event {
    /// Returns the concrete event if it is of type `T`.
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Event>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl Clone for Box<dyn Event> {
    fn clone(&self) -> Self {
        self.clone_event()
    }
}

/// Implements [`DomainEvent`] for a struct that holds its [`EventMeta`] in a field named `meta`.
///
/// The type tag defaults to the type's own name; pass a string literal to override it.
///
/// ```rust
/// use cqrs_mediator::{domain_event, EventMeta};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// struct ItemCreated {
///     #[serde(flatten)]
///     meta: EventMeta,
///     name: String,
/// }
///
/// domain_event!(ItemCreated);
/// ```
#[macro_export]
macro_rules! domain_event {
    ($evt: ident) => {
        $crate::domain_event!($evt, stringify!($evt));
    };
    ($evt: ident, $tag: expr) => {
        impl $crate::DomainEvent for $evt {
            const EVENT_TYPE: &'static str = $tag;

            fn meta(&self) -> &$crate::EventMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $crate::EventMeta {
                &mut self.meta
            }
        }
    };
}
