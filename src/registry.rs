use std::collections::HashMap;

use crate::{CqrsError, DomainEvent, Event, Result};

/// Allocates and populates instances of one concrete event type.
#[derive(Clone, Copy)]
pub struct Instantiator {
    type_tag: &'static str,
    zero: fn() -> Box<dyn Event>,
    decode: fn(&str) -> serde_json::Result<Box<dyn Event>>,
}

impl Instantiator {
    fn of<E: DomainEvent>() -> Self {
        Self {
            type_tag: E::EVENT_TYPE,
            zero: zero_of::<E>,
            decode: decode_as::<E>,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// A zero-valued instance of the event type.
    ///
    /// Convenience for callers that fill events in by hand; the store's read path uses
    /// [`Instantiator::decode`], and aggregates are hydrated from `Default` instead.
    pub fn instantiate(&self) -> Box<dyn Event> {
        (self.zero)()
    }

    /// Deserializes `body` into a new instance of the event type.
    pub fn decode(&self, body: &str) -> Result<Box<dyn Event>> {
        Ok((self.decode)(body)?)
    }
}

fn zero_of<E: DomainEvent>() -> Box<dyn Event> {
    Box::new(E::default())
}

fn decode_as<E: DomainEvent>(body: &str) -> serde_json::Result<Box<dyn Event>> {
    Ok(Box::new(serde_json::from_str::<E>(body)?))
}

impl std::fmt::Debug for Instantiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instantiator")
            .field("type_tag", &self.type_tag)
            .finish()
    }
}

/// The `TypeRegistry` maps event type tags to the concrete event types behind them.
///
/// Envelopes only carry a string tag and an opaque body, so the store layer needs this
/// registry to recover concrete events without knowing the domain's event set. The registry
/// is populated once at startup and then shared (read-only) with the stores that need it.
///
/// ```rust
/// use cqrs_mediator::{domain_event, EventMeta, TypeRegistry};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// struct ItemCreated {
///     #[serde(flatten)]
///     meta: EventMeta,
/// }
/// domain_event!(ItemCreated);
///
/// let mut registry = TypeRegistry::new();
/// registry.register::<ItemCreated>();
/// assert!(registry.resolve("ItemCreated").is_ok());
/// ```
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    entries: HashMap<&'static str, Instantiator>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` under its own type tag. Registering the same tag again overwrites it.
    pub fn register<E: DomainEvent>(&mut self) -> &mut Self {
        if self
            .entries
            .insert(E::EVENT_TYPE, Instantiator::of::<E>())
            .is_some()
        {
            tracing::debug!(event_type = E::EVENT_TYPE, "overwriting registered event type");
        }
        self
    }

    /// Registers the type of `exemplar`, deriving the tag from the value itself.
    pub fn register_exemplar<E: DomainEvent>(&mut self, exemplar: &E) -> &mut Self {
        debug_assert_eq!(exemplar.event_type(), E::EVENT_TYPE);
        self.register::<E>()
    }

    /// Looks up the instantiator for `tag`.
    pub fn resolve(&self, tag: &str) -> Result<&Instantiator> {
        self.entries
            .get(tag)
            .ok_or_else(|| CqrsError::TypeNotRegistered(tag.to_string()))
    }

    /// Decodes a serialized body of the event type registered under `tag`.
    pub fn decode(&self, tag: &str, body: &str) -> Result<Box<dyn Event>> {
        self.resolve(tag)?.decode(body)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
