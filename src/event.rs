//! Events recorded by the store.
//!
//! An event is an open map of field name to [`Value`] plus the reserved
//! sequence id (`event_id`) that the store assigns when the event is added.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Reserved field holding the store-assigned sequence id.
pub const EVENT_ID_KEY: &str = "event_id";
/// Reserved field holding an audit entry's lifecycle state.
pub const EVENT_STATE_KEY: &str = "event_state";
/// Conventional field naming the component that emitted the event.
pub const EVENT_SOURCE_KEY: &str = "event_source";
/// Conventional field naming the kind of event.
pub const EVENT_TYPE_KEY: &str = "event_type";

/// Field names a caller can never set on an event.
pub const RESERVED_KEYS: [&str; 2] = [EVENT_ID_KEY, EVENT_STATE_KEY];

/// Caller-supplied event fields, before the store assigns an id.
pub type EventFields = BTreeMap<String, Value>;

/// Sequence id assigned by the active store.
///
/// Strictly increasing within one store lifetime and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    /// Creates an id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw sequence number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EventId> for Value {
    fn from(id: EventId) -> Self {
        i64::try_from(id.0).map_or(Self::Int(i64::MAX), Self::Int)
    }
}

/// An event held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "event_id")]
    id: EventId,
    #[serde(flatten)]
    fields: EventFields,
}

impl Event {
    /// Creates an event with an already assigned id.
    ///
    /// Reserved keys in `fields` are dropped.
    #[must_use]
    pub fn new(id: EventId, mut fields: EventFields) -> Self {
        for key in RESERVED_KEYS {
            fields.remove(key);
        }
        Self { id, fields }
    }

    /// The store-assigned sequence id.
    #[must_use]
    pub const fn id(&self) -> EventId {
        self.id
    }

    /// The caller-supplied fields (without `event_id`).
    #[must_use]
    pub const fn fields(&self) -> &EventFields {
        &self.fields
    }

    /// Looks up a field by name. `event_id` resolves to the sequence id.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Cow<'_, Value>> {
        if name == EVENT_ID_KEY {
            return Some(Cow::Owned(self.id.into()));
        }
        self.fields.get(name).map(Cow::Borrowed)
    }

    /// Returns true if the event carries the named field.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        name == EVENT_ID_KEY || self.fields.contains_key(name)
    }

    /// Convenience accessor for `event_source`.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.fields.get(EVENT_SOURCE_KEY).and_then(Value::as_str)
    }

    /// Convenience accessor for `event_type`.
    #[must_use]
    pub fn event_type(&self) -> Option<&Value> {
        self.fields.get(EVENT_TYPE_KEY)
    }
}

/// Result of a first-match lookup.
///
/// `NotFound` is a distinct tag rather than an empty event, so it can never be
/// confused with a real event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "event", rename_all = "snake_case")]
pub enum Lookup {
    /// The oldest event satisfying every expectation.
    Found(Event),
    /// No active event satisfied the expectations.
    NotFound,
}

impl Lookup {
    /// Returns true if an event was found.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Converts into an `Option`.
    #[must_use]
    pub fn into_event(self) -> Option<Event> {
        match self {
            Self::Found(event) => Some(event),
            Self::NotFound => None,
        }
    }
}

impl From<Option<Event>> for Lookup {
    fn from(event: Option<Event>) -> Self {
        event.map_or(Self::NotFound, Self::Found)
    }
}

/// Builder for the fields of a new event.
///
/// # Examples
///
/// ```
/// use tes_store::NewEvent;
///
/// let fields = NewEvent::new("mailer", "email_sent")
///     .field("to", "a@x.com")
///     .field("attempt", 1)
///     .build();
///
/// assert_eq!(fields.len(), 4);
/// ```
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    fields: EventFields,
}

impl NewEvent {
    /// Starts an event with the conventional `event_source` and `event_type` fields.
    #[must_use]
    pub fn new(source: impl Into<String>, event_type: impl Into<Value>) -> Self {
        let mut fields = EventFields::new();
        fields.insert(EVENT_SOURCE_KEY.to_string(), Value::String(source.into()));
        fields.insert(EVENT_TYPE_KEY.to_string(), event_type.into());
        Self { fields }
    }

    /// Starts an event with no fields at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any previous value.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Adds every field from `extra`, replacing existing values.
    #[must_use]
    pub fn fields(mut self, extra: EventFields) -> Self {
        self.fields.extend(extra);
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> EventFields {
        self.fields
    }
}

impl From<NewEvent> for EventFields {
    fn from(event: NewEvent) -> Self {
        event.build()
    }
}
