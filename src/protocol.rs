//! Commands accepted by the run loop and the results it sends back.
//!
//! The protocol is logical, not a network format. Both enums serialize as
//! internally tagged JSON objects so a front end (HTTP handler, pipe, ...) can
//! carry them verbatim.

use serde::{Deserialize, Serialize};

use crate::diagnostics::ExtendedLookup;
use crate::error::{TesResult, ValidationError};
use crate::event::{Event, EventFields, Lookup};
use crate::expectation::Expectation;
use crate::storage::AuditEntry;

/// Acknowledgement text sent in reply to [`Command::Reset`].
pub const RESET_ACK: &str = "event store reset";

/// A request for the run loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Stop the loop. No response.
    Shutdown,
    /// Clear both stores. Responds with [`Response::Ack`].
    Reset,
    /// Append an event. No response.
    AddEvent {
        /// Fields of the new event.
        event: EventFields,
    },
    /// Responds with [`Response::Events`].
    GetAllEvents,
    /// Responds with [`Response::EventLog`].
    GetFullEventLog,
    /// Responds with [`Response::Events`].
    GetAllMatchingEvents {
        /// Every returned event satisfies all of these.
        expectations: Vec<Expectation>,
    },
    /// Responds with [`Response::Lookup`].
    ExpectEvent {
        /// The oldest event satisfying all of these is returned.
        expectations: Vec<Expectation>,
    },
    /// Responds with [`Response::ExtendedLookup`].
    ExpectEventExtendedDebug {
        /// Full expectation set.
        expectations: Vec<Expectation>,
        /// Narrower set selecting the candidates reported on failure.
        partial_filter: Vec<Expectation>,
    },
    /// Remove one event previously returned by a lookup. No response.
    RemoveExpectedEvent {
        /// The event exactly as returned.
        event: Event,
    },
    /// Responds with [`Response::Count`].
    DeleteMatchingEvents {
        /// Every event satisfying all of these is removed.
        expectations: Vec<Expectation>,
    },
    /// A frame whose `type` is not part of the protocol. Logged and ignored.
    #[serde(other)]
    Unknown,
}

impl Command {
    /// Decodes a JSON frame.
    ///
    /// An unrecognized `type` decodes to [`Command::Unknown`]; a frame that is
    /// not a well-formed command object is a validation error.
    pub fn from_json(frame: &str) -> TesResult<Self> {
        serde_json::from_str(frame).map_err(|e| {
            ValidationError::MalformedFrame {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Encodes the command as a JSON frame.
    pub fn to_json(&self) -> TesResult<String> {
        serde_json::to_string(self).map_err(|e| {
            ValidationError::MalformedFrame {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Stable name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Reset => "reset",
            Self::AddEvent { .. } => "add_event",
            Self::GetAllEvents => "get_all_events",
            Self::GetFullEventLog => "get_full_event_log",
            Self::GetAllMatchingEvents { .. } => "get_all_matching_events",
            Self::ExpectEvent { .. } => "expect_event",
            Self::ExpectEventExtendedDebug { .. } => "expect_event_extended_debug",
            Self::RemoveExpectedEvent { .. } => "remove_expected_event",
            Self::DeleteMatchingEvents { .. } => "delete_matching_events",
            Self::Unknown => "unknown",
        }
    }

    /// Returns true if the loop sends a response for this command.
    #[must_use]
    pub const fn expects_response(&self) -> bool {
        !matches!(
            self,
            Self::Shutdown | Self::AddEvent { .. } | Self::RemoveExpectedEvent { .. } | Self::Unknown
        )
    }
}

/// A result produced by the run loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Reply to [`Command::Reset`].
    Ack {
        /// Always [`RESET_ACK`].
        message: String,
    },
    /// Active events, oldest first.
    Events {
        /// Snapshot of the matching events.
        events: Vec<Event>,
    },
    /// Reply to [`Command::GetFullEventLog`].
    EventLog {
        /// Every event ever added, in insertion order.
        entries: Vec<AuditEntry>,
    },
    /// Reply to [`Command::ExpectEvent`].
    Lookup {
        /// The oldest match, or not found.
        result: Lookup,
    },
    /// Reply to [`Command::ExpectEventExtendedDebug`].
    ExtendedLookup {
        /// The match, or the near misses.
        result: ExtendedLookup,
    },
    /// Reply to [`Command::DeleteMatchingEvents`].
    Count {
        /// Number of events removed.
        removed: usize,
    },
}

impl Response {
    /// Stable name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ack { .. } => "ack",
            Self::Events { .. } => "events",
            Self::EventLog { .. } => "event_log",
            Self::Lookup { .. } => "lookup",
            Self::ExtendedLookup { .. } => "extended_lookup",
            Self::Count { .. } => "count",
        }
    }
}
