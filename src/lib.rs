//! # tes-store - an in-process test event store
//!
//! Systems under test report events (schema-free key/value records) into the
//! store; test code then asserts on them with expectations such as
//! "an event with `event_type == "email_sent"` and `to == "a@x.com"` arrives
//! within five seconds", or "no event with `event_type == "error"` shows up".
//!
//! ## Core Concepts
//!
//! - **Event**: a map of field name to [`Value`], stamped with a monotonic [`EventId`]
//! - **Expectation**: a `(field, operator, value)` predicate over one event field
//! - **Active store**: live events, in arrival order; a successful expectation removes its event
//! - **Audit log**: every event ever added, tagged `Active`, `Expected` or `Deleted`
//! - **Run loop**: a dedicated thread that owns both stores and serves [`Command`]s
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tes_store::{EventStoreClient, ExpectOptions, Expectation, NewEvent};
//!
//! let mut client = EventStoreClient::with_defaults()?;
//! let producer = client.producer();
//!
//! producer.add_event(NewEvent::new("mailer", "email_sent").field("to", "a@x.com"))?;
//!
//! let event = client.expect_event(
//!     &[Expectation::eq("event_type", "email_sent"), Expectation::eq("to", "a@x.com")],
//!     &ExpectOptions::default().within(Duration::from_secs(1)),
//! )?;
//! assert_eq!(event.source(), Some("mailer"));
//! # Ok::<(), tes_store::TesError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod comparator;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod expectation;
pub mod value;

// Store and run loop
pub mod protocol;
pub mod runtime;
pub mod storage;

// Client side
pub mod client;
pub mod report;
pub mod telemetry;

pub use client::{ClientConfig, EventProducer, EventStoreClient, ExpectOptions, OnFailure};
pub use comparator::{compare, Comparison, Operator};
pub use diagnostics::{ExtendedLookup, FailedExpectation, FailureKind, PartialMatch};
pub use error::{ExecutionError, ExpectationError, TesError, TesResult, ValidationError};
pub use event::{Event, EventFields, EventId, Lookup, NewEvent};
pub use expectation::{matches_all, Expectation};
pub use protocol::{Command, Response};
pub use report::LogOptions;
pub use runtime::{LoopExit, LoopState, RunLoop, RunLoopConfig, RunLoopHandle};
pub use storage::{ActiveStore, AuditEntry, AuditLog, LifecycleState};
pub use value::Value;
