//! Error types for the test event store.
//!
//! Nothing raised inside the run loop crosses the channel boundary; these
//! errors are produced on the client side, when a request cannot be answered
//! or when an expectation is not met.

use std::fmt;

use thiserror::Error;

use crate::diagnostics::PartialMatch;
use crate::event::Event;
use crate::expectation::Expectation;

/// Validation errors that occur before a command is submitted.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A helper that needs expectations got none.
    #[error("The provided expectation list is empty")]
    EmptyExpectations,

    /// A JSON frame did not decode to a command.
    #[error("Malformed command frame: {reason}")]
    MalformedFrame {
        /// Decoder message.
        reason: String,
    },
}

/// Errors talking to the run loop.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// No response within the request timeout.
    #[error("No response from event store after {duration_ms}ms, context: {context}")]
    Timeout {
        /// Command that was waiting.
        context: String,
        /// The timeout that elapsed.
        duration_ms: u64,
    },

    /// The run loop has exited.
    #[error("Event store channel disconnected, context: {context}")]
    Disconnected {
        /// Command that could not be sent or answered.
        context: String,
    },

    /// The loop answered with the wrong kind of response.
    #[error("Unexpected response '{actual}' from event store, context: {context}")]
    UnexpectedResponse {
        /// Command that was waiting.
        context: String,
        /// Name of the response received.
        actual: String,
    },

    /// The worker thread could not be started.
    #[error("Failed to spawn run loop thread: {message}")]
    Spawn {
        /// OS error text.
        message: String,
    },
}

/// An expectation about the store's contents did not hold.
#[derive(Debug, Error)]
pub enum ExpectationError {
    /// No event matched before the poll time ran out.
    #[error("No event found matching expectations: {}", ExpectationList(.expectations))]
    EventNotFound {
        /// What was expected.
        expectations: Vec<Expectation>,
    },

    /// As `EventNotFound`, with the near misses attached.
    #[error("{}", render_extended(.expectations, .partial_matches, .maximum_events_to_output, .maximum_expectations_per_event_to_output))]
    ExtendedEventNotFound {
        /// What was expected.
        expectations: Vec<Expectation>,
        /// Candidates from the last poll, ordered by event id.
        partial_matches: Vec<PartialMatch>,
        /// Candidates shown in the message.
        maximum_events_to_output: usize,
        /// Failures shown per candidate.
        maximum_expectations_per_event_to_output: usize,
    },

    /// An event that should not exist was found.
    #[error("Unexpected event found matching expectations: {}, event: {}", ExpectationList(.expectations), render_event(.event))]
    UnexpectedEventFound {
        /// What should not have matched.
        expectations: Vec<Expectation>,
        /// The offending event.
        event: Box<Event>,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum TesError {
    /// Bad input, rejected before sending.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Channel or thread failure.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// A test assertion failed.
    #[error("Expectation error: {0}")]
    Expectation(#[from] ExpectationError),

    /// Invariant violation inside the crate.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl TesError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if the store did not answer in time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Timeout { .. }))
    }

    /// Returns true if the run loop is gone.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Disconnected { .. }))
    }

    /// Returns true if an expected event was missing (plain or extended).
    #[must_use]
    pub const fn is_event_not_found(&self) -> bool {
        matches!(
            self,
            Self::Expectation(
                ExpectationError::EventNotFound { .. } | ExpectationError::ExtendedEventNotFound { .. }
            )
        )
    }

    /// Returns true if an event turned up that should not have.
    #[must_use]
    pub const fn is_unexpected_event(&self) -> bool {
        matches!(self, Self::Expectation(ExpectationError::UnexpectedEventFound { .. }))
    }

    /// The partial matches attached to an extended not-found error.
    #[must_use]
    pub fn partial_matches(&self) -> Option<&[PartialMatch]> {
        match self {
            Self::Expectation(ExpectationError::ExtendedEventNotFound { partial_matches, .. }) => {
                Some(partial_matches)
            }
            _ => None,
        }
    }
}

/// Result type alias for store operations.
pub type TesResult<T> = Result<T, TesError>;

struct ExpectationList<'a>(&'a [Expectation]);

impl fmt::Display for ExpectationList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, exp) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{exp}")?;
        }
        write!(f, "]")
    }
}

fn render_event(event: &Event) -> String {
    crate::report::render_event_line(event, None)
}

fn render_extended(
    expectations: &[Expectation],
    partial_matches: &[PartialMatch],
    maximum_events: &usize,
    maximum_expectations: &usize,
) -> String {
    let (maximum_events, maximum_expectations) = (*maximum_events, *maximum_expectations);
    let mut out = format!(
        "No event found matching expectations: {}",
        ExpectationList(expectations)
    );
    if partial_matches.is_empty() {
        out.push_str("; no candidate events passed the partial filter");
        return out;
    }

    out.push_str(&format!("; closest {} candidate event(s):", partial_matches.len()));
    for partial in partial_matches.iter().take(maximum_events) {
        out.push_str("\n  ");
        out.push_str(&render_event(&partial.event));
        for failure in partial.failures.iter().take(maximum_expectations) {
            out.push_str("\n    ");
            out.push_str(&failure.to_string());
        }
        let hidden = partial.failures.len().saturating_sub(maximum_expectations);
        if hidden > 0 {
            out.push_str(&format!("\n    ... {hidden} more failed expectation(s)"));
        }
    }
    let hidden = partial_matches.len().saturating_sub(maximum_events);
    if hidden > 0 {
        out.push_str(&format!("\n  ... {hidden} more candidate event(s)"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{FailedExpectation, FailureKind};
    use crate::event::{EventId, NewEvent};
    use crate::value::Value;

    fn candidate(id: u64, status: &str) -> PartialMatch {
        let event = Event::new(
            EventId::new(id),
            NewEvent::new("svc", "done").field("status", status).build(),
        );
        PartialMatch {
            event,
            failures: vec![
                FailedExpectation::new(
                    Expectation::eq("status", "ok"),
                    FailureKind::ComparisonFailure {
                        observed: Value::from(status),
                    },
                ),
                FailedExpectation::new(Expectation::eq("region", "eu"), FailureKind::FieldNotFound),
            ],
        }
    }

    #[test]
    fn test_validation_error_empty() {
        let err: TesError = ValidationError::EmptyExpectations.into();
        assert!(err.is_validation());
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_execution_error_timeout() {
        let err: TesError = ExecutionError::Timeout {
            context: "get_all_events".to_string(),
            duration_ms: 5000,
        }
        .into();
        assert!(err.is_execution());
        assert!(err.is_timeout());
        let msg = format!("{err}");
        assert!(msg.contains("5000ms"));
        assert!(msg.contains("get_all_events"));
    }

    #[test]
    fn test_event_not_found_lists_expectations() {
        let err: TesError = ExpectationError::EventNotFound {
            expectations: vec![Expectation::eq("event_type", "sms_sent"), Expectation::gt("n", 2)],
        }
        .into();
        assert!(err.is_event_not_found());
        assert!(err.partial_matches().is_none());
        assert!(err
            .to_string()
            .contains("[event_type == \"sms_sent\", n > 2]"));
    }

    #[test]
    fn test_extended_not_found_caps_output() {
        let err: TesError = ExpectationError::ExtendedEventNotFound {
            expectations: vec![Expectation::eq("status", "ok")],
            partial_matches: vec![candidate(0, "failed"), candidate(1, "retry"), candidate(2, "gone")],
            maximum_events_to_output: 2,
            maximum_expectations_per_event_to_output: 1,
        }
        .into();

        assert!(err.is_event_not_found());
        assert_eq!(err.partial_matches().map(<[PartialMatch]>::len), Some(3));

        let msg = err.to_string();
        assert!(msg.contains("observed \"failed\""));
        assert!(msg.contains("observed \"retry\""));
        assert!(!msg.contains("observed \"gone\""));
        assert!(msg.contains("1 more failed expectation(s)"));
        assert!(msg.contains("1 more candidate event(s)"));
    }

    #[test]
    fn test_unexpected_event_found() {
        let event = Event::new(EventId::new(9), NewEvent::new("svc", "boom").build());
        let err: TesError = ExpectationError::UnexpectedEventFound {
            expectations: vec![Expectation::eq("event_type", "boom")],
            event: Box::new(event),
        }
        .into();
        assert!(err.is_unexpected_event());
        assert!(err.to_string().contains("event_id: 9"));
    }

    #[test]
    fn test_internal_error() {
        let err = TesError::internal("unexpected state");
        assert!(!err.is_validation());
        assert!(err.to_string().contains("unexpected state"));
    }
}
