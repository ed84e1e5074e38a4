//! Partial-match diagnostics for failed expectations.
//!
//! When no event satisfies a full expectation set, the extended lookup reports
//! every candidate that passed a narrower filter, together with the
//! expectations it failed and why.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::{Event, Lookup};
use crate::expectation::Expectation;
use crate::value::Value;

/// Why a single expectation did not hold for a candidate event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The event does not carry the field.
    FieldNotFound,
    /// The field is present but the comparison did not hold. Incomparable
    /// types are reported here too.
    ComparisonFailure {
        /// The event's actual value for the field.
        observed: Value,
    },
}

/// One failed expectation against one candidate event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedExpectation {
    /// The expectation that failed.
    pub expectation: Expectation,
    /// How it failed.
    #[serde(flatten)]
    pub kind: FailureKind,
}

impl FailedExpectation {
    /// Pairs an expectation with how it failed.
    #[must_use]
    pub const fn new(expectation: Expectation, kind: FailureKind) -> Self {
        Self { expectation, kind }
    }

    /// The observed value, if the field was present.
    #[must_use]
    pub const fn observed(&self) -> Option<&Value> {
        match &self.kind {
            FailureKind::FieldNotFound => None,
            FailureKind::ComparisonFailure { observed } => Some(observed),
        }
    }
}

impl fmt::Display for FailedExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::FieldNotFound => write!(
                f,
                "field '{}' not found (expected {})",
                self.expectation.field_name, self.expectation
            ),
            FailureKind::ComparisonFailure { observed } => write!(
                f,
                "expected {}, observed {}",
                self.expectation, observed
            ),
        }
    }
}

/// A candidate event and the expectations it failed, in expectation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialMatch {
    /// The candidate.
    pub event: Event,
    /// Expectations it did not meet.
    pub failures: Vec<FailedExpectation>,
}

impl PartialMatch {
    /// Tests every expectation against `event` and collects the failures.
    #[must_use]
    pub fn evaluate(event: &Event, expectations: &[Expectation]) -> Self {
        let failures = expectations.iter().filter_map(|e| e.check(event)).collect();
        Self {
            event: event.clone(),
            failures,
        }
    }
}

/// Result of an extended lookup.
///
/// `partial_matches` is empty whenever `event` is found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedLookup {
    /// The oldest full match, if any.
    pub event: Lookup,
    /// Candidates selected by the partial filter, with their failures.
    pub partial_matches: Vec<PartialMatch>,
}

impl ExtendedLookup {
    /// A full match; no candidates are reported.
    #[must_use]
    pub const fn found(event: Event) -> Self {
        Self {
            event: Lookup::Found(event),
            partial_matches: Vec::new(),
        }
    }

    /// No full match.
    #[must_use]
    pub const fn not_found(partial_matches: Vec<PartialMatch>) -> Self {
        Self {
            event: Lookup::NotFound,
            partial_matches,
        }
    }
}
