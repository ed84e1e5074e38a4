//! Expectations: single-field predicates over events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::comparator::{compare, Operator};
use crate::diagnostics::{FailedExpectation, FailureKind};
use crate::event::Event;
use crate::value::Value;

/// A predicate on one event field.
///
/// An event missing the field never matches. Combine several expectations in a
/// slice to require all of them; there is no built-in OR.
///
/// # Examples
///
/// ```
/// use tes_store::{Expectation, Operator};
///
/// let exp = Expectation::new("status", Operator::In, vec!["ok", "retry"]);
/// assert_eq!(exp.to_string(), "status in [\"ok\", \"retry\"]");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    /// Name of the event field to test.
    pub field_name: String,
    /// Comparison applied as `observed <op> value`.
    pub operator: Operator,
    /// Right-hand operand.
    pub value: Value,
}

impl Expectation {
    /// Creates an expectation.
    #[must_use]
    pub fn new(field_name: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field_name: field_name.into(),
            operator,
            value: value.into(),
        }
    }

    /// `field == value`.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn eq(field_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field_name, Operator::Eq, value)
    }

    /// `field != value`.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn ne(field_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field_name, Operator::Ne, value)
    }

    /// `field > value`.
    #[must_use]
    pub fn gt(field_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field_name, Operator::Gt, value)
    }

    /// `field >= value`.
    #[must_use]
    pub fn gte(field_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field_name, Operator::Gte, value)
    }

    /// `field < value`.
    #[must_use]
    pub fn lt(field_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field_name, Operator::Lt, value)
    }

    /// `field <= value`.
    #[must_use]
    pub fn lte(field_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field_name, Operator::Lte, value)
    }

    /// Field is a member of `allowed` (list membership or substring).
    #[must_use]
    pub fn is_in(field_name: impl Into<String>, allowed: impl Into<Value>) -> Self {
        Self::new(field_name, Operator::In, allowed)
    }

    /// Field is not a member of `excluded`.
    #[must_use]
    pub fn not_in(field_name: impl Into<String>, excluded: impl Into<Value>) -> Self {
        Self::new(field_name, Operator::NotIn, excluded)
    }

    /// Returns true if the event has the field and the comparison holds.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        event
            .field(&self.field_name)
            .is_some_and(|observed| compare(self.operator, &observed, &self.value).is_match())
    }

    /// Tests the expectation, describing the failure if it does not hold.
    #[must_use]
    pub fn check(&self, event: &Event) -> Option<FailedExpectation> {
        let Some(observed) = event.field(&self.field_name) else {
            return Some(FailedExpectation::new(self.clone(), FailureKind::FieldNotFound));
        };

        if compare(self.operator, &observed, &self.value).is_match() {
            None
        } else {
            Some(FailedExpectation::new(
                self.clone(),
                FailureKind::ComparisonFailure {
                    observed: observed.into_owned(),
                },
            ))
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field_name, self.operator, self.value)
    }
}

/// Returns true if every expectation matches `event`.
///
/// An empty slice matches every event.
#[must_use]
pub fn matches_all(expectations: &[Expectation], event: &Event) -> bool {
    expectations.iter().all(|e| e.matches(event))
}
