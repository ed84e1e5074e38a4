//! Pure comparison of an observed field value against an expectation operand.
//!
//! Comparisons never fail. When an operator is undefined for the operand
//! types (ordering a string against a number, anything against `null`, ...)
//! the result is [`Comparison::NoMatch`], exactly as if the values differed.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Comparison operator of an expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Observed value equals the operand.
    Eq,
    /// Observed value differs from the operand.
    Ne,
    /// Observed value is greater than the operand.
    Gt,
    /// Observed value is greater than or equal to the operand.
    Gte,
    /// Observed value is less than the operand.
    Lt,
    /// Observed value is less than or equal to the operand.
    Lte,
    /// Observed value is contained in the operand.
    In,
    /// Observed value is not contained in the operand.
    NotIn,
}

impl Operator {
    /// Short symbol used in diagnostics.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Outcome of a single comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// The comparison holds.
    Match,
    /// It does not, or the operands are not comparable.
    NoMatch,
}

impl Comparison {
    /// Returns true for [`Comparison::Match`].
    #[must_use]
    pub const fn is_match(self) -> bool {
        matches!(self, Self::Match)
    }
}

impl From<bool> for Comparison {
    fn from(matched: bool) -> Self {
        if matched {
            Self::Match
        } else {
            Self::NoMatch
        }
    }
}

/// Applies `op` to `observed` (left) and `operand` (right).
#[must_use]
pub fn compare(op: Operator, observed: &Value, operand: &Value) -> Comparison {
    let matched = match op {
        Operator::Eq => values_equal(observed, operand),
        Operator::Ne => !values_equal(observed, operand),
        Operator::Gt => ordering(observed, operand).is_some_and(Ordering::is_gt),
        Operator::Gte => ordering(observed, operand).is_some_and(Ordering::is_ge),
        Operator::Lt => ordering(observed, operand).is_some_and(Ordering::is_lt),
        Operator::Lte => ordering(observed, operand).is_some_and(Ordering::is_le),
        Operator::In => contains(operand, observed).unwrap_or(false),
        Operator::NotIn => contains(operand, observed).is_some_and(|found| !found),
    };
    matched.into()
}

/// Numeric view of a value. Booleans count as 0 and 1.
#[allow(clippy::cast_precision_loss)]
fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Equality across kinds: numbers and booleans compare numerically, lists and
/// objects element-wise, otherwise kinds must agree.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, l)| y.get(key).is_some_and(|r| values_equal(l, r)))
        }
        (x, y) => match (numeric(x), numeric(y)) {
            (Some(l), Some(r)) => l == r,
            _ => x == y,
        },
    }
}

/// Ordering for the kinds where it is defined; `None` otherwise.
///
/// Lists order lexicographically: the first unequal pair decides, and a
/// shorter prefix sorts first.
fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) => match x.iter().zip(y.iter()).find(|(l, r)| !values_equal(l, r)) {
            Some((l, r)) => ordering(l, r),
            None => Some(x.len().cmp(&y.len())),
        },
        (x, y) => numeric(x)?.partial_cmp(&numeric(y)?),
    }
}

/// Membership test; `None` when the container shape does not support it.
///
/// Objects test their keys.
fn contains(container: &Value, item: &Value) -> Option<bool> {
    match (container, item) {
        (Value::List(items), _) => Some(items.iter().any(|candidate| values_equal(item, candidate))),
        (Value::String(haystack), Value::String(needle)) => Some(haystack.contains(needle.as_str())),
        (Value::Object(map), Value::String(key)) => Some(map.contains_key(key)),
        _ => None,
    }
}
