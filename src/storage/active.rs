//! The active store: live, not yet resolved events.
//!
//! The store is a plain owned value with `&mut self` mutators. It is meant to
//! be owned by exactly one run loop, which is what serializes access; there is
//! no interior locking.

use tracing::warn;

use crate::diagnostics::{ExtendedLookup, PartialMatch};
use crate::event::{Event, EventFields, EventId, Lookup, RESERVED_KEYS};
use crate::expectation::{matches_all, Expectation};

use super::audit::{AuditEntry, AuditLog};

/// Ordered collection of live events plus the audit log mirroring them.
#[derive(Debug)]
pub struct ActiveStore {
    events: Vec<Event>,
    next_id: EventId,
    audit: AuditLog,
}

impl Default for ActiveStore {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            next_id: EventId::new(0),
            audit: AuditLog::new(),
        }
    }
}

impl ActiveStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next sequence id and records the event in both stores.
    pub fn add(&mut self, fields: EventFields) -> EventId {
        let id = self.next_id;
        self.next_id = id.next();

        for key in RESERVED_KEYS {
            if let Some(value) = fields.get(key) {
                warn!(event_id = %id, field = key, %value, "discarding caller-supplied reserved field");
            }
        }

        let event = Event::new(id, fields);
        self.audit.add_event(&event);
        self.events.push(event);
        id
    }

    /// Snapshot of every active event, oldest first.
    #[must_use]
    pub fn get_all(&self) -> Vec<Event> {
        self.events.clone()
    }

    /// Every active event satisfying all expectations, oldest first.
    #[must_use]
    pub fn get_all_matching(&self, expectations: &[Expectation]) -> Vec<Event> {
        self.events
            .iter()
            .filter(|event| matches_all(expectations, event))
            .cloned()
            .collect()
    }

    /// The oldest active event satisfying all expectations. Does not remove it.
    #[must_use]
    pub fn find_first_match(&self, expectations: &[Expectation]) -> Lookup {
        self.events
            .iter()
            .find(|event| matches_all(expectations, event))
            .cloned()
            .into()
    }

    /// Removes the stored copy equal to `event` and marks it `Expected`.
    ///
    /// Returns false (and changes nothing) if the event is not active.
    pub fn remove_expected_event(&mut self, event: &Event) -> bool {
        let Some(idx) = self.events.iter().position(|stored| stored == event) else {
            return false;
        };
        let removed = self.events.remove(idx);
        self.audit.mark_event_as_expected(removed.id());
        true
    }

    /// Removes every event satisfying all expectations and marks each `Deleted`.
    pub fn remove_matching_events(&mut self, expectations: &[Expectation]) -> usize {
        let indices: Vec<usize> = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, event)| matches_all(expectations, event))
            .map(|(idx, _)| idx)
            .collect();

        // Descending, so earlier removals do not shift later indices.
        for &idx in indices.iter().rev() {
            let removed = self.events.remove(idx);
            self.audit.mark_event_as_deleted(removed.id());
        }
        indices.len()
    }

    /// First-match lookup that explains failure.
    ///
    /// Candidates are the events matching `partial_filter`. The first candidate
    /// that satisfies every expectation is returned without diagnostics;
    /// otherwise each candidate is reported with the expectations it failed.
    #[must_use]
    pub fn extended_expect_event(
        &self,
        expectations: &[Expectation],
        partial_filter: &[Expectation],
    ) -> ExtendedLookup {
        let mut candidates = Vec::new();
        for event in &self.events {
            if !matches_all(partial_filter, event) {
                continue;
            }
            if matches_all(expectations, event) {
                return ExtendedLookup::found(event.clone());
            }
            candidates.push(event);
        }

        let partial_matches = candidates
            .into_iter()
            .map(|event| PartialMatch::evaluate(event, expectations))
            .collect();
        ExtendedLookup::not_found(partial_matches)
    }

    /// Full history, including resolved events.
    #[must_use]
    pub fn full_event_log(&self) -> Vec<AuditEntry> {
        self.audit.get_all()
    }

    /// The audit log backing `full_event_log`.
    #[must_use]
    pub const fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The id the next added event will receive.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_id
    }

    /// Number of active events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true when no events are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns both stores to their initial state, including the id counter.
    pub fn reset(&mut self) {
        self.events.clear();
        self.next_id = EventId::new(0);
        self.audit.reset();
    }
}
