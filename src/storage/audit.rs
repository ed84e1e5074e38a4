//! Append-only audit log of every event the store has seen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventId};

/// Where an event stands relative to resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Present in the active store, not yet resolved.
    Active,
    /// Consumed by a successful expectation.
    Expected,
    /// Removed by a bulk delete.
    Deleted,
}

impl LifecycleState {
    /// `Expected` and `Deleted` never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Name as shown in logs and in the `event_state` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Expected => "Expected",
            Self::Deleted => "Deleted",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A copy of an event as it entered the store, tagged with its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(flatten)]
    event: Event,
    #[serde(rename = "event_state")]
    state: LifecycleState,
    recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resolved_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    fn new(event: Event) -> Self {
        Self {
            event,
            state: LifecycleState::Active,
            recorded_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// The event as it was added.
    #[must_use]
    pub const fn event(&self) -> &Event {
        &self.event
    }

    /// Id of the recorded event.
    #[must_use]
    pub const fn id(&self) -> EventId {
        self.event.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// When the event was added to the store.
    #[must_use]
    pub const fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// When the event left the active store, if it has.
    #[must_use]
    pub const fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }
}

/// Full history of the store, including resolved events.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a copy of `event` in the `Active` state.
    pub fn add_event(&mut self, event: &Event) {
        self.entries.push(AuditEntry::new(event.clone()));
    }

    /// Marks the entry for `id` as `Expected`. Returns false if no active entry exists.
    pub fn mark_event_as_expected(&mut self, id: EventId) -> bool {
        self.transition(id, LifecycleState::Expected)
    }

    /// Marks the entry for `id` as `Deleted`. Returns false if no active entry exists.
    pub fn mark_event_as_deleted(&mut self, id: EventId) -> bool {
        self.transition(id, LifecycleState::Deleted)
    }

    fn transition(&mut self, id: EventId, to: LifecycleState) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id() == id) else {
            return false;
        };
        if entry.state.is_terminal() {
            return false;
        }
        entry.state = to;
        entry.resolved_at = Some(Utc::now());
        true
    }

    /// Snapshot of the whole history, in insertion order.
    #[must_use]
    pub fn get_all(&self) -> Vec<AuditEntry> {
        self.entries.clone()
    }

    /// Borrowed view of every entry.
    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets all history.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
