//! In-memory storage for the event store.
//!
//! The active store holds live events; the audit log mirrors every event ever
//! added together with how it was resolved. Both are owned by the run loop.

mod active;
mod audit;

pub use active::ActiveStore;
pub use audit::{AuditEntry, AuditLog, LifecycleState};
