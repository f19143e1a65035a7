//! Security module - privileged callers and audit notifications
//!
//! This module provides:
//! - Owner / registry authorization checks for administrative operations
//! - Typed notifications for observers and audits

pub mod access;
pub mod events;

pub use access::{AccessControl, AccessError};
pub use events::{EventBus, EventSeverity, EventSink, InsuranceEvent, MemoryEventSink, TracingEventSink};
