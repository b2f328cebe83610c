//! Core domain types for attendance reconciliation.
//!
//! This crate contains:
//! - Validated session and user identifiers
//! - Normalized join/leave events and their parsing rules
//! - The attendance segment model and reconciliation outcomes
//! - Zoom webhook envelope normalization

mod event;
pub mod event_type;
mod segment;
mod types;
pub mod zoom;

pub use event::{AttendanceEvent, EventError, from_unix_millis, is_storable, parse_timestamp};
pub use event_type::{EventType, UnknownEventType};
pub use segment::{Segment, SegmentState, duration_seconds};
pub use types::{SessionId, UserId, ValidationError};
