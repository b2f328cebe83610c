//! Attendance segments and reconciliation outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SessionId, UserId};

/// One continuous presence interval of a user in a session.
///
/// A segment is open while `leave_time` is `None`. Once closed,
/// `leave_time >= join_time` and `duration_sec` holds the whole seconds
/// between the two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub join_time: DateTime<Utc>,
    pub leave_time: Option<DateTime<Utc>>,
    pub duration_sec: Option<i64>,
}

impl Segment {
    pub const fn is_open(&self) -> bool {
        self.leave_time.is_none()
    }
}

/// Whole seconds from `join` to `leave`, rounded down.
///
/// Returns `None` when `leave` precedes `join`.
pub fn duration_seconds(join: DateTime<Utc>, leave: DateTime<Utc>) -> Option<i64> {
    if leave < join {
        return None;
    }
    Some(leave.signed_duration_since(join).num_seconds())
}

/// What applying one event did to a `(session, user)` lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentState {
    /// A join opened a new segment.
    Opened(Segment),
    /// A leave closed the latest open segment not after it.
    Closed(Segment),
    /// A join arrived while a segment was open, or replayed a join the
    /// contained segment already records. Nothing was written.
    DuplicateJoin(Segment),
    /// A leave replayed the leave instant of an already closed segment.
    AlreadyClosed(Segment),
    /// A leave with no segment to close. Nothing was written.
    OrphanLeave,
}

impl SegmentState {
    /// Acknowledgement label reported to webhook senders.
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Opened(_) => "segment_opened",
            Self::Closed(_) => "segment_closed",
            Self::DuplicateJoin(_) => "duplicate_join",
            Self::AlreadyClosed(_) => "already_closed",
            Self::OrphanLeave => "no_open_segment",
        }
    }

    /// The segment the event resolved to, if any.
    pub const fn segment(&self) -> Option<&Segment> {
        match self {
            Self::Opened(segment)
            | Self::Closed(segment)
            | Self::DuplicateJoin(segment)
            | Self::AlreadyClosed(segment) => Some(segment),
            Self::OrphanLeave => None,
        }
    }
}
