//! Reconciliation of join/leave events into attendance segments.
//!
//! Policies, applied per `(session_id, user_id)` lane:
//! - A join while a segment is open is suppressed. So is a join whose instant
//!   falls inside a segment that is already closed (a replay after its leave).
//! - A leave closes the latest open segment whose `join_time` is not after it.
//! - A leave matching the `leave_time` of a closed segment is a replay and a no-op.
//! - A leave preceding the only open segment fails with [`ReconcileError::InvalidInterval`].
//! - Any other leave is an orphan: reported, not stored.

use attend_core::{
    AttendanceEvent, EventType, Segment, SegmentState, SessionId, UserId, duration_seconds,
    is_storable,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use thiserror::Error;

use crate::{Database, DbError, SegmentRow, format_timestamp};

/// Errors surfaced to the caller of [`Database::apply`].
///
/// Duplicate joins and orphan leaves are outcomes, not errors; see
/// [`SegmentState`].
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The leave precedes the join of the segment it would close.
    #[error(
        "leave at {leave_time} precedes join at {join_time} of segment {segment_id}"
    )]
    InvalidInterval {
        segment_id: i64,
        join_time: DateTime<Utc>,
        leave_time: DateTime<Utc>,
    },
    /// The event's instant has no fixed-width text form (year outside 0000..=9999).
    #[error("timestamp {timestamp} is outside the storable range")]
    Unstorable { timestamp: DateTime<Utc> },
    /// The open segment was closed by another writer between lookup and update.
    #[error("segment {segment_id} was closed concurrently")]
    Conflict { segment_id: i64 },
    /// The store could not complete the transaction.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] rusqlite::Error),
    /// A stored row could not be read back.
    #[error("corrupt segment row: {0}")]
    CorruptRow(#[source] DbError),
}

impl ReconcileError {
    /// Whether redelivering the same event may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::Conflict { .. })
    }
}

impl From<rusqlite::Error> for ReconcileError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageUnavailable(err)
    }
}

impl From<DbError> for ReconcileError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlite(err) => Self::StorageUnavailable(err),
            other => Self::CorruptRow(other),
        }
    }
}

impl Database {
    /// Applies one event inside a single write transaction.
    ///
    /// The user and session are created if absent. On error the transaction is
    /// rolled back and the store is left unchanged.
    pub fn apply(&mut self, event: &AttendanceEvent) -> Result<SegmentState, ReconcileError> {
        if !is_storable(event.timestamp) {
            return Err(ReconcileError::Unstorable {
                timestamp: event.timestamp,
            });
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_entities(&tx, &event.session_id, &event.user_id)?;

        let state = match event.kind {
            EventType::Join => apply_join(&tx, event)?,
            EventType::Leave => apply_leave(&tx, event)?,
        };
        tx.commit()?;

        match &state {
            SegmentState::OrphanLeave => tracing::warn!(
                session_id = %event.session_id,
                user_id = %event.user_id,
                timestamp = %event.timestamp,
                "leave without an open segment"
            ),
            SegmentState::DuplicateJoin(segment) | SegmentState::AlreadyClosed(segment) => {
                tracing::debug!(
                    session_id = %event.session_id,
                    user_id = %event.user_id,
                    segment_id = segment.id,
                    action = state.action(),
                    "suppressed redelivered event"
                );
            }
            SegmentState::Opened(segment) | SegmentState::Closed(segment) => tracing::info!(
                session_id = %event.session_id,
                user_id = %event.user_id,
                segment_id = segment.id,
                duration_sec = segment.duration_sec,
                action = state.action(),
                "applied attendance event"
            ),
        }
        Ok(state)
    }
}

fn ensure_entities(
    conn: &Connection,
    session_id: &SessionId,
    user_id: &UserId,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO sessions (session_id) VALUES (?) ON CONFLICT DO NOTHING",
        [session_id.as_str()],
    )?;
    conn.execute(
        "INSERT INTO users (id) VALUES (?) ON CONFLICT DO NOTHING",
        [user_id.as_str()],
    )?;
    Ok(())
}

fn apply_join(conn: &Connection, event: &AttendanceEvent) -> Result<SegmentState, ReconcileError> {
    let at = format_timestamp(event.timestamp);

    if let Some(open) = latest_open(conn, &event.session_id, &event.user_id)? {
        return Ok(SegmentState::DuplicateJoin(open));
    }
    if let Some(closed) = closed_containing(conn, &event.session_id, &event.user_id, &at)? {
        return Ok(SegmentState::DuplicateJoin(closed));
    }

    conn.execute(
        "
        INSERT INTO attendance_segments (session_id, user_id, join_time)
        VALUES (?, ?, ?)
        ",
        params![event.session_id.as_str(), event.user_id.as_str(), at],
    )?;

    Ok(SegmentState::Opened(Segment {
        id: conn.last_insert_rowid(),
        session_id: event.session_id.clone(),
        user_id: event.user_id.clone(),
        join_time: event.timestamp,
        leave_time: None,
        duration_sec: None,
    }))
}

fn apply_leave(
    conn: &Connection,
    event: &AttendanceEvent,
) -> Result<SegmentState, ReconcileError> {
    let at = format_timestamp(event.timestamp);

    if let Some(open) = latest_open_not_after(conn, &event.session_id, &event.user_id, &at)? {
        let duration = duration_seconds(open.join_time, event.timestamp).ok_or(
            ReconcileError::InvalidInterval {
                segment_id: open.id,
                join_time: open.join_time,
                leave_time: event.timestamp,
            },
        )?;

        let updated = conn.execute(
            "
            UPDATE attendance_segments
            SET leave_time = ?, duration_sec = ?
            WHERE id = ? AND leave_time IS NULL
            ",
            params![at, duration, open.id],
        )?;
        if updated != 1 {
            return Err(ReconcileError::Conflict {
                segment_id: open.id,
            });
        }

        return Ok(SegmentState::Closed(Segment {
            leave_time: Some(event.timestamp),
            duration_sec: Some(duration),
            ..open
        }));
    }

    if let Some(closed) = closed_leaving_at(conn, &event.session_id, &event.user_id, &at)? {
        return Ok(SegmentState::AlreadyClosed(closed));
    }

    if let Some(open) = latest_open(conn, &event.session_id, &event.user_id)? {
        return Err(ReconcileError::InvalidInterval {
            segment_id: open.id,
            join_time: open.join_time,
            leave_time: event.timestamp,
        });
    }

    Ok(SegmentState::OrphanLeave)
}

fn latest_open(
    conn: &Connection,
    session_id: &SessionId,
    user_id: &UserId,
) -> Result<Option<Segment>, DbError> {
    query_segment(
        conn,
        "
        SELECT id, session_id, user_id, join_time, leave_time, duration_sec
        FROM attendance_segments
        WHERE session_id = ?1 AND user_id = ?2 AND leave_time IS NULL
        ORDER BY join_time DESC, id DESC
        LIMIT 1
        ",
        params![session_id.as_str(), user_id.as_str()],
    )
}

fn latest_open_not_after(
    conn: &Connection,
    session_id: &SessionId,
    user_id: &UserId,
    at: &str,
) -> Result<Option<Segment>, DbError> {
    query_segment(
        conn,
        "
        SELECT id, session_id, user_id, join_time, leave_time, duration_sec
        FROM attendance_segments
        WHERE session_id = ?1 AND user_id = ?2 AND leave_time IS NULL AND join_time <= ?3
        ORDER BY join_time DESC, id DESC
        LIMIT 1
        ",
        params![session_id.as_str(), user_id.as_str(), at],
    )
}

/// A closed segment that starts at `at` or spans it (end exclusive).
fn closed_containing(
    conn: &Connection,
    session_id: &SessionId,
    user_id: &UserId,
    at: &str,
) -> Result<Option<Segment>, DbError> {
    query_segment(
        conn,
        "
        SELECT id, session_id, user_id, join_time, leave_time, duration_sec
        FROM attendance_segments
        WHERE session_id = ?1 AND user_id = ?2 AND leave_time IS NOT NULL
          AND (join_time = ?3 OR (join_time <= ?3 AND ?3 < leave_time))
        ORDER BY join_time DESC, id DESC
        LIMIT 1
        ",
        params![session_id.as_str(), user_id.as_str(), at],
    )
}

fn closed_leaving_at(
    conn: &Connection,
    session_id: &SessionId,
    user_id: &UserId,
    at: &str,
) -> Result<Option<Segment>, DbError> {
    query_segment(
        conn,
        "
        SELECT id, session_id, user_id, join_time, leave_time, duration_sec
        FROM attendance_segments
        WHERE session_id = ?1 AND user_id = ?2 AND leave_time = ?3
        ORDER BY join_time DESC, id DESC
        LIMIT 1
        ",
        params![session_id.as_str(), user_id.as_str(), at],
    )
}

fn query_segment(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Segment>, DbError> {
    conn.query_row(sql, params, SegmentRow::from_row)
        .optional()?
        .map(SegmentRow::into_segment)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn join(session: &str, user: &str, ts: &str) -> AttendanceEvent {
        AttendanceEvent::join(session, user, at(ts)).unwrap()
    }

    fn leave(session: &str, user: &str, ts: &str) -> AttendanceEvent {
        AttendanceEvent::leave(session, user, at(ts)).unwrap()
    }

    fn lane(db: &Database, session: &str, user: &str) -> Vec<Segment> {
        db.list_lane(&SessionId::new(session).unwrap(), &UserId::new(user).unwrap())
            .unwrap()
    }

    fn row_count(db: &Database, table: &str) -> i64 {
        db.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    #[test]
    fn join_then_leave_records_duration() {
        let mut db = Database::open_in_memory().unwrap();

        let opened = db.apply(&join("abc123", "alice", "2025-01-01T10:00:00Z")).unwrap();
        assert!(matches!(opened, SegmentState::Opened(ref s) if s.is_open()));

        let closed = db.apply(&leave("abc123", "alice", "2025-01-01T11:15:30Z")).unwrap();
        let SegmentState::Closed(segment) = closed else {
            panic!("expected closed, got {closed:?}");
        };
        assert_eq!(segment.duration_sec, Some(4530));
        assert_eq!(segment.leave_time, Some(at("2025-01-01T11:15:30Z")));

        let stored = lane(&db, "abc123", "alice");
        assert_eq!(stored, vec![segment]);
    }

    #[test]
    fn join_creates_user_and_session() {
        let mut db = Database::open_in_memory().unwrap();
        db.apply(&join("abc123", "alice", "2025-01-01T10:00:00Z")).unwrap();
        db.apply(&join("abc123", "bob", "2025-01-01T10:00:00Z")).unwrap();

        assert_eq!(row_count(&db, "users"), 2);
        assert_eq!(row_count(&db, "sessions"), 1);
    }

    #[test]
    fn duplicate_join_keeps_single_open_segment() {
        let mut db = Database::open_in_memory().unwrap();
        let event = join("abc123", "alice", "2025-01-01T10:00:00Z");

        let first = db.apply(&event).unwrap();
        let second = db.apply(&event).unwrap();

        let SegmentState::Opened(opened) = first else {
            panic!("expected opened, got {first:?}");
        };
        assert_eq!(second, SegmentState::DuplicateJoin(opened));
        assert_eq!(lane(&db, "abc123", "alice").len(), 1);
    }

    #[test]
    fn later_join_while_open_is_suppressed() {
        let mut db = Database::open_in_memory().unwrap();
        db.apply(&join("abc123", "alice", "2025-01-01T10:00:00Z")).unwrap();
        let state = db.apply(&join("abc123", "alice", "2025-01-01T10:30:00Z")).unwrap();

        assert_eq!(state.action(), "duplicate_join");
        let segments = lane(&db, "abc123", "alice");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].join_time, at("2025-01-01T10:00:00Z"));
    }

    #[test]
    fn join_replayed_after_leave_is_suppressed() {
        let mut db = Database::open_in_memory().unwrap();
        let event = join("abc123", "alice", "2025-01-01T10:00:00Z");
        db.apply(&event).unwrap();
        db.apply(&leave("abc123", "alice", "2025-01-01T11:00:00Z")).unwrap();

        let state = db.apply(&event).unwrap();

        assert!(matches!(state, SegmentState::DuplicateJoin(ref s) if !s.is_open()));
        assert_eq!(lane(&db, "abc123", "alice").len(), 1);
    }

    #[test]
    fn zero_length_segment_suppresses_join_replay() {
        let mut db = Database::open_in_memory().unwrap();
        let event = join("abc123", "alice", "2025-01-01T10:00:00Z");
        db.apply(&event).unwrap();
        db.apply(&leave("abc123", "alice", "2025-01-01T10:00:00Z")).unwrap();

        let state = db.apply(&event).unwrap();

        assert_eq!(state.action(), "duplicate_join");
        assert_eq!(lane(&db, "abc123", "alice").len(), 1);
    }

    #[test]
    fn rejoin_at_leave_instant_opens_new_segment() {
        let mut db = Database::open_in_memory().unwrap();
        db.apply(&join("abc123", "alice", "2025-01-01T10:00:00Z")).unwrap();
        db.apply(&leave("abc123", "alice", "2025-01-01T10:20:00Z")).unwrap();

        let state = db.apply(&join("abc123", "alice", "2025-01-01T10:20:00Z")).unwrap();

        assert_eq!(state.action(), "segment_opened");
        assert_eq!(lane(&db, "abc123", "alice").len(), 2);
    }

    #[test]
    fn duplicate_leave_is_a_noop() {
        let mut db = Database::open_in_memory().unwrap();
        db.apply(&join("abc123", "alice", "2025-01-01T10:00:00Z")).unwrap();
        let event = leave("abc123", "alice", "2025-01-01T10:45:00Z");

        let first = db.apply(&event).unwrap();
        let second = db.apply(&event).unwrap();

        let SegmentState::Closed(closed) = first else {
            panic!("expected closed, got {first:?}");
        };
        assert_eq!(second, SegmentState::AlreadyClosed(closed.clone()));
        assert_eq!(lane(&db, "abc123", "alice"), vec![closed]);
    }

    #[test]
    fn leave_replay_after_rejoin_does_not_touch_new_segment() {
        let mut db = Database::open_in_memory().unwrap();
        let first_leave = leave("abc123", "alice", "2025-01-01T10:30:00Z");
        db.apply(&join("abc123", "alice", "2025-01-01T10:00:00Z")).unwrap();
        db.apply(&first_leave).unwrap();
        db.apply(&join("abc123", "alice", "2025-01-01T10:40:00Z")).unwrap();

        let state = db.apply(&first_leave).unwrap();

        assert_eq!(state.action(), "already_closed");
        let segments = lane(&db, "abc123", "alice");
        assert_eq!(segments.len(), 2);
        assert!(segments[1].is_open());
    }

    #[test]
    fn out_of_order_leave_matches_earlier_join() {
        let mut db = Database::open_in_memory().unwrap();
        db.apply(&join("abc123", "alice", "2025-01-01T10:00:00Z")).unwrap();
        db.apply(&join("abc123", "alice", "2025-01-01T10:30:00Z")).unwrap();

        let state = db.apply(&leave("abc123", "alice", "2025-01-01T10:15:00Z")).unwrap();

        let SegmentState::Closed(segment) = state else {
            panic!("expected closed, got {state:?}");
        };
        assert_eq!(segment.join_time, at("2025-01-01T10:00:00Z"));
        assert_eq!(segment.duration_sec, Some(900));
    }

    #[test]
    fn leave_picks_latest_open_join_not_after_it() {
        let mut db = Database::open_in_memory().unwrap();
        // apply never leaves two open rows in a lane; seed them directly.
        db.conn
            .execute_batch(
                "
                INSERT INTO users (id) VALUES ('alice');
                INSERT INTO sessions (session_id) VALUES ('abc123');
                INSERT INTO attendance_segments (session_id, user_id, join_time)
                VALUES ('abc123', 'alice', '2025-01-01T10:30:00.000Z');
                INSERT INTO attendance_segments (session_id, user_id, join_time)
                VALUES ('abc123', 'alice', '2025-01-01T10:00:00.000Z');
                INSERT INTO attendance_segments (session_id, user_id, join_time)
                VALUES ('abc123', 'alice', '2025-01-01T11:00:00.000Z');
                ",
            )
            .unwrap();

        let state = db.apply(&leave("abc123", "alice", "2025-01-01T10:45:00Z")).unwrap();

        let SegmentState::Closed(segment) = state else {
            panic!("expected closed, got {state:?}");
        };
        assert_eq!(segment.join_time, at("2025-01-01T10:30:00Z"));
        assert_eq!(segment.duration_sec, Some(900));
    }

    #[test]
    fn orphan_leave_writes_no_segment() {
        let mut db = Database::open_in_memory().unwrap();
        db.apply(&join("abc123", "bob", "2025-01-01T10:00:00Z")).unwrap();
        db.apply(&join("other", "alice", "2025-01-01T10:00:00Z")).unwrap();
        let before = db.list_segments(&SessionId::new("abc123").unwrap()).unwrap();

        let state = db.apply(&leave("abc123", "alice", "2025-01-01T11:00:00Z")).unwrap();

        assert_eq!(state, SegmentState::OrphanLeave);
        assert!(lane(&db, "abc123", "alice").is_empty());
        assert_eq!(
            db.list_segments(&SessionId::new("abc123").unwrap()).unwrap(),
            before
        );
        assert!(lane(&db, "other", "alice")[0].is_open());
    }

    #[test]
    fn leave_before_open_join_is_rejected_and_rolled_back() {
        let mut db = Database::open_in_memory().unwrap();
        db.apply(&join("abc123", "alice", "2025-01-01T10:00:00Z")).unwrap();

        let err = db
            .apply(&leave("abc123", "alice", "2025-01-01T09:00:00Z"))
            .unwrap_err();

        assert!(matches!(err, ReconcileError::InvalidInterval { .. }));
        assert!(!err.is_transient());
        let segments = lane(&db, "abc123", "alice");
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_open());
    }

    #[test]
    fn orphan_leave_still_registers_parents() {
        let mut db = Database::open_in_memory().unwrap();
        db.apply(&leave("abc123", "alice", "2025-01-01T11:00:00Z")).unwrap();

        assert_eq!(row_count(&db, "users"), 1);
        assert_eq!(row_count(&db, "sessions"), 1);
        assert_eq!(row_count(&db, "attendance_segments"), 0);
    }

    #[test]
    fn durations_are_never_negative() {
        let mut db = Database::open_in_memory().unwrap();
        let pairs = [
            ("2025-01-01T10:00:00Z", "2025-01-01T10:00:00Z"),
            ("2025-01-01T10:05:00.250Z", "2025-01-01T10:05:01.249Z"),
            ("2025-01-01T11:00:00Z", "2025-01-01T13:30:59.999Z"),
        ];
        for (join_at, leave_at) in pairs {
            db.apply(&join("abc123", "alice", join_at)).unwrap();
            db.apply(&leave("abc123", "alice", leave_at)).unwrap();
        }

        let durations: Vec<Option<i64>> = lane(&db, "abc123", "alice")
            .iter()
            .map(|s| s.duration_sec)
            .collect();
        assert_eq!(durations, vec![Some(0), Some(0), Some(9059)]);
    }

    #[test]
    fn unstorable_instant_leaves_lane_usable() {
        let mut db = Database::open_in_memory().unwrap();
        let mut far_join = join("m1", "alice", "2025-01-01T10:00:00Z");
        far_join.timestamp = at("9999-12-31T23:59:59Z") + chrono::Duration::seconds(1);

        let err = db.apply(&far_join).unwrap_err();
        assert!(matches!(err, ReconcileError::Unstorable { .. }));
        assert!(!err.is_transient());
        assert_eq!(row_count(&db, "attendance_segments"), 0);

        db.apply(&join("m1", "alice", "2025-01-01T10:00:00Z")).unwrap();
        let closed = db.apply(&leave("m1", "alice", "2025-01-01T10:45:00Z")).unwrap();
        assert_eq!(closed.segment().unwrap().duration_sec, Some(2700));
        assert_eq!(lane(&db, "m1", "alice").len(), 1);
    }

    #[test]
    fn transient_classification() {
        let err = ReconcileError::from(rusqlite::Error::InvalidQuery);
        assert!(err.is_transient());
        assert!(ReconcileError::Conflict { segment_id: 1 }.is_transient());
    }
}
