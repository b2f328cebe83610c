//! Storage layer for attendance reconciliation.
//!
//! Persists users, sessions and attendance segments using `rusqlite`, and
//! hosts the reconciler that applies join/leave events (see [`Database::apply`]).
//!
//! # Concurrency
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Concurrent workers each open their own `Database` on the same file. Every
//! reconciliation runs in a `BEGIN IMMEDIATE` transaction, so the `SQLite` write
//! lock serializes read-modify-write cycles across connections. Waiting writers
//! block for up to the configured busy timeout before failing with
//! [`ReconcileError::StorageUnavailable`].
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in fixed-width RFC 3339 UTC with milliseconds
//! (e.g., `2025-01-15T10:30:00.000Z`). Lexicographic ordering matches
//! chronological ordering, which the open-segment lookups and the
//! `leave_time >= join_time` check constraint rely on.

mod reconcile;

use std::path::Path;
use std::time::Duration;

use attend_core::{Segment, SessionId, UserId, ValidationError};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, Row, params};
use thiserror::Error;

pub use reconcile::ReconcileError;

/// Default time a connection waits on the write lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp for segment {segment_id}: {timestamp}")]
    TimestampParse {
        segment_id: i64,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored identifier failed validation.
    #[error("invalid identifier for segment {segment_id}")]
    InvalidIdentifier {
        segment_id: i64,
        #[source]
        source: ValidationError,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for concurrency considerations.
pub struct Database {
    conn: Connection,
}

/// Row counts shown by `attend status`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    pub users: i64,
    pub sessions: i64,
    pub open_segments: i64,
    pub closed_segments: i64,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens a database with an explicit busy timeout.
    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens a connection to a database that [`Database::open`] has already
    /// initialized.
    ///
    /// Skips the journal mode and schema setup, and fails if the file does not
    /// exist.
    pub fn connect(path: &Path, busy_timeout: Duration) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY
            );

            -- join_time / leave_time: '2025-01-15T10:30:00.000Z'
            -- duration_sec: whole seconds, set together with leave_time
            CREATE TABLE IF NOT EXISTS attendance_segments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                join_time TEXT NOT NULL,
                leave_time TEXT,
                duration_sec INTEGER,
                FOREIGN KEY (session_id) REFERENCES sessions(session_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                CHECK (leave_time IS NULL OR leave_time >= join_time),
                CHECK (duration_sec IS NULL OR duration_sec >= 0),
                CHECK ((leave_time IS NULL) = (duration_sec IS NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_segments_lane
                ON attendance_segments(session_id, user_id, join_time);
            CREATE INDEX IF NOT EXISTS idx_segments_open
                ON attendance_segments(session_id, user_id, join_time)
                WHERE leave_time IS NULL;
            ",
        )?;
        Ok(())
    }

    /// Checks that the connection can answer a trivial query.
    pub fn ping(&self) -> Result<(), DbError> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Lists known session ids, most recent id first.
    pub fn list_sessions(&self, limit: u32) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT session_id
            FROM sessions
            ORDER BY session_id DESC
            LIMIT ?
            ",
        )?;
        let rows = stmt.query_map([limit], |row| row.get(0))?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Lists every segment of a session ordered by join time.
    pub fn list_segments(&self, session_id: &SessionId) -> Result<Vec<Segment>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, session_id, user_id, join_time, leave_time, duration_sec
            FROM attendance_segments
            WHERE session_id = ?
            ORDER BY join_time ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([session_id.as_str()], SegmentRow::from_row)?;
        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?.into_segment()?);
        }
        Ok(segments)
    }

    /// Lists the segments of one user in one session ordered by join time.
    pub fn list_lane(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<Vec<Segment>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, session_id, user_id, join_time, leave_time, duration_sec
            FROM attendance_segments
            WHERE session_id = ? AND user_id = ?
            ORDER BY join_time ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map(
            params![session_id.as_str(), user_id.as_str()],
            SegmentRow::from_row,
        )?;
        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?.into_segment()?);
        }
        Ok(segments)
    }

    /// Counts users, sessions and segments by state.
    pub fn counts(&self) -> Result<StoreCounts, DbError> {
        let counts = self.conn.query_row(
            "
            SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM sessions),
                (SELECT COUNT(*) FROM attendance_segments WHERE leave_time IS NULL),
                (SELECT COUNT(*) FROM attendance_segments WHERE leave_time IS NOT NULL)
            ",
            [],
            |row| {
                Ok(StoreCounts {
                    users: row.get(0)?,
                    sessions: row.get(1)?,
                    open_segments: row.get(2)?,
                    closed_segments: row.get(3)?,
                })
            },
        )?;
        Ok(counts)
    }
}

/// A segment row as stored, before parsing.
#[derive(Debug)]
struct SegmentRow {
    id: i64,
    session_id: String,
    user_id: String,
    join_time: String,
    leave_time: Option<String>,
    duration_sec: Option<i64>,
}

impl SegmentRow {
    /// Expects the column order `id, session_id, user_id, join_time, leave_time, duration_sec`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            join_time: row.get(3)?,
            leave_time: row.get(4)?,
            duration_sec: row.get(5)?,
        })
    }

    fn into_segment(self) -> Result<Segment, DbError> {
        let id = self.id;
        let invalid = |source| DbError::InvalidIdentifier {
            segment_id: id,
            source,
        };
        Ok(Segment {
            id,
            session_id: SessionId::new(self.session_id).map_err(invalid)?,
            user_id: UserId::new(self.user_id).map_err(invalid)?,
            join_time: parse_timestamp(&self.join_time, id)?,
            leave_time: self
                .leave_time
                .as_deref()
                .map(|leave| parse_timestamp(leave, id))
                .transpose()?,
            duration_sec: self.duration_sec,
        })
    }
}

fn parse_timestamp(timestamp: &str, segment_id: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            segment_id,
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
