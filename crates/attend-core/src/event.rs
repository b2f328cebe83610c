//! Normalized presence events.

use chrono::{DateTime, Datelike, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event_type::{EventType, UnknownEventType};
use crate::types::{SessionId, UserId, ValidationError};

/// Errors raised while turning inbound data into an [`AttendanceEvent`].
#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    UnknownType(#[from] UnknownEventType),
    /// The timestamp was not RFC 3339 with an explicit offset.
    #[error("invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// The instant falls outside years 0000..=9999, which the store cannot
    /// hold in its fixed-width text form.
    #[error("timestamp {0}ms is out of range")]
    TimestampOutOfRange(i64),
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// A join or leave for one user in one session.
///
/// Timestamps are held in UTC at millisecond precision, which is the
/// resolution of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent")]
pub struct AttendanceEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

impl AttendanceEvent {
    /// Fails with [`EventError::TimestampOutOfRange`] for instants outside
    /// years 0000..=9999.
    pub fn new(
        kind: EventType,
        session_id: SessionId,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            kind,
            session_id,
            user_id,
            timestamp: ensure_storable(timestamp.trunc_subsecs(3))?,
        })
    }

    /// Builds a join from raw identifiers.
    pub fn join(
        session_id: &str,
        user_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        Self::new(
            EventType::Join,
            SessionId::new(session_id)?,
            UserId::new(user_id)?,
            timestamp,
        )
    }

    /// Builds a leave from raw identifiers.
    pub fn leave(
        session_id: &str,
        user_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        Self::new(
            EventType::Leave,
            SessionId::new(session_id)?,
            UserId::new(user_id)?,
            timestamp,
        )
    }

    /// Parses the normalized JSON form.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        let raw: RawEvent = serde_json::from_str(json)?;
        Self::try_from(raw)
    }
}

/// Wire shape before validation.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type", alias = "event_type")]
    kind: String,
    session_id: String,
    user_id: String,
    timestamp: String,
}

impl TryFrom<RawEvent> for AttendanceEvent {
    type Error = EventError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        Self::new(
            raw.kind.parse()?,
            SessionId::new(raw.session_id)?,
            UserId::new(raw.user_id)?,
            parse_timestamp(&raw.timestamp)?,
        )
    }
}

/// Parses an RFC 3339 instant, rejecting values without an offset.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, EventError> {
    let parsed = DateTime::parse_from_rfc3339(value.trim()).map_err(|source| {
        EventError::Timestamp {
            value: value.to_string(),
            source,
        }
    })?;
    // An offset can push a four-digit local year past either end in UTC.
    ensure_storable(parsed.with_timezone(&Utc).trunc_subsecs(3))
}

/// Converts Unix milliseconds to an instant.
pub fn from_unix_millis(ms: i64) -> Result<DateTime<Utc>, EventError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or(EventError::TimestampOutOfRange(ms))
        .and_then(ensure_storable)
}

/// Whether `timestamp` falls in years 0000..=9999, the range the store's
/// fixed-width text form can hold.
pub fn is_storable(timestamp: DateTime<Utc>) -> bool {
    (0..=9999).contains(&timestamp.year())
}

fn ensure_storable(timestamp: DateTime<Utc>) -> Result<DateTime<Utc>, EventError> {
    if is_storable(timestamp) {
        Ok(timestamp)
    } else {
        Err(EventError::TimestampOutOfRange(timestamp.timestamp_millis()))
    }
}
