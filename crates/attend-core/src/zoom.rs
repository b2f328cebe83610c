//! Zoom webhook envelope normalization.
//!
//! Only participant join/leave notifications are reconciled. Everything else,
//! including the `endpoint.url_validation` challenge, is reported as ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::event::{AttendanceEvent, EventError, from_unix_millis, parse_timestamp};
use crate::event_type::EventType;
use crate::types::{SessionId, UserId};

const PARTICIPANT_JOINED: &str = "meeting.participant_joined";
const PARTICIPANT_LEFT: &str = "meeting.participant_left";

/// Identifier used when the participant carries no usable id.
pub const UNKNOWN_USER: &str = "unknown";

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    event_ts: Option<i64>,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    object: Option<MeetingObject>,
}

#[derive(Debug, Default, Deserialize)]
struct MeetingObject {
    #[serde(default)]
    uuid: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    participant: Option<Participant>,
}

#[derive(Debug, Default, Deserialize)]
struct Participant {
    #[serde(default)]
    email: Option<Value>,
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    join_time: Option<String>,
    #[serde(default)]
    leave_time: Option<String>,
}

/// Result of normalizing one webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Event(AttendanceEvent),
    /// The envelope's `event` is not a participant join or leave.
    Ignored { event: String },
}

/// Turns a Zoom webhook body into a normalized event.
///
/// `received_at` stands in for the event time when the envelope carries
/// neither a participant timestamp nor `event_ts`.
pub fn normalize(body: Value, received_at: DateTime<Utc>) -> Result<Normalized, EventError> {
    let envelope: Envelope = serde_json::from_value(body)?;

    let kind = match envelope.event.as_str() {
        PARTICIPANT_JOINED => EventType::Join,
        PARTICIPANT_LEFT => EventType::Leave,
        _ => {
            tracing::debug!(event = %envelope.event, "ignoring webhook event");
            return Ok(Normalized::Ignored {
                event: envelope.event,
            });
        }
    };

    let object = envelope
        .payload
        .and_then(|payload| payload.object)
        .unwrap_or_default();

    let session_id = object
        .uuid
        .as_ref()
        .and_then(id_string)
        .or_else(|| object.id.as_ref().and_then(id_string))
        .ok_or(EventError::MissingField("payload.object.uuid or payload.object.id"))?;

    let participant = object.participant.unwrap_or_default();
    let user_id = [&participant.email, &participant.user_id, &participant.id]
        .into_iter()
        .find_map(|value| value.as_ref().and_then(id_string))
        .unwrap_or_else(|| UNKNOWN_USER.to_string());

    let participant_time = match kind {
        EventType::Join => participant.join_time.as_deref(),
        EventType::Leave => participant.leave_time.as_deref(),
    };
    let timestamp = match (participant_time, envelope.event_ts) {
        (Some(value), _) if !value.trim().is_empty() => parse_timestamp(value)?,
        (_, Some(ms)) => from_unix_millis(ms)?,
        _ => received_at,
    };

    Ok(Normalized::Event(AttendanceEvent::new(
        kind,
        SessionId::new(session_id)?,
        UserId::new(user_id)?,
        timestamp,
    )?))
}

/// Accepts non-empty strings and numbers as identifiers.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
