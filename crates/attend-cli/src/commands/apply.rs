//! Apply command for feeding a single event through the reconciler.

use std::io::Write;

use anyhow::{Context, Result};
use attend_core::{AttendanceEvent, EventType, SegmentState, SessionId, UserId, parse_timestamp};
use attend_db::Database;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Args, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventKindArg {
    Join,
    Leave,
}

impl From<EventKindArg> for EventType {
    fn from(kind: EventKindArg) -> Self {
        match kind {
            EventKindArg::Join => Self::Join,
            EventKindArg::Leave => Self::Leave,
        }
    }
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Event type.
    #[arg(long = "type", value_enum)]
    pub kind: EventKindArg,
    /// Session identifier.
    #[arg(long)]
    pub session: String,
    /// User identifier.
    #[arg(long)]
    pub user: String,
    /// Event time as RFC 3339 with offset (defaults to now).
    #[arg(long)]
    pub at: Option<String>,
}

pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    args: &ApplyArgs,
    now: DateTime<Utc>,
) -> Result<()> {
    let timestamp = match args.at.as_deref() {
        Some(at) => parse_timestamp(at).context("invalid --at timestamp")?,
        None => now,
    };
    let event = AttendanceEvent::new(
        args.kind.into(),
        SessionId::new(args.session.as_str())?,
        UserId::new(args.user.as_str())?,
        timestamp,
    )?;

    let state = db
        .apply(&event)
        .with_context(|| format!("failed to apply {} event", event.kind))?;
    writeln!(writer, "{}", describe(&state))?;
    Ok(())
}

fn describe(state: &SegmentState) -> String {
    let action = state.action();
    match state {
        SegmentState::Opened(segment) => format!(
            "{action} #{} {}/{} joined {}",
            segment.id,
            segment.session_id,
            segment.user_id,
            display_time(segment.join_time)
        ),
        SegmentState::Closed(segment) => format!(
            "{action} #{} {}/{} {} -> {} ({}s)",
            segment.id,
            segment.session_id,
            segment.user_id,
            display_time(segment.join_time),
            segment.leave_time.map(display_time).unwrap_or_default(),
            segment.duration_sec.unwrap_or_default()
        ),
        SegmentState::DuplicateJoin(segment) => format!(
            "{action} #{} {}/{} (suppressed)",
            segment.id, segment.session_id, segment.user_id
        ),
        SegmentState::AlreadyClosed(segment) => format!(
            "{action} #{} {}/{} (no change)",
            segment.id, segment.session_id, segment.user_id
        ),
        SegmentState::OrphanLeave => format!("{action} (leave discarded)"),
    }
}

pub fn display_time(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}
