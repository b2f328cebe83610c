//! Segments command for inspecting one session's attendance.

use std::io::Write;

use anyhow::Result;
use attend_core::SessionId;
use attend_db::Database;

use super::apply::display_time;

pub fn run<W: Write>(writer: &mut W, db: &Database, session: &str, json: bool) -> Result<()> {
    let session_id = SessionId::new(session)?;
    let segments = db.list_segments(&session_id)?;

    if json {
        for segment in &segments {
            writeln!(writer, "{}", serde_json::to_string(segment)?)?;
        }
        return Ok(());
    }

    writeln!(writer, "Session {session_id}")?;
    if segments.is_empty() {
        writeln!(writer, "No segments recorded.")?;
        return Ok(());
    }

    for segment in segments {
        let span = match (segment.leave_time, segment.duration_sec) {
            (Some(leave), Some(duration)) => {
                format!("-> {} ({duration}s)", display_time(leave))
            }
            _ => "-> open".to_string(),
        };
        writeln!(
            writer,
            "- #{} {} {} {span}",
            segment.id,
            segment.user_id,
            display_time(segment.join_time)
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use attend_core::AttendanceEvent;
    use chrono::{DateTime, Utc};
    use insta::assert_snapshot;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn seeded() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let events = [
            AttendanceEvent::join("abc123", "alice", at("2025-01-01T10:00:00Z")).unwrap(),
            AttendanceEvent::join("abc123", "bob", at("2025-01-01T10:05:00Z")).unwrap(),
            AttendanceEvent::leave("abc123", "alice", at("2025-01-01T11:15:30Z")).unwrap(),
        ];
        for event in &events {
            db.apply(event).unwrap();
        }
        db
    }

    #[test]
    fn segments_lists_open_and_closed() {
        let db = seeded();
        let mut output = Vec::new();

        run(&mut output, &db, "abc123", false).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output, @r"
        Session abc123
        - #1 alice 2025-01-01T10:00:00Z -> 2025-01-01T11:15:30Z (4530s)
        - #2 bob 2025-01-01T10:05:00Z -> open
        ");
    }

    #[test]
    fn segments_json_is_one_object_per_line() {
        let db = seeded();
        let mut output = Vec::new();

        run(&mut output, &db, "abc123", true).unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["duration_sec"], 4530);
        assert_eq!(lines[1]["leave_time"], serde_json::Value::Null);
    }

    #[test]
    fn segments_reports_empty_session() {
        let db = Database::open_in_memory().unwrap();
        let mut output = Vec::new();

        run(&mut output, &db, "missing", false).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_eq!(output, "Session missing\nNo segments recorded.\n");
    }
}
