//! Sessions command for listing known sessions.

use std::io::Write;

use anyhow::Result;
use attend_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, limit: u32) -> Result<()> {
    let sessions = db.list_sessions(limit)?;
    if sessions.is_empty() {
        writeln!(writer, "No sessions recorded.")?;
        return Ok(());
    }
    for session in sessions {
        writeln!(writer, "{session}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use attend_core::AttendanceEvent;
    use chrono::{DateTime, Utc};

    #[test]
    fn sessions_respects_limit() {
        let mut db = Database::open_in_memory().unwrap();
        let at = DateTime::parse_from_rfc3339("2025-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        for session in ["s1", "s2", "s3"] {
            db.apply(&AttendanceEvent::leave(session, "alice", at).unwrap())
                .unwrap();
        }

        let mut output = Vec::new();
        run(&mut output, &db, 2).unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "s3\ns2\n");
    }

    #[test]
    fn sessions_reports_empty_store() {
        let db = Database::open_in_memory().unwrap();
        let mut output = Vec::new();
        run(&mut output, &db, 20).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "No sessions recorded.\n");
    }
}
