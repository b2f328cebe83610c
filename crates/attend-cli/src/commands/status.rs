//! Status command for showing database location and row counts.

use std::io::Write;
use std::path::Path;

use anyhow::Result;

use attend_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, database_path: &Path) -> Result<()> {
    let counts = db.counts()?;

    writeln!(writer, "Attendance status")?;
    writeln!(writer, "Database: {}", database_path.display())?;
    writeln!(writer, "Users: {}", counts.users)?;
    writeln!(writer, "Sessions: {}", counts.sessions)?;
    writeln!(writer, "Open segments: {}", counts.open_segments)?;
    writeln!(writer, "Closed segments: {}", counts.closed_segments)?;

    Ok(())
}
