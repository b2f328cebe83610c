//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::apply::ApplyArgs;

/// Attendance reconciler.
///
/// Receives participant join/leave webhooks and records per-user attendance
/// segments.
#[derive(Debug, Parser)]
#[command(name = "attend", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the webhook HTTP server.
    Serve {
        /// Address to bind, overriding the configured `listen_addr`.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Apply a single join or leave event.
    Apply(ApplyArgs),

    /// List the segments recorded for a session.
    Segments {
        /// Session identifier.
        session: String,

        /// Output one JSON object per line.
        #[arg(long)]
        json: bool,
    },

    /// List known sessions.
    Sessions {
        /// Maximum number of sessions to show.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Show database location and row counts.
    Status,
}
