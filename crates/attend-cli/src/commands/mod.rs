//! CLI subcommand implementations.

pub mod apply;
pub mod segments;
pub mod serve;
pub mod sessions;
pub mod status;
