//! Subcommand implementations.

pub mod report;
pub mod scan;
