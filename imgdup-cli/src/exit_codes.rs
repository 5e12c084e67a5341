//! Exit codes following sysexits.h conventions.
//!
//! These codes let scripts tell a busy scanner apart from a broken source or
//! a bad invocation.

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error or invalid configuration.
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Cannot open input (export directory, database).
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Message source unavailable.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const NETWORK_ERROR: i32 = 69;

/// I/O error (cannot write report or database).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Another scan is already running; try again later.
/// Maps to EX_TEMPFAIL from sysexits.h.
pub const SCAN_BUSY: i32 = 75;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Classify error by inspecting the chain
        let code = if message.contains("already running") {
            SCAN_BUSY
        } else if message.contains("Invalid configuration") || message.contains("requires") {
            USAGE_ERROR
        } else if message.contains("export manifest") || message.contains("Failed to open") {
            INPUT_ERROR
        } else if message.contains("Source unavailable") || message.contains("HTTP request") {
            NETWORK_ERROR
        } else if message.contains("Failed to write")
            || message.contains("Storage error")
            || message.contains("I/O error")
        {
            IO_ERROR
        } else {
            GENERAL_ERROR
        };

        Self {
            code,
            message: Some(message),
        }
    }
}
