//! Exit codes following sysexits.h conventions.
//!
//! These codes give scripts and moderation bots a way to tell a match apart
//! from an operational failure without parsing output.

use std::fmt;

use imgward_core::{Action, Tier, WardenError};

/// Successful execution, no action warranted.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage or configuration error.
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// A scanned image matched known-bad content and earned an action.
/// Maps to EX_DATAERR from sysexits.h.
pub const MATCH_FOUND: i32 = 65;

/// Cannot open input file or directory.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Reconciliation corpus unavailable or empty.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const UNAVAILABLE: i32 = 69;

/// Store or whitelist snapshot could not be read or written.
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Returned by `scan` when the event earns an action.
#[derive(Debug)]
pub struct MatchFound {
    pub tier: Tier,
    pub action: Action,
}

impl fmt::Display for MatchFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} match, action: {}", self.tier, self.action)
    }
}

impl std::error::Error for MatchFound {}

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        let code = if err.downcast_ref::<MatchFound>().is_some() {
            MATCH_FOUND
        } else if let Some(warden) = err.chain().find_map(|e| e.downcast_ref::<WardenError>()) {
            match warden {
                WardenError::InvalidConfig(_) => USAGE_ERROR,
                WardenError::StoreIo { .. } => IO_ERROR,
                WardenError::CollaboratorUnavailable(_)
                | WardenError::CorpusEmpty(_)
                | WardenError::ReconcileInProgress => UNAVAILABLE,
                _ => GENERAL_ERROR,
            }
        } else if message.contains("Failed to read") {
            INPUT_ERROR
        } else if message.contains("Failed to write") {
            IO_ERROR
        } else {
            GENERAL_ERROR
        };

        // A decided match is an outcome, not a failure; scan already printed it.
        let message = (code != MATCH_FOUND).then_some(message);
        Self { code, message }
    }
}
