//! Failure taxonomy.
//!
//! [`AttemptError`] covers everything that can go wrong inside one method's
//! attempt on one document. It is always recovered by the fallback ladder and
//! never aborts the document. [`DocumentError`] is the terminal state of a
//! document once the ladder is exhausted; it is recorded in the failure list
//! and never propagated past the job runner.

use crate::document::AttemptOutcome;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    /// Binary missing or the process could not be spawned.
    #[error("{tool}: could not invoke `{exe}`: {detail}")]
    ToolInvocation {
        tool: String,
        exe: String,
        detail: String,
    },

    #[error("{tool}: exited with {}", exit_label(*code))]
    ToolExit { tool: String, code: Option<i32> },

    #[error("{tool}: exceeded timeout of {}s", timeout.as_secs())]
    Timeout { tool: String, timeout: Duration },

    /// The tool ran, but its output is missing, incomplete or corrupt.
    #[error("verification failed: {detail}")]
    Verification { detail: String },
}

impl AttemptError {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            AttemptError::ToolInvocation { .. } | AttemptError::ToolExit { .. } => {
                AttemptOutcome::ToolError
            }
            AttemptError::Timeout { .. } => AttemptOutcome::Timeout,
            AttemptError::Verification { .. } => AttemptOutcome::VerificationFailed,
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "no exit code (killed by signal)".to_string(),
    }
}

#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    #[error("{}: all {attempts} method(s) failed; last: {last}", file.display())]
    Exhausted {
        file: PathBuf,
        attempts: usize,
        last: String,
    },
}
