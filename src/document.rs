use crate::probe::ProbeResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Succeeded,
    /// Pages come from one successful attempt, but fewer than expected.
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    ToolError,
    VerificationFailed,
    Timeout,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::ToolError => "tool_error",
            AttemptOutcome::VerificationFailed => "verification_failed",
            AttemptOutcome::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub method: String,
    /// 1-based position of the method in the ladder.
    pub rank: usize,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub outcome: AttemptOutcome,
    pub stderr_excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub index: u32,
    pub path: PathBuf,
    pub method: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub file: PathBuf,
    pub output_dir: PathBuf,
    pub status: DocumentStatus,
    pub page_count: u32,
    pub expected_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeResult>,
    pub attempts: Vec<Attempt>,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn new(file: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            file,
            output_dir,
            status: DocumentStatus::Pending,
            page_count: 0,
            expected_pages: None,
            input_sha256: None,
            probe: None,
            attempts: Vec::new(),
            pages: Vec::new(),
        }
    }

    /// File stem used for the output and work directory names.
    pub fn stem(&self) -> String {
        self.file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }

    pub fn successful_attempt(&self) -> Option<&Attempt> {
        self.attempts
            .iter()
            .find(|a| a.outcome == AttemptOutcome::Success)
    }

    pub fn is_finished(&self) -> bool {
        self.status != DocumentStatus::Pending
    }
}
