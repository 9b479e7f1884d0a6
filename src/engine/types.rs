use super::process::Step;
use crate::error::AttemptError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What one adapter hands back to the orchestrator. Success is decided later
/// by the page verifier, not by the exit code alone.
#[derive(Debug, Clone, Default)]
pub struct AttemptResult {
    pub exit_code: Option<i32>,
    pub stderr_excerpt: String,
    pub produced_files: Vec<PathBuf>,
    pub error: Option<AttemptError>,
}

impl AttemptResult {
    pub fn from_step(step: Step, work_dir: &Path) -> Self {
        Self {
            exit_code: step.exit_code,
            stderr_excerpt: step.stderr_excerpt,
            produced_files: list_files(work_dir),
            error: step.error,
        }
    }

    pub fn failed(error: AttemptError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDiag {
    pub method: String,
    pub exe: String,
    pub available: bool,
    pub version: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    files.sort();
    files
}
