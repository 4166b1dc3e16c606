// schemarestore/src/import/report.rs
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::utils::{filename_timestamp, first_line, now_display};

/// Why a script ended up terminally failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Deferred on dependency errors until the run gave up on it.
    DependencyUnresolved,
    /// Needed a secret that was not configured; never sent to the server.
    MissingSecret,
    /// Server rejected the script with a non-retryable error.
    ExecutionFatal,
    /// The per-script timeout elapsed.
    Timeout,
}

/// One line of the error artifact, written per terminally failed script.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub object_name: String,
    pub path: String,
    pub stage: String,
    pub kind: FailureKind,
    pub attempts: u32,
    pub error: String,
    pub timestamp: String,
}

/// Collects error records as scripts fail terminally.
#[derive(Default)]
pub struct ErrorSink {
    records: Vec<ErrorRecord>,
}

impl ErrorSink {
    pub fn record(
        &mut self,
        object_name: &str,
        path: &Path,
        stage: &str,
        kind: FailureKind,
        attempts: u32,
        error: String,
    ) {
        eprintln!("❌ {} failed: {}", object_name, first_line(&error));
        self.records.push(ErrorRecord {
            object_name: object_name.to_string(),
            path: path.display().to_string(),
            stage: stage.to_string(),
            kind,
            attempts,
            error,
            timestamp: now_display(),
        });
    }

    pub fn into_records(self) -> Vec<ErrorRecord> {
        self.records
    }
}

/// Writes one JSON object per record to
/// `<dir>/import_errors_<timestamp>.jsonl` and returns the path.
pub fn persist_error_log(records: &[ErrorRecord], dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create error log directory {}", dir.display()))?;
    let path = dir.join(format!("import_errors_{}.jsonl", filename_timestamp()));

    let mut lines = String::new();
    for record in records {
        let line = serde_json::to_string(record).context("Failed to serialize error record")?;
        lines.push_str(&line);
        lines.push('\n');
    }
    std::fs::write(&path, lines)
        .with_context(|| format!("Failed to write error log {}", path.display()))?;
    println!("📄 Error log written to {}", path.display());
    Ok(path)
}

/// Final tallies for one import run.
#[derive(Debug)]
pub struct RunReport {
    pub total_scripts: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub excluded: usize,
    pub retry_passes_completed: u32,
    pub error_log_path: Option<PathBuf>,
    pub aborted: Option<String>,
    pub errors: Vec<ErrorRecord>,
}

impl RunReport {
    pub fn overall_success(&self) -> bool {
        self.failed == 0 && self.aborted.is_none()
    }

    pub fn print_summary(&self) {
        println!("📊 Import summary:");
        println!("   Scripts discovered: {}", self.total_scripts);
        println!("   Succeeded:          {}", self.succeeded);
        println!("   Failed:             {}", self.failed);
        println!("   Skipped:            {}", self.skipped);
        if self.excluded > 0 {
            println!("   Excluded by config: {}", self.excluded);
        }
        println!("   Retry passes:       {}", self.retry_passes_completed);
        if let Some(reason) = &self.aborted {
            eprintln!("❌ Run aborted: {}", reason);
        }
        if let Some(path) = &self.error_log_path {
            println!("   Error log:          {}", path.display());
        }
    }
}
