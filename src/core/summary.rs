use std::path::{Path, PathBuf};

use crate::core::models::{BackupRun, JobResult, RunEntry};
use crate::core::writer::{short_id, write_with_fallback};
use crate::error::WriteError;

/// Writes the per-run results file:
/// `<directory>/<stamp>_results.txt`, one header line then one line per device.
/// A second run in the same second writes `<stamp>_results-<run>.txt`.
#[derive(Debug, Clone)]
pub struct SummaryReporter {
    directory: PathBuf,
    sync_files: bool,
}

impl SummaryReporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            sync_files: true,
        }
    }

    pub fn without_sync(mut self) -> Self {
        self.sync_files = false;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn summary_path(&self, run: &BackupRun) -> PathBuf {
        self.directory
            .join(format!("{}_results.txt", run.timestamp().file_stamp()))
    }

    pub fn fallback_path(&self, run: &BackupRun) -> PathBuf {
        self.directory.join(format!(
            "{}_results-{}.txt",
            run.timestamp().file_stamp(),
            short_id(&run.run_id())
        ))
    }

    /// Write the summary for a sealed run. An existing summary is never
    /// replaced; if the timestamped name is taken the run id is added.
    pub async fn report(&self, run: &BackupRun) -> Result<PathBuf, WriteError> {
        let primary = self.summary_path(run);
        let fallback = self.fallback_path(run);
        let content = render(run);
        let sync = self.sync_files;

        let stored = tokio::task::spawn_blocking(move || {
            write_with_fallback(&primary, &fallback, content.as_bytes(), sync)
        })
        .await
        .map_err(|e| WriteError::Task(e.to_string()))??;

        Ok(stored.path)
    }
}

/// Render the summary text. Every record is exactly one line.
pub fn render(run: &BackupRun) -> String {
    let tally = run.tally();
    let mut out = format!(
        "{}: run {} ({}/{} succeeded)\n",
        run.timestamp().file_stamp(),
        run.run_id(),
        tally.succeeded,
        tally.total
    );

    for entry in run.entries() {
        out.push_str(&render_entry(entry));
        out.push('\n');
    }

    out
}

fn render_entry(entry: &RunEntry) -> String {
    let device = single_line(&entry.device.id);
    match &entry.result {
        JobResult::Success {
            path, size_bytes, ..
        } => format!(
            "{}\tOK\t{}\t{} bytes",
            device,
            single_line(&path.display().to_string()),
            size_bytes
        ),
        JobResult::Failure { kind, message } => format!(
            "{}\tFAILED\t{}\t{} (attempts: {})",
            device,
            kind,
            single_line(message),
            entry.attempts
        ),
    }
}

fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}
