use std::sync::Arc;

use tracing::{Instrument, debug, info_span};

use crate::core::fetcher::ConfigFetcher;
use crate::core::models::{BackupJob, FailureKind, JobResult};
use crate::core::writer::ArtifactWriter;

/// One runner invocation. The result flattens the fetch error into a
/// message, so retryability is decided first and carried alongside.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub result: JobResult,
    pub retryable: bool,
}

/// Executes one backup job: fetch, then write, then report.
///
/// Every error is folded into the returned `JobResult`; nothing escapes.
/// The fetcher is called exactly once per `run`.
#[derive(Clone)]
pub struct JobRunner {
    fetcher: Arc<dyn ConfigFetcher>,
    writer: ArtifactWriter,
}

impl JobRunner {
    pub fn new(fetcher: Arc<dyn ConfigFetcher>, writer: ArtifactWriter) -> Self {
        Self { fetcher, writer }
    }

    pub async fn run(&self, job: &BackupJob) -> JobResult {
        self.attempt(job).await.result
    }

    pub async fn attempt(&self, job: &BackupJob) -> Attempt {
        let span = info_span!(
            "backup_job",
            job_id = %job.id,
            device = %job.device.id,
            platform = %job.device.platform
        );

        async {
            debug!(fetcher = self.fetcher.name(), "Fetching running configuration");

            let text = match self.fetcher.fetch_running_config(&job.device).await {
                Ok(text) => text,
                Err(e) => {
                    return Attempt {
                        result: JobResult::failure(FailureKind::AdapterError, e.to_string()),
                        retryable: e.is_retryable(),
                    };
                }
            };

            debug!(bytes = text.len(), "Configuration received");

            let result = match self
                .writer
                .write(&job.device.id, &job.timestamp, &job.id, &text)
                .await
            {
                Ok(stored) => JobResult::Success {
                    path: stored.path,
                    size_bytes: stored.size_bytes,
                    blake3: stored.blake3,
                },
                Err(e) => JobResult::failure(FailureKind::WriteError, e.to_string()),
            };

            Attempt {
                result,
                retryable: false,
            }
        }
        .instrument(span)
        .await
    }
}
