use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{RunEvent, RunObserver};
use crate::core::models::JobResult;

/// Writes run events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

#[async_trait]
impl RunObserver for TracingObserver {
    async fn notify(&self, event: &RunEvent) -> Result<()> {
        match event {
            RunEvent::Started {
                run_id,
                timestamp,
                devices,
            } => {
                info!(%run_id, %timestamp, devices, "Backup run started");
            }
            RunEvent::JobFinished {
                device_id,
                result,
                attempts,
                ..
            } => match result {
                JobResult::Success {
                    path, size_bytes, ..
                } => {
                    info!(
                        device = %device_id,
                        path = %path.display(),
                        size_bytes,
                        attempts,
                        "Backup saved"
                    );
                }
                JobResult::Failure { kind, message } => {
                    error!(
                        device = %device_id,
                        kind = %kind,
                        attempts,
                        error = %message,
                        "Backup failed"
                    );
                }
            },
            RunEvent::Finished {
                run_id,
                tally,
                failed_devices,
                summary_path,
                ..
            } => {
                let summary = summary_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string());

                if tally.all_succeeded() {
                    info!(
                        %run_id,
                        total = tally.total,
                        succeeded = tally.succeeded,
                        summary = %summary,
                        "Backup run complete"
                    );
                } else {
                    warn!(
                        %run_id,
                        total = tally.total,
                        succeeded = tally.succeeded,
                        failed = tally.failed,
                        failed_devices = ?failed_devices,
                        summary = %summary,
                        "Backup run complete with failures"
                    );
                }
            }
        }
        Ok(())
    }
}
