use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::core::models::{
    BackupJob, BackupRun, Device, FailureKind, JobResult, RunCollector, RunEntry, RunTimestamp,
};
use crate::core::notifications::{RunEvent, RunObserver};
use crate::core::retry::RetryPolicy;
use crate::core::runner::{Attempt, JobRunner};
use crate::core::summary::SummaryReporter;
use crate::core::writer::ArtifactWriter;
use crate::error::WriteError;

/// A finished job on its way from a worker to the collector.
struct Completed {
    index: usize,
    entry: RunEntry,
}

/// Result of one full backup pass: the sealed run and where its summary went.
#[derive(Debug)]
pub struct PassOutcome {
    pub run: BackupRun,
    pub summary: Result<PathBuf, WriteError>,
}

/// Fans a device list out to a bounded pool of workers, one job per device,
/// and collects exactly one result per job.
pub struct Orchestrator {
    runner: JobRunner,
    reporter: SummaryReporter,
    max_workers: usize,
    retry: RetryPolicy,
    observers: Vec<Arc<dyn RunObserver>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        let config = &ctx.config;

        let mut writer = ArtifactWriter::new(&config.backup_directory);
        let mut reporter = SummaryReporter::new(config.summary_dir());
        if !config.sync_files {
            writer = writer.without_sync();
            reporter = reporter.without_sync();
        }

        Self {
            runner: JobRunner::new(ctx.fetcher.clone(), writer),
            reporter,
            max_workers: config.max_workers.max(1),
            retry: config.retry_policy(),
            observers: ctx.observers.clone(),
            shutdown: ctx.shutdown.clone(),
        }
    }

    /// Run one backup pass: back up every device, then write the summary
    /// exactly once for the sealed run.
    pub async fn execute(&self, devices: Vec<Device>) -> PassOutcome {
        self.execute_at(devices, RunTimestamp::now()).await
    }

    pub async fn execute_at(&self, devices: Vec<Device>, timestamp: RunTimestamp) -> PassOutcome {
        let run = self.run_all_at(devices, timestamp).await;
        let summary = self.reporter.report(&run).await;

        if let Err(e) = &summary {
            warn!(run_id = %run.run_id(), error = %e, "Failed to write run summary");
        }

        let failed_devices = run
            .entries()
            .iter()
            .filter(|entry| !entry.result.is_success())
            .map(|entry| entry.device.id.clone())
            .collect();

        self.emit(RunEvent::Finished {
            run_id: run.run_id(),
            timestamp: run.timestamp(),
            tally: run.tally(),
            failed_devices,
            summary_path: summary.as_ref().ok().cloned(),
        })
        .await;

        PassOutcome { run, summary }
    }

    /// Back up every device and return the sealed run.
    pub async fn run_all(&self, devices: Vec<Device>) -> BackupRun {
        self.run_all_at(devices, RunTimestamp::now()).await
    }

    /// As [`run_all`](Self::run_all) with an explicit run timestamp.
    pub async fn run_all_at(&self, devices: Vec<Device>, timestamp: RunTimestamp) -> BackupRun {
        let run_id = Uuid::now_v7();
        let span = info_span!("backup_run", %run_id);

        self.collect(run_id, timestamp, devices)
            .instrument(span)
            .await
    }

    async fn collect(
        &self,
        run_id: Uuid,
        timestamp: RunTimestamp,
        devices: Vec<Device>,
    ) -> BackupRun {
        let total = devices.len();
        self.emit(RunEvent::Started {
            run_id,
            timestamp,
            devices: total,
        })
        .await;

        let devices: Vec<Arc<Device>> = devices.into_iter().map(Arc::new).collect();
        let mut collector = RunCollector::new(run_id, timestamp, total);
        if devices.is_empty() {
            return collector.seal();
        }

        // The whole snapshot is queued up front; workers pull until it is empty.
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        for (index, device) in devices.iter().enumerate() {
            let _ = job_tx.send(BackupJob::new(index, device.clone(), timestamp));
        }
        drop(job_tx);

        let queue = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let worker_count = self.max_workers.min(total);
        debug!(workers = worker_count, jobs = total, "Dispatching backup jobs");

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(
                worker_loop(
                    queue.clone(),
                    self.runner.clone(),
                    self.retry,
                    self.shutdown.clone(),
                    result_tx.clone(),
                )
                .instrument(info_span!("worker", worker_id)),
            );
        }
        drop(result_tx);

        let mut seen = vec![false; total];
        while let Some(done) = result_rx.recv().await {
            seen[done.index] = true;
            self.emit_job(run_id, &done.entry).await;
            collector.record(done.index, done.entry);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Backup worker exited abnormally");
            }
        }

        // Jobs that never reported: not started before cancellation, or lost
        // with a worker. Either way the device still gets a result.
        let cancelled = self.shutdown.is_cancelled();
        for (index, device) in devices.iter().enumerate() {
            if seen[index] {
                continue;
            }

            let result = if cancelled {
                JobResult::failure(FailureKind::Cancelled, "run cancelled before job started")
            } else {
                JobResult::failure(FailureKind::Internal, "worker exited without reporting")
            };
            let entry = RunEntry {
                device: device.clone(),
                result,
                attempts: 0,
            };
            self.emit_job(run_id, &entry).await;
            collector.record(index, entry);
        }

        collector.seal()
    }

    async fn emit_job(&self, run_id: Uuid, entry: &RunEntry) {
        self.emit(RunEvent::JobFinished {
            run_id,
            device_id: entry.device.id.clone(),
            result: entry.result.clone(),
            attempts: entry.attempts,
        })
        .await;
    }

    async fn emit(&self, event: RunEvent) {
        for observer in &self.observers {
            if let Err(e) = observer.notify(&event).await {
                warn!(error = %e, "Run observer failed");
            }
        }
    }
}

async fn worker_loop(
    queue: Arc<Mutex<mpsc::UnboundedReceiver<BackupJob>>>,
    runner: JobRunner,
    retry: RetryPolicy,
    shutdown: CancellationToken,
    results: mpsc::UnboundedSender<Completed>,
) {
    loop {
        if shutdown.is_cancelled() {
            debug!("Shutdown requested, worker stopping");
            break;
        }

        let Some(job) = queue.lock().await.try_recv().ok() else {
            break;
        };

        let (result, attempts) = run_with_retry(&runner, &job, retry, &shutdown).await;
        let done = Completed {
            index: job.index,
            entry: RunEntry {
                device: job.device,
                result,
                attempts,
            },
        };

        if results.send(done).is_err() {
            break;
        }
    }
}

async fn run_with_retry(
    runner: &JobRunner,
    job: &BackupJob,
    retry: RetryPolicy,
    shutdown: &CancellationToken,
) -> (JobResult, u32) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = run_isolated(runner, job).await;

        if !retry.should_retry(attempt, &outcome.result, outcome.retryable) {
            return (outcome.result, attempt);
        }

        let delay = retry.backoff(attempt);
        warn!(
            device = %job.device.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Fetch failed, retrying"
        );

        tokio::select! {
            _ = shutdown.cancelled() => return (outcome.result, attempt),
            _ = sleep(delay) => {}
        }
    }
}

/// Run one attempt in its own task so a panic is confined to this job.
async fn run_isolated(runner: &JobRunner, job: &BackupJob) -> Attempt {
    let runner = runner.clone();
    let job = job.clone();

    match tokio::spawn(async move { runner.attempt(&job).await }).await {
        Ok(attempt) => attempt,
        Err(e) => {
            let message = if e.is_panic() {
                format!("job panicked: {}", panic_message(e.into_panic()))
            } else {
                format!("job task aborted: {}", e)
            };
            Attempt {
                result: JobResult::failure(FailureKind::Internal, message),
                retryable: false,
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
