pub mod fetcher;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod retry;
pub mod runner;
pub mod summary;
pub mod writer;

pub use fetcher::ConfigFetcher;
pub use models::{
    BackupJob, BackupRun, Device, FailureKind, JobResult, RunCollector, RunEntry, RunTally,
    RunTimestamp,
};
pub use notifications::{RunEvent, RunObserver};
pub use orchestrator::{Orchestrator, PassOutcome};
pub use retry::RetryPolicy;
pub use runner::{Attempt, JobRunner};
pub use summary::SummaryReporter;
pub use writer::{ArtifactWriter, StoredArtifact};
