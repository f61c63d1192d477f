use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamp format used in artifact and summary file names.
/// Always UTC, zero-padded, most significant field first, so names sort by
/// time and never repeat when local clocks fall back.
pub const FILE_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%SZ";

/// A managed network element as supplied by the inventory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub hostname: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Device {
    pub fn new(id: impl Into<String>, platform: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            hostname: id.clone(),
            id,
            platform: platform.into(),
            port: None,
            username: None,
            password: None,
            extra: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("hostname", &self.hostname)
            .field("platform", &self.platform)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("extra", &self.extra)
            .finish()
    }
}

/// Wall-clock instant a run started, truncated to whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunTimestamp(DateTime<Utc>);

impl RunTimestamp {
    pub fn now() -> Self {
        Self(Utc::now().trunc_subsecs(0))
    }

    pub fn from_datetime<Tz: TimeZone>(at: DateTime<Tz>) -> Self {
        Self(at.with_timezone(&Utc).trunc_subsecs(0))
    }

    /// Rendering used in file names, e.g. `2026-10-19_14-03-09Z`.
    pub fn file_stamp(&self) -> String {
        self.0.format(FILE_STAMP_FORMAT).to_string()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// One device's backup attempt within a run.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub id: Uuid,
    /// Position of the device in the inventory snapshot.
    pub index: usize,
    pub device: Arc<Device>,
    pub timestamp: RunTimestamp,
}

impl BackupJob {
    pub fn new(index: usize, device: Arc<Device>, timestamp: RunTimestamp) -> Self {
        Self {
            id: Uuid::now_v7(),
            index,
            device,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AdapterError,
    WriteError,
    /// The run was cancelled before this job started.
    Cancelled,
    /// Anything else, including a panic inside the job.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdapterError => "adapter_error",
            Self::WriteError => "write_error",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single backup job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResult {
    Success {
        path: PathBuf,
        size_bytes: u64,
        /// Hex blake3 digest of the artifact as read back from disk.
        blake3: String,
    },
    Failure {
        kind: FailureKind,
        message: String,
    },
}

impl JobResult {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunEntry {
    pub device: Arc<Device>,
    pub result: JobResult,
    /// Number of times the job runner was invoked (0 if the job never started).
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTally {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunTally {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Accumulates results while a run is in flight.
///
/// Only the orchestrator's collector loop owns this; jobs deliver results
/// through a channel rather than touching it directly.
#[derive(Debug)]
pub struct RunCollector {
    run_id: Uuid,
    timestamp: RunTimestamp,
    expected: usize,
    entries: Vec<(usize, RunEntry)>,
}

impl RunCollector {
    pub fn new(run_id: Uuid, timestamp: RunTimestamp, expected: usize) -> Self {
        Self {
            run_id,
            timestamp,
            expected,
            entries: Vec::with_capacity(expected),
        }
    }

    pub fn record(&mut self, index: usize, entry: RunEntry) {
        self.entries.push((index, entry));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the collected results in inventory order.
    pub fn seal(mut self) -> BackupRun {
        debug_assert_eq!(
            self.entries.len(),
            self.expected,
            "sealed run must hold one result per device"
        );
        self.entries.sort_by_key(|(index, _)| *index);

        BackupRun {
            run_id: self.run_id,
            timestamp: self.timestamp,
            entries: self.entries.into_iter().map(|(_, entry)| entry).collect(),
        }
    }
}

/// All results for one invocation. Read-only once sealed.
#[derive(Debug, Clone, Serialize)]
pub struct BackupRun {
    run_id: Uuid,
    timestamp: RunTimestamp,
    entries: Vec<RunEntry>,
}

impl BackupRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn timestamp(&self) -> RunTimestamp {
        self.timestamp
    }

    pub fn entries(&self) -> &[RunEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every result recorded for `device_id`. More than one only when the
    /// inventory listed the device more than once.
    pub fn results_for<'a>(&'a self, device_id: &'a str) -> impl Iterator<Item = &'a JobResult> {
        self.entries
            .iter()
            .filter(move |entry| entry.device.id == device_id)
            .map(|entry| &entry.result)
    }

    pub fn tally(&self) -> RunTally {
        let succeeded = self
            .entries
            .iter()
            .filter(|entry| entry.result.is_success())
            .count();

        RunTally {
            total: self.entries.len(),
            succeeded,
            failed: self.entries.len() - succeeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn entry(id: &str, result: JobResult) -> RunEntry {
        RunEntry {
            device: Arc::new(Device::new(id, "ios")),
            result,
            attempts: 1,
        }
    }

    fn ok() -> JobResult {
        JobResult::Success {
            path: PathBuf::from("/tmp/x.cfg"),
            size_bytes: 1,
            blake3: String::new(),
        }
    }

    #[test]
    fn file_stamp_sorts_by_time() {
        let earlier = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        let a = RunTimestamp::from_datetime(earlier).file_stamp();
        let b = RunTimestamp::from_datetime(later).file_stamp();

        assert_eq!(a, "2025-12-31_23-59-59Z");
        assert_eq!(b, "2026-01-02_03-04-05Z");
        assert!(a < b);
    }

    #[test]
    fn file_stamp_is_unambiguous_across_dst_fall_back() {
        // 01:30 happens twice in New York on 2026-11-01: first at -04:00, then at -05:00.
        let first = FixedOffset::west_opt(4 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 11, 1, 1, 30, 0)
            .unwrap();
        let second = FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 11, 1, 1, 30, 0)
            .unwrap();

        let a = RunTimestamp::from_datetime(first).file_stamp();
        let b = RunTimestamp::from_datetime(second).file_stamp();

        assert_eq!(a, "2026-11-01_05-30-00Z");
        assert_eq!(b, "2026-11-01_06-30-00Z");
        assert!(a < b);
    }

    #[test]
    fn seal_orders_by_inventory_position() {
        let mut collector = RunCollector::new(Uuid::now_v7(), RunTimestamp::now(), 3);
        collector.record(2, entry("c", ok()));
        collector.record(0, entry("a", ok()));
        collector.record(1, entry("b", JobResult::failure(FailureKind::AdapterError, "x")));

        let run = collector.seal();
        let ids: Vec<&str> = run.entries().iter().map(|e| e.device.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let tally = run.tally();
        assert_eq!(tally.total, 3);
        assert_eq!(tally.succeeded, 2);
        assert_eq!(tally.failed, 1);
        assert!(!tally.all_succeeded());
    }

    #[test]
    fn duplicates_are_kept() {
        let mut collector = RunCollector::new(Uuid::now_v7(), RunTimestamp::now(), 2);
        collector.record(0, entry("r1", ok()));
        collector.record(1, entry("r1", JobResult::failure(FailureKind::WriteError, "x")));

        let run = collector.seal();
        assert_eq!(run.results_for("r1").count(), 2);
    }

    #[test]
    fn debug_redacts_password() {
        let mut device = Device::new("r1", "ios");
        device.password = Some("hunter2".to_string());
        let rendered = format!("{:?}", device);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn serialized_device_omits_password() {
        let mut device = Device::new("r1", "ios");
        device.password = Some("hunter2".to_string());
        let json = serde_json::to_string(&device).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
