//! End-to-end backup passes against the simulated fetcher.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cfgsnap::adapters::{SimulatedFetcher, Simulator};
use cfgsnap::config::AppConfig;
use cfgsnap::context::AppContext;
use cfgsnap::core::{
    Device, FailureKind, JobResult, Orchestrator, RunEvent, RunObserver, RunTimestamp,
};
use cfgsnap::error::FetchError;
use chrono::{TimeZone, Utc};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn test_config(root: &Path, max_workers: usize) -> AppConfig {
    AppConfig {
        backup_directory: root.to_path_buf(),
        max_workers,
        retry_backoff_ms: 1,
        sync_files: false,
        ..AppConfig::default()
    }
}

fn setup(root: &Path, max_workers: usize) -> (AppContext, Simulator) {
    let (fetcher, sim) = SimulatedFetcher::new();
    let ctx = AppContext::new(test_config(root, max_workers), Arc::new(fetcher));
    (ctx, sim)
}

fn devices(ids: &[&str]) -> Vec<Device> {
    ids.iter().map(|id| Device::new(*id, "ios")).collect()
}

fn stamp(sec: u32) -> RunTimestamp {
    RunTimestamp::from_datetime(Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, sec).unwrap())
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunObserver for RecordingObserver {
    async fn notify(&self, event: &RunEvent) -> Result<()> {
        let label = match event {
            RunEvent::Started { devices, .. } => format!("started:{}", devices),
            RunEvent::JobFinished { device_id, .. } => format!("job:{}", device_id),
            RunEvent::Finished { tally, .. } => format!("finished:{}", tally.total),
        };
        self.events.lock().unwrap().push(label);
        Ok(())
    }
}

struct FailingObserver;

#[async_trait]
impl RunObserver for FailingObserver {
    async fn notify(&self, _event: &RunEvent) -> Result<()> {
        anyhow::bail!("webhook unreachable")
    }
}

#[tokio::test]
async fn test_mixed_outcomes_scenario() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 4);
    let r1_text = "interface eth0\n ip address 10.0.0.1 255.255.255.0\n!\n";
    sim.respond("r1", r1_text);
    sim.fail("r2", FetchError::Timeout(30));
    sim.respond("r3", "");

    let outcome = Orchestrator::new(ctx)
        .execute(devices(&["r1", "r2", "r3"]))
        .await;
    let run = &outcome.run;

    assert_eq!(run.len(), 3);

    match run.results_for("r1").next().unwrap() {
        JobResult::Success {
            path, size_bytes, ..
        } => {
            assert_eq!(*size_bytes, r1_text.len() as u64);
            assert_eq!(std::fs::read_to_string(path).unwrap(), r1_text);
        }
        other => panic!("r1: expected success, got {:?}", other),
    }

    assert_eq!(
        run.results_for("r2").next().unwrap().failure_kind(),
        Some(FailureKind::AdapterError)
    );
    assert!(!temp.path().join("r2").exists());

    match run.results_for("r3").next().unwrap() {
        JobResult::Success { size_bytes, .. } => assert_eq!(*size_bytes, 0),
        other => panic!("r3: expected success, got {:?}", other),
    }

    let tally = run.tally();
    assert_eq!((tally.succeeded, tally.failed), (2, 1));

    let summary = std::fs::read_to_string(outcome.summary.unwrap()).unwrap();
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("r1\tOK"));
    assert!(lines[2].starts_with("r2\tFAILED\tadapter_error"));
    assert!(lines[3].starts_with("r3\tOK"));
}

#[tokio::test]
async fn test_empty_inventory_still_reports() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 4);

    let outcome = Orchestrator::new(ctx).execute(Vec::new()).await;

    assert!(outcome.run.is_empty());
    assert_eq!(sim.total_fetches(), 0);

    let summary_path = outcome.summary.unwrap();
    assert!(summary_path.starts_with(temp.path().join("summaries")));
    let summary = std::fs::read_to_string(summary_path).unwrap();
    assert_eq!(summary.lines().count(), 1);
}

#[tokio::test]
async fn test_one_failure_does_not_leak() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 3);
    let ids: Vec<String> = (0..12).map(|i| format!("dev{:02}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    sim.fail("dev05", FetchError::Unreachable("no route to host".to_string()));

    let run = Orchestrator::new(ctx).run_all(devices(&id_refs)).await;

    assert_eq!(run.len(), 12);
    for entry in run.entries() {
        if entry.device.id == "dev05" {
            assert_eq!(entry.result.failure_kind(), Some(FailureKind::AdapterError));
        } else {
            assert!(entry.result.is_success(), "{} failed", entry.device.id);
        }
    }
    // Sealed run keeps inventory order
    let order: Vec<&str> = run.entries().iter().map(|e| e.device.id.as_str()).collect();
    assert_eq!(order, id_refs);
}

#[tokio::test]
async fn test_panic_is_confined_to_its_device() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 2);
    sim.panic("bad", "vendor library exploded");

    let run = Orchestrator::new(ctx)
        .run_all(devices(&["a", "bad", "b"]))
        .await;

    assert_eq!(run.len(), 3);
    match run.results_for("bad").next().unwrap() {
        JobResult::Failure { kind, message } => {
            assert_eq!(*kind, FailureKind::Internal);
            assert!(message.contains("vendor library exploded"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(run.results_for("a").next().unwrap().is_success());
    assert!(run.results_for("b").next().unwrap().is_success());
}

#[tokio::test]
async fn test_duplicate_devices_both_processed() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 1);

    let run = Orchestrator::new(ctx)
        .run_all_at(devices(&["r1", "r2", "r1"]), stamp(0))
        .await;

    assert_eq!(run.len(), 3);
    assert_eq!(sim.fetch_count("r1"), 2);

    let r1: Vec<&JobResult> = run.results_for("r1").collect();
    assert_eq!(r1.len(), 2);
    // Same device and timestamp: the second job lands under its fallback name
    match (r1[0], r1[1]) {
        (JobResult::Success { path: first, .. }, JobResult::Success { path: second, .. }) => {
            assert_ne!(first, second);
            assert!(first.exists() && second.exists());
        }
        other => panic!("expected two successes, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ids_that_sanitize_alike_both_succeed() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 2);
    sim.respond("core/sw1", "hostname core/sw1\n");
    sim.respond("core_sw1", "hostname core_sw1\n");

    let run = Orchestrator::new(ctx)
        .run_all_at(devices(&["core/sw1", "core_sw1"]), stamp(0))
        .await;

    assert!(run.tally().all_succeeded());
    for id in ["core/sw1", "core_sw1"] {
        match run.results_for(id).next().unwrap() {
            JobResult::Success { path, .. } => assert_eq!(
                std::fs::read_to_string(path).unwrap(),
                format!("hostname {}\n", id)
            ),
            other => panic!("{}: expected success, got {:?}", id, other),
        }
    }
}

#[tokio::test]
async fn test_same_second_passes_both_complete() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 2);
    let orchestrator = Orchestrator::new(ctx);

    sim.respond("r1", "hostname r1\nversion 1\n");
    let first = orchestrator.execute_at(devices(&["r1"]), stamp(5)).await;
    sim.respond("r1", "hostname r1\nversion 2\n");
    let second = orchestrator.execute_at(devices(&["r1"]), stamp(5)).await;

    assert!(first.run.tally().all_succeeded());
    assert!(second.run.tally().all_succeeded());

    let first_summary = first.summary.unwrap();
    let second_summary = second.summary.unwrap();
    assert_ne!(first_summary, second_summary);
    assert!(first_summary.exists() && second_summary.exists());
    assert!(std::fs::read_to_string(&second_summary)
        .unwrap()
        .contains(&second.run.run_id().to_string()));

    let path_of = |result: &JobResult| match result {
        JobResult::Success { path, .. } => path.clone(),
        other => panic!("expected success, got {:?}", other),
    };
    assert_eq!(
        std::fs::read_to_string(path_of(&first.run.entries()[0].result)).unwrap(),
        "hostname r1\nversion 1\n"
    );
    assert_eq!(
        std::fs::read_to_string(path_of(&second.run.entries()[0].result)).unwrap(),
        "hostname r1\nversion 2\n"
    );
}

#[tokio::test]
async fn test_successive_runs_keep_both_artifacts() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 2);
    let orchestrator = Orchestrator::new(ctx);

    sim.respond("r1", "hostname r1\nversion 1\n");
    let first = orchestrator.execute_at(devices(&["r1"]), stamp(1)).await;
    sim.respond("r1", "hostname r1\nversion 2\n");
    let second = orchestrator.execute_at(devices(&["r1"]), stamp(2)).await;

    let path_of = |result: &JobResult| match result {
        JobResult::Success { path, .. } => path.clone(),
        other => panic!("expected success, got {:?}", other),
    };
    let first_path = path_of(&first.run.entries()[0].result);
    let second_path = path_of(&second.run.entries()[0].result);

    assert_ne!(first_path, second_path);
    assert_eq!(
        std::fs::read_to_string(&first_path).unwrap(),
        "hostname r1\nversion 1\n"
    );
    assert_eq!(
        std::fs::read_to_string(&second_path).unwrap(),
        "hostname r1\nversion 2\n"
    );
    assert_ne!(first.summary.unwrap(), second.summary.unwrap());
}

#[tokio::test]
async fn test_worker_ceiling_is_respected() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 3);
    let ids: Vec<String> = (0..10).map(|i| format!("sw{}", i)).collect();
    for id in &ids {
        sim.delay(id, Duration::from_millis(30));
    }
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    let run = Orchestrator::new(ctx).run_all(devices(&id_refs)).await;

    assert_eq!(run.len(), 10);
    assert_eq!(run.tally().succeeded, 10);
    assert!(sim.max_in_flight() <= 3, "saw {} in flight", sim.max_in_flight());
    assert!(sim.max_in_flight() >= 1);
}

#[tokio::test]
async fn test_transient_failure_retried() {
    let temp = tempdir().unwrap();
    let (fetcher, sim) = SimulatedFetcher::new();
    let config = AppConfig {
        retry_attempts: 2,
        ..test_config(temp.path(), 2)
    };
    let ctx = AppContext::new(config, Arc::new(fetcher));
    sim.fail_times("flaky", 1, FetchError::Timeout(10));
    sim.fail("locked", FetchError::Authentication("bad password".to_string()));

    let run = Orchestrator::new(ctx)
        .run_all(devices(&["flaky", "locked"]))
        .await;

    let flaky = &run.entries()[0];
    assert!(flaky.result.is_success());
    assert_eq!(flaky.attempts, 2);

    let locked = &run.entries()[1];
    assert_eq!(locked.result.failure_kind(), Some(FailureKind::AdapterError));
    assert_eq!(locked.attempts, 1);
    assert_eq!(sim.fetch_count("locked"), 1);
}

#[tokio::test]
async fn test_cancelled_run_accounts_for_every_device() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 2);
    let token = CancellationToken::new();
    token.cancel();

    let outcome = Orchestrator::new(ctx.with_shutdown(token))
        .execute(devices(&["r1", "r2", "r3"]))
        .await;

    assert_eq!(outcome.run.len(), 3);
    assert_eq!(sim.total_fetches(), 0);
    for entry in outcome.run.entries() {
        assert_eq!(entry.result.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(entry.attempts, 0);
    }

    let summary = std::fs::read_to_string(outcome.summary.unwrap()).unwrap();
    assert_eq!(summary.lines().count(), 4);
}

#[tokio::test]
async fn test_cancel_mid_run_lets_in_flight_jobs_finish() {
    let temp = tempdir().unwrap();
    let (ctx, sim) = setup(temp.path(), 1);
    sim.delay("slow", Duration::from_millis(200));
    let token = CancellationToken::new();
    let orchestrator = Orchestrator::new(ctx.with_shutdown(token.clone()));

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let run = orchestrator.run_all(devices(&["slow", "next"])).await;
    canceller.await.unwrap();

    assert_eq!(run.len(), 2);
    assert!(run.entries()[0].result.is_success());
    assert_eq!(
        run.entries()[1].result.failure_kind(),
        Some(FailureKind::Cancelled)
    );
    assert_eq!(sim.fetch_count("next"), 0);
}

#[tokio::test]
async fn test_observers_see_every_job_once() {
    let temp = tempdir().unwrap();
    let (ctx, _sim) = setup(temp.path(), 2);
    let recorder = Arc::new(RecordingObserver::default());
    let ctx = ctx
        .with_observer(Arc::new(FailingObserver))
        .with_observer(recorder.clone());

    Orchestrator::new(ctx)
        .execute(devices(&["a", "b", "c"]))
        .await;

    let events = recorder.events();
    assert_eq!(events.first().map(String::as_str), Some("started:3"));
    assert_eq!(events.last().map(String::as_str), Some("finished:3"));
    assert_eq!(events.iter().filter(|e| e.starts_with("job:")).count(), 3);
}

#[tokio::test]
async fn test_summary_write_failure_is_reported() {
    let temp = tempdir().unwrap();
    let blocker = temp.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let (fetcher, _sim) = SimulatedFetcher::new();
    let config = AppConfig {
        summary_directory: Some(blocker),
        ..test_config(temp.path(), 2)
    };
    let outcome = Orchestrator::new(AppContext::new(config, Arc::new(fetcher)))
        .execute(devices(&["r1"]))
        .await;

    assert!(outcome.run.entries()[0].result.is_success());
    assert!(outcome.summary.is_err());
}
