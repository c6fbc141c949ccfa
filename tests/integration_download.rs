//! End-to-end scenarios against a local range-serving HTTP server (spec
//! §8): single-segment and multi-segment transfers, pause/resume byte
//! parity, checksum-mismatch failure, etag-invalidated resume, and
//! retry-then-succeed on a transient 503.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::range_server::{self, RangeServerOptions};
use downloader_core::config::{DownloadConfig, DownloadOptions, HashAlgorithm, IntegrityConfig};
use downloader_core::orchestrator::{Orchestrator, DEFAULT_MAX_CONCURRENT_TASKS};
use downloader_core::progress::ProgressMonitor;
use downloader_core::registry::TaskRegistry;
use downloader_core::resume_store::{ResumeRecord, ResumeStore};
use downloader_core::session::SessionManager;
use downloader_core::task::{Status, TaskId, TaskRecord};

struct Harness {
    orchestrator: Orchestrator,
    dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let client = reqwest::Client::new();
    let registry = Arc::new(TaskRegistry::new(dir.path().join("tasks.json")));
    let resume_store = Arc::new(ResumeStore::new(dir.path().join("resume")));
    let progress = Arc::new(ProgressMonitor::new());
    let sessions = Arc::new(SessionManager::new(client.clone()));
    let orchestrator = Orchestrator::new(
        client,
        registry,
        resume_store,
        progress,
        sessions,
        DEFAULT_MAX_CONCURRENT_TASKS,
    );
    Harness { orchestrator, dir }
}

fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn base_options(url: String, output_path: PathBuf) -> DownloadOptions {
    DownloadOptions {
        url,
        output_path,
        ..Default::default()
    }
}

#[tokio::test]
async fn small_file_downloads_as_single_segment() {
    let harness = harness();
    let body = b"hello range server".to_vec();
    let server = range_server::start(body.clone());

    let output = harness.dir.path().join("small.bin");
    let mut opts = base_options(server.base_url.clone(), output.clone());
    opts.work_mode = Some(downloader_core::config::WorkMode::Blocking);
    let config = DownloadConfig::from_options(opts).unwrap();

    let task_id = harness.orchestrator.create(config).await.unwrap();
    let record = harness.orchestrator.get(task_id).await.unwrap();
    assert_eq!(record.status, Status::Completed);
    assert_eq!(tokio::fs::read(&output).await.unwrap(), body);
}

#[tokio::test]
async fn large_file_splits_into_four_exact_segments() {
    let harness = harness();
    let body = pattern_bytes(4_000_000);
    let server = range_server::start(body.clone());

    let output = harness.dir.path().join("large.bin");
    let mut opts = base_options(server.base_url.clone(), output.clone());
    opts.work_mode = Some(downloader_core::config::WorkMode::Blocking);
    opts.max_concurrency = Some(4);
    let config = DownloadConfig::from_options(opts).unwrap();

    let task_id = harness.orchestrator.create(config).await.unwrap();
    let record = harness.orchestrator.get(task_id).await.unwrap();
    assert_eq!(record.status, Status::Completed);
    assert_eq!(record.progress.segments.len(), 4);
    assert_eq!(tokio::fs::read(&output).await.unwrap(), body);
}

#[tokio::test]
async fn pause_then_resume_reproduces_an_uninterrupted_download() {
    let harness = harness();
    let body = pattern_bytes(8_000_000);
    let server = range_server::start(body.clone());

    let output = harness.dir.path().join("resumable.bin");
    let mut opts = base_options(server.base_url.clone(), output.clone());
    opts.max_concurrency = Some(2);
    let config = DownloadConfig::from_options(opts).unwrap();

    let task_id = harness.orchestrator.create(config).await.unwrap();

    let mut paused = false;
    for _ in 0..40 {
        if harness.orchestrator.pause(task_id).await.is_ok() {
            paused = true;
            break;
        }
        let record = harness.orchestrator.get(task_id).await.unwrap();
        if record.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    if paused {
        for _ in 0..40 {
            let record = harness.orchestrator.get(task_id).await.unwrap();
            if record.status == Status::Paused {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(harness.orchestrator.get(task_id).await.unwrap().status, Status::Paused);

        let handle = harness.orchestrator.resume(task_id).await.unwrap();
        handle.await.unwrap();
    }

    let record = harness.orchestrator.get(task_id).await.unwrap();
    assert_eq!(record.status, Status::Completed);
    assert_eq!(tokio::fs::read(&output).await.unwrap(), body);
}

#[tokio::test]
async fn checksum_mismatch_fails_the_task() {
    let harness = harness();
    let body = b"integrity checked payload".to_vec();
    let server = range_server::start(body.clone());

    let output = harness.dir.path().join("checked.bin");
    let mut opts = base_options(server.base_url.clone(), output.clone());
    opts.work_mode = Some(downloader_core::config::WorkMode::Blocking);
    opts.integrity = Some(IntegrityConfig {
        algorithm: HashAlgorithm::Sha256,
        expected_checksum: Some("0".repeat(64)),
        verify_segments: true,
        verify_final: true,
    });
    let config = DownloadConfig::from_options(opts).unwrap();

    let task_id = harness.orchestrator.create(config).await.unwrap();
    let record = harness.orchestrator.get(task_id).await.unwrap();
    assert_eq!(record.status, Status::Failed);
    assert_eq!(record.error.unwrap().code, "ChecksumMismatch");
}

#[tokio::test]
async fn etag_change_discards_a_stale_resume_record() {
    let dir = tempfile::tempdir().unwrap();
    let body = pattern_bytes(2_000_000);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            etag: Some("\"fresh-etag\"".to_string()),
            ..Default::default()
        },
    );

    let output = dir.path().join("etag.bin");
    let opts = base_options(server.base_url.clone(), output.clone());
    let config = DownloadConfig::from_options(opts).unwrap();

    // Registers a task directly (bypassing `create`) so the resume record
    // below can be pinned to a task id chosen by the test, carrying an
    // etag that no longer matches what the server reports.
    let task_id = TaskId::new();
    let registry = TaskRegistry::new(dir.path().join("tasks.json"));
    registry.register(TaskRecord::new(task_id, config.clone())).await;

    let resume_store = ResumeStore::new(dir.path().join("resume"));
    let stale = ResumeRecord::new(
        task_id,
        config.url.clone(),
        config.output_path.clone(),
        body.len() as u64,
        vec![],
        Some("\"stale-etag\"".to_string()),
        None,
    );
    resume_store.save(&stale).await.unwrap();

    let progress = Arc::new(ProgressMonitor::new());
    let client = reqwest::Client::new();
    let sessions = Arc::new(SessionManager::new(client.clone()));
    let orchestrator = Orchestrator::new(
        client,
        Arc::new(registry),
        Arc::new(resume_store),
        progress,
        sessions,
        DEFAULT_MAX_CONCURRENT_TASKS,
    );

    let handle = orchestrator.start(task_id).await.unwrap();
    handle.await.unwrap();

    let record = orchestrator.get(task_id).await.unwrap();
    assert_eq!(record.status, Status::Completed);
    assert_eq!(tokio::fs::read(&output).await.unwrap(), body);
}

#[tokio::test]
async fn transient_503_is_retried_until_success() {
    let harness = harness();
    let body = b"retried payload".to_vec();
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            fail_first_n_requests: 1,
            ..Default::default()
        },
    );

    let output = harness.dir.path().join("retried.bin");
    let mut opts = base_options(server.base_url.clone(), output.clone());
    opts.work_mode = Some(downloader_core::config::WorkMode::Blocking);
    let config = DownloadConfig::from_options(opts).unwrap();

    let task_id = harness.orchestrator.create(config).await.unwrap();
    let record = harness.orchestrator.get(task_id).await.unwrap();
    assert_eq!(record.status, Status::Completed);
    assert_eq!(tokio::fs::read(&output).await.unwrap(), body);
    assert!(server.requests_seen() >= 2);
}
