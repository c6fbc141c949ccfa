//! Download orchestrator (spec §4.3): per-task state machine driver.
//! `Orchestrator` holds only shared collaborators (registry, resume store,
//! progress monitor, session manager, HTTP client); the actual per-task
//! download loop is a free function (`run_task`) spawned with explicit
//! `Arc` clones, the same shape the teacher's `manager.rs` uses for its
//! spawned segment tasks rather than methods closing over `&self`.

pub mod merge;
pub mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::{DownloadConfig, WorkMode};
use crate::error::{CoreError, StateErrorKind};
use crate::planner::{self, PlanInput, SegmentationBounds};
use crate::progress::ProgressMonitor;
use crate::registry::{TaskFilter, TaskRegistry};
use crate::resume_store::{ResumeRecord, ResumeStore};
use crate::session::SessionManager;
use crate::task::{Segment, Status, TaskError, TaskId, TaskRecord};
use worker::WorkerEvent;

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 5;
const PERSIST_THROTTLE: Duration = Duration::from_millis(500);
const QUIESCE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const QUIESCE_TIMEOUT: Duration = Duration::from_secs(30);

const INTENT_RUNNING: u8 = 0;
const INTENT_PAUSING: u8 = 1;
const INTENT_CANCELLING: u8 = 2;

struct TaskControl {
    token: CancellationToken,
    intent: AtomicU8,
}

pub struct Orchestrator {
    client: Client,
    registry: Arc<TaskRegistry>,
    resume_store: Arc<ResumeStore>,
    progress: Arc<ProgressMonitor>,
    sessions: Arc<SessionManager>,
    max_concurrent_tasks: usize,
    controls: RwLock<HashMap<TaskId, Arc<TaskControl>>>,
}

impl Orchestrator {
    pub fn new(
        client: Client,
        registry: Arc<TaskRegistry>,
        resume_store: Arc<ResumeStore>,
        progress: Arc<ProgressMonitor>,
        sessions: Arc<SessionManager>,
        max_concurrent_tasks: usize,
    ) -> Self {
        Self {
            client,
            registry,
            resume_store,
            progress,
            sessions,
            max_concurrent_tasks,
            controls: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create(&self, config: DownloadConfig) -> Result<TaskId, CoreError> {
        let task_id = TaskId::new();
        self.registry.register(TaskRecord::new(task_id, config.clone())).await;

        if matches!(config.work_mode, WorkMode::Blocking | WorkMode::NonBlocking) {
            let handle = self.start(task_id).await?;
            if config.work_mode == WorkMode::Blocking {
                let _ = handle.await;
            }
        }
        Ok(task_id)
    }

    /// Preconditions and bookkeeping for `start`/`resume` (spec §4.3); the
    /// actual transfer runs in a spawned task so `NonBlocking` callers
    /// return immediately while `Blocking` callers can await the handle.
    pub async fn start(&self, task_id: TaskId) -> Result<tokio::task::JoinHandle<()>, CoreError> {
        let record = self
            .registry
            .get(task_id)
            .await
            .ok_or(CoreError::State(StateErrorKind::NotFound))?;

        if !matches!(record.status, Status::Pending | Status::Paused | Status::Failed) {
            return Err(CoreError::State(StateErrorKind::InvalidTransition));
        }
        if self.registry.count_downloading().await >= self.max_concurrent_tasks {
            return Err(CoreError::State(StateErrorKind::QueueFull));
        }

        self.registry
            .update(task_id, |r| {
                let _ = r.transition(Status::Downloading);
            })
            .await?;

        let control = Arc::new(TaskControl {
            token: CancellationToken::new(),
            intent: AtomicU8::new(INTENT_RUNNING),
        });
        self.controls.write().await.insert(task_id, control.clone());

        let ctx = TaskContext {
            task_id,
            config: record.config,
            client: self.client.clone(),
            registry: self.registry.clone(),
            resume_store: self.resume_store.clone(),
            progress: self.progress.clone(),
            sessions: self.sessions.clone(),
            control,
        };

        Ok(tokio::spawn(run_task(ctx)))
    }

    pub async fn resume(&self, task_id: TaskId) -> Result<tokio::task::JoinHandle<()>, CoreError> {
        self.start(task_id).await
    }

    /// Idempotent: pausing an already-`Paused` task is a no-op success
    /// (spec §8). Otherwise signals the running task and waits for it to
    /// quiesce into `Paused` before returning, so a caller reading the
    /// record right after this call sees the post-pause status.
    pub async fn pause(&self, task_id: TaskId) -> Result<(), CoreError> {
        let record = self
            .registry
            .get(task_id)
            .await
            .ok_or(CoreError::State(StateErrorKind::NotFound))?;
        if record.status == Status::Paused {
            return Ok(());
        }
        if record.status != Status::Downloading {
            return Err(CoreError::State(StateErrorKind::InvalidTransition));
        }
        {
            let controls = self.controls.read().await;
            let control = controls
                .get(&task_id)
                .ok_or(CoreError::State(StateErrorKind::NotFound))?;
            control.intent.store(INTENT_PAUSING, Ordering::SeqCst);
            control.token.cancel();
        }
        self.await_quiesced(task_id, Status::Paused).await;
        Ok(())
    }

    /// Idempotent: cancelling an already-`Cancelled` task is a no-op success
    /// (spec §8). A `Downloading` task is signalled and awaited until it
    /// quiesces into `Cancelled`; a `Pending`/`Paused`/`Failed` task is
    /// cancelled synchronously since no worker is running for it.
    pub async fn cancel(&self, task_id: TaskId) -> Result<(), CoreError> {
        let record = self
            .registry
            .get(task_id)
            .await
            .ok_or(CoreError::State(StateErrorKind::NotFound))?;
        if record.status == Status::Cancelled {
            return Ok(());
        }
        if record.status.is_terminal() {
            return Err(CoreError::State(StateErrorKind::InvalidTransition));
        }

        if record.status == Status::Downloading {
            {
                let controls = self.controls.read().await;
                if let Some(control) = controls.get(&task_id) {
                    control.intent.store(INTENT_CANCELLING, Ordering::SeqCst);
                    control.token.cancel();
                }
            }
            self.await_quiesced(task_id, Status::Cancelled).await;
            return Ok(());
        }

        cleanup_part_files(&record.progress.segments).await;
        self.resume_store.cleanup(task_id).await.ok();
        self.registry
            .update(task_id, |r| {
                let _ = r.transition(Status::Cancelled);
            })
            .await?;
        Ok(())
    }

    /// Polls the registry until `task_id` reaches `target` or any terminal
    /// status, or `QUIESCE_TIMEOUT` elapses. Used after signalling a pause
    /// or cancel so the caller observes the post-signal status rather than
    /// the stale `Downloading` one `run_task` has not yet overwritten.
    async fn await_quiesced(&self, task_id: TaskId, target: Status) {
        let deadline = Instant::now() + QUIESCE_TIMEOUT;
        loop {
            match self.registry.get(task_id).await {
                Some(record) if record.status == target || record.status.is_terminal() => return,
                None => return,
                _ => {}
            }
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(QUIESCE_POLL_INTERVAL).await;
        }
    }

    pub async fn get(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.registry.get(task_id).await
    }

    pub async fn list(&self, filter: TaskFilter, limit: usize, offset: usize) -> (Vec<TaskRecord>, usize) {
        self.registry.list(filter, limit, offset).await
    }

    pub async fn stats(&self) -> crate::registry::RegistryStats {
        self.registry.stats().await
    }
}

struct TaskContext {
    task_id: TaskId,
    config: DownloadConfig,
    client: Client,
    registry: Arc<TaskRegistry>,
    resume_store: Arc<ResumeStore>,
    progress: Arc<ProgressMonitor>,
    sessions: Arc<SessionManager>,
    control: Arc<TaskControl>,
}

async fn cleanup_part_files(segments: &[Segment]) {
    for segment in segments {
        let _ = tokio::fs::remove_file(&segment.part_path).await;
    }
}

/// The full per-task algorithm from spec §4.3's `start` steps 1-6: probe,
/// plan-or-resume, spawn workers, aggregate, merge, finalize.
async fn run_task(ctx: TaskContext) {
    let result = run_task_inner(&ctx).await;

    if ctx.control.token.is_cancelled() {
        let intent = ctx.control.intent.load(Ordering::SeqCst);
        if intent == INTENT_PAUSING {
            let _ = ctx
                .registry
                .update(ctx.task_id, |r| {
                    let _ = r.transition(Status::Paused);
                })
                .await;
            return;
        }
        if intent == INTENT_CANCELLING {
            if let Some(record) = ctx.registry.get(ctx.task_id).await {
                cleanup_part_files(&record.progress.segments).await;
            }
            ctx.resume_store.cleanup(ctx.task_id).await.ok();
            let _ = ctx
                .registry
                .update(ctx.task_id, |r| {
                    let _ = r.transition(Status::Cancelled);
                })
                .await;
            return;
        }
    }

    match result {
        Ok(()) => {
            ctx.progress.forget(ctx.task_id).await;
        }
        Err(err) => {
            let task_error = TaskError::from_core(&err);
            let _ = ctx
                .registry
                .update(ctx.task_id, |r| {
                    r.error = Some(task_error.clone());
                    let _ = r.transition(Status::Failed);
                })
                .await;
            ctx.progress.forget(ctx.task_id).await;
        }
    }
    let _ = ctx.registry.flush().await;
}

async fn run_task_inner(ctx: &TaskContext) -> Result<(), CoreError> {
    let config = &ctx.config;

    let probe = ctx
        .sessions
        .pre_request(
            config.session_id.as_deref(),
            &config.url,
            "HEAD",
            None,
            config.timeout_ms,
            true,
            crate::session::DEFAULT_MAX_REDIRECTS,
            &config.headers.0,
        )
        .await?;

    let total_size: u64 = probe
        .headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let accept_ranges = probe
        .headers
        .get("accept-ranges")
        .map(|v| v.to_ascii_lowercase().contains("bytes"))
        .unwrap_or(false);
    let etag = probe.headers.get("etag").cloned();
    let last_modified = probe.headers.get("last-modified").cloned();
    let content_type = probe.headers.get("content-type").cloned();

    ctx.registry
        .update(ctx.task_id, |r| {
            r.server_metadata.content_length = Some(total_size);
            r.server_metadata.accept_ranges = accept_ranges;
            r.server_metadata.etag = etag.clone();
            r.server_metadata.last_modified = last_modified.clone();
            r.server_metadata.content_type = content_type.clone();
        })
        .await?;

    let part_prefix = config
        .filename
        .clone()
        .unwrap_or_else(|| planner_default_name(&config.url));
    let part_dir = config
        .output_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();

    let mut segments = if config.enable_resume {
        match ctx.resume_store.load(ctx.task_id).await? {
            Some(record) if record.is_valid_for(total_size, etag.as_deref(), last_modified.as_deref()) => {
                record.segments
            }
            _ => plan_fresh(config, total_size, accept_ranges, &part_dir, &part_prefix)?,
        }
    } else {
        plan_fresh(config, total_size, accept_ranges, &part_dir, &part_prefix)?
    };

    let pending: Vec<Segment> = segments
        .iter()
        .filter(|s| !matches!(s.status, crate::task::SegmentStatus::Completed))
        .cloned()
        .collect();

    if !pending.is_empty() {
        run_segments(ctx, config, &probe.headers, pending, &mut segments).await?;
    }

    if ctx.control.token.is_cancelled() {
        return Ok(());
    }

    let output_path = config.output_path.clone();
    merge::merge_segments(&segments, &output_path).await?;

    if config.integrity.verify_final {
        let expected = config.integrity.expected_checksum.as_deref();
        if let Some(expected) = expected {
            crate::hash::verify_file_or_err(&output_path, config.integrity.algorithm, expected).await?;
        } else {
            let _ = crate::hash::verify_file(&output_path, config.integrity.algorithm, None).await?;
        }
    }

    ctx.registry
        .update(ctx.task_id, |r| {
            r.progress = crate::task::Progress {
                total_size,
                downloaded_size: total_size,
                percentage: 100.0,
                speed: 0.0,
                eta_seconds: None,
                segments: segments.clone(),
            };
            let _ = r.transition(Status::Completed);
        })
        .await?;

    ctx.resume_store.cleanup(ctx.task_id).await.ok();
    if config.work_mode == WorkMode::Temporary {
        let _ = ctx.registry.delete(ctx.task_id).await;
    }

    Ok(())
}

fn planner_default_name(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

fn plan_fresh(
    config: &DownloadConfig,
    total_size: u64,
    accept_ranges: bool,
    part_dir: &std::path::Path,
    part_prefix: &str,
) -> Result<Vec<Segment>, CoreError> {
    planner::plan(PlanInput {
        total_size,
        max_concurrency: config.max_concurrency,
        accept_ranges,
        network_quality: None,
        bounds: SegmentationBounds::default(),
        part_dir,
        part_prefix,
    })
}

/// Spawns one worker per pending segment, bounded by `config.max_concurrency`
/// via a semaphore, and aggregates their events until the channel closes
/// (every worker has returned).
async fn run_segments(
    ctx: &TaskContext,
    config: &DownloadConfig,
    request_headers: &HashMap<String, String>,
    pending: Vec<Segment>,
    all_segments: &mut [Segment],
) -> Result<(), CoreError> {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<WorkerEvent>(256);
    let backoff = crate::retry::BackoffPolicy::from_retry_count(config.retry_count);
    let headers: Vec<(String, String)> = request_headers
        .iter()
        .filter(|(k, _)| k.as_str() != "range")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let total_size: u64 = all_segments.iter().map(|s| s.len()).sum();

    let mut handles = Vec::with_capacity(pending.len());
    for segment in pending {
        let semaphore = semaphore.clone();
        let client = ctx.client.clone();
        let url = config.url.clone();
        let headers = headers.clone();
        let timeout_ms = config.timeout_ms;
        let algorithm = config.integrity.algorithm;
        let cancel = ctx.control.token.clone();
        let tx = tx.clone();
        let backoff = backoff;
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("segment semaphore is never closed");
            worker::run_segment(
                client, url, headers, segment, total_size, timeout_ms, backoff, algorithm, cancel, tx,
            )
            .await;
        }));
    }
    drop(tx);

    let mut last_persist = Instant::now();
    let mut failure: Option<CoreError> = None;

    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::ProgressTick { segment_id, downloaded, .. } => {
                if let Some(existing) = all_segments.iter_mut().find(|s| s.id == segment_id) {
                    existing.downloaded = downloaded;
                }
                let live_total: u64 = all_segments.iter().map(|s| s.downloaded).sum();
                ctx.progress.record(ctx.task_id, live_total).await;
                if last_persist.elapsed() >= PERSIST_THROTTLE {
                    persist_progress(ctx, config, all_segments, total_size).await;
                    last_persist = Instant::now();
                }
            }
            WorkerEvent::SegmentCompleted { segment } => {
                if let Some(existing) = all_segments.iter_mut().find(|s| s.id == segment.id) {
                    *existing = segment;
                }
            }
            WorkerEvent::SegmentFailed { reason, .. } => {
                if failure.is_none() {
                    failure = Some(reason);
                }
                ctx.control.token.cancel();
            }
        }
    }

    persist_progress(ctx, config, all_segments, total_size).await;

    for handle in handles {
        let _ = handle.await;
    }

    if let Some(reason) = failure {
        return Err(reason);
    }
    Ok(())
}

async fn persist_progress(ctx: &TaskContext, config: &DownloadConfig, segments: &[Segment], total_size: u64) {
    let downloaded: u64 = segments.iter().map(|s| s.downloaded).sum();
    let snapshot = ctx
        .progress
        .snapshot(ctx.task_id, total_size, downloaded, segments.to_vec())
        .await;
    let _ = ctx
        .registry
        .update(ctx.task_id, |r| {
            r.progress = snapshot.clone();
        })
        .await;

    if config.enable_resume {
        let record = ctx.registry.get(ctx.task_id).await;
        let (etag, last_modified) = record
            .map(|r| (r.server_metadata.etag, r.server_metadata.last_modified))
            .unwrap_or((None, None));
        let resume_record = ResumeRecord::new(
            ctx.task_id,
            config.url.clone(),
            config.output_path.clone(),
            total_size,
            segments.to_vec(),
            etag,
            last_modified,
        );
        let _ = ctx.resume_store.save(&resume_record).await;
    }
}
