//! Tool Facade (spec §6): the thin surface an external tool-protocol
//! server calls. Validates arguments into the same `DownloadConfig`
//! everything else uses, dispatches to the orchestrator/session
//! layer/hash engine, and wraps every result in the
//! `{success, data?, error?, timestamp}` envelope. Unknown JSON keys on
//! any argument struct are rejected as `Config.Invalid` via
//! `#[serde(deny_unknown_fields)]`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{DownloadConfig, DownloadOptions, HashAlgorithm, IntegrityConfig, WorkMode};
use crate::error::{CoreError, StateErrorKind};
use crate::orchestrator::Orchestrator;
use crate::registry::TaskFilter;
use crate::session::SessionManager;
use crate::task::{now_epoch_ms, Status, TaskId};

#[derive(Debug, Serialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl ToolError {
    fn from_core(err: &CoreError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    pub timestamp: u64,
}

impl ToolResponse {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: now_epoch_ms(),
        }
    }

    fn err(err: CoreError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ToolError::from_core(&err)),
            timestamp: now_epoch_ms(),
        }
    }
}

fn parse_task_id(raw: &str) -> Result<TaskId, CoreError> {
    raw.parse()
        .map_err(|_| CoreError::Config(format!("invalid task_id: {raw}")))
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreRequestArgs {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub session_id: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadFileArgs {
    pub url: String,
    pub output_path: PathBuf,
    pub filename: Option<String>,
    pub max_concurrency: Option<usize>,
    pub chunk_size: Option<u64>,
    pub timeout: Option<u64>,
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub work_mode: Option<WorkMode>,
    pub enable_resume: Option<bool>,
    pub session_id: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub integrity: Option<IntegrityConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListDownloadsArgs {
    pub status: Option<Status>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyIntegrityArgs {
    pub file_path: PathBuf,
    #[serde(default)]
    pub algorithm: HashAlgorithm,
    pub expected_checksum: Option<String>,
    #[serde(default)]
    pub generate_report: bool,
}

pub struct ToolFacade {
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<SessionManager>,
}

impl ToolFacade {
    pub fn new(orchestrator: Arc<Orchestrator>, sessions: Arc<SessionManager>) -> Self {
        Self { orchestrator, sessions }
    }

    pub async fn pre_request(&self, args: PreRequestArgs) -> ToolResponse {
        let session_id = match args.session_id {
            Some(id) => id,
            None => self.sessions.create(None, None).await,
        };

        let body = args.body.map(String::into_bytes);
        match self
            .sessions
            .pre_request(
                Some(&session_id),
                &args.url,
                &args.method,
                body,
                args.timeout,
                args.follow_redirects,
                crate::session::DEFAULT_MAX_REDIRECTS,
                &args.headers,
            )
            .await
        {
            Ok(outcome) => ToolResponse::ok(json!({
                "session_id": session_id,
                "status": outcome.status,
                "headers": outcome.headers,
                "cookies": outcome.cookies,
                "redirect_chain": outcome.redirect_chain,
                "final_url": outcome.final_url,
                "elapsed_ms": outcome.elapsed_ms,
            })),
            Err(err) => ToolResponse::err(err),
        }
    }

    pub async fn download_file(&self, args: DownloadFileArgs) -> ToolResponse {
        let config = match DownloadConfig::from_options(DownloadOptions {
            url: args.url,
            output_path: args.output_path,
            filename: args.filename,
            max_concurrency: args.max_concurrency,
            chunk_size: args.chunk_size,
            timeout_ms: args.timeout,
            retry_count: args.retry_count,
            work_mode: args.work_mode,
            enable_resume: args.enable_resume,
            headers: args.headers,
            session_id: args.session_id,
            integrity: args.integrity,
        }) {
            Ok(config) => config,
            Err(err) => return ToolResponse::err(err),
        };

        let blocking = config.work_mode == WorkMode::Blocking;
        match self.orchestrator.create(config).await {
            Ok(task_id) => {
                if blocking {
                    match self.orchestrator.get(task_id).await {
                        Some(record) => ToolResponse::ok(json!({
                            "task_id": task_id.to_string(),
                            "status": record.status,
                            "message": "download finished",
                        })),
                        None => ToolResponse::ok(json!({
                            "task_id": task_id.to_string(),
                            "status": "unknown",
                            "message": "task vanished after blocking run",
                        })),
                    }
                } else {
                    ToolResponse::ok(json!({
                        "task_id": task_id.to_string(),
                        "status": "pending",
                        "message": "download scheduled",
                    }))
                }
            }
            Err(err) => ToolResponse::err(err),
        }
    }

    pub async fn get_download_status(&self, task_id: &str) -> ToolResponse {
        let task_id = match parse_task_id(task_id) {
            Ok(id) => id,
            Err(err) => return ToolResponse::err(err),
        };
        match self.orchestrator.get(task_id).await {
            Some(record) => ToolResponse::ok(json!({
                "task_id": record.id.to_string(),
                "status": record.status,
                "progress": {
                    "percentage": record.progress.percentage,
                    "downloaded": record.progress.downloaded_size,
                    "total": record.progress.total_size,
                    "speed": record.progress.speed,
                    "eta": record.progress.eta_seconds,
                },
                "metadata": {
                    "filename": record.config.filename,
                    "url": record.config.url,
                    "created_at": record.created_at,
                    "started_at": record.started_at,
                    "completed_at": record.completed_at,
                },
                "error": record.error,
            })),
            None => ToolResponse::err(CoreError::State(StateErrorKind::NotFound)),
        }
    }

    pub async fn pause_download(&self, task_id: &str) -> ToolResponse {
        let id = match parse_task_id(task_id) {
            Ok(id) => id,
            Err(err) => return ToolResponse::err(err),
        };
        match self.orchestrator.pause(id).await {
            Ok(()) => self.status_envelope(id).await,
            Err(err) => ToolResponse::err(err),
        }
    }

    pub async fn resume_download(&self, task_id: &str) -> ToolResponse {
        let id = match parse_task_id(task_id) {
            Ok(id) => id,
            Err(err) => return ToolResponse::err(err),
        };
        match self.orchestrator.resume(id).await {
            Ok(_handle) => self.status_envelope(id).await,
            Err(err) => ToolResponse::err(err),
        }
    }

    pub async fn cancel_download(&self, task_id: &str) -> ToolResponse {
        let id = match parse_task_id(task_id) {
            Ok(id) => id,
            Err(err) => return ToolResponse::err(err),
        };
        match self.orchestrator.cancel(id).await {
            Ok(()) => self.status_envelope(id).await,
            Err(err) => ToolResponse::err(err),
        }
    }

    async fn status_envelope(&self, task_id: TaskId) -> ToolResponse {
        match self.orchestrator.get(task_id).await {
            Some(record) => ToolResponse::ok(json!({
                "task_id": task_id.to_string(),
                "success": true,
                "new_status": record.status,
            })),
            None => ToolResponse::err(CoreError::State(StateErrorKind::NotFound)),
        }
    }

    pub async fn list_downloads(&self, args: ListDownloadsArgs) -> ToolResponse {
        let (tasks, total) = self
            .orchestrator
            .list(TaskFilter { status: args.status }, args.limit, args.offset)
            .await;
        let has_more = args.offset + tasks.len() < total;
        ToolResponse::ok(json!({
            "tasks": tasks,
            "total": total,
            "has_more": has_more,
        }))
    }

    pub async fn verify_integrity(&self, args: VerifyIntegrityArgs) -> ToolResponse {
        let expected = args.expected_checksum.as_deref();
        match crate::hash::verify_file(&args.file_path, args.algorithm, expected).await {
            Ok(result) => ToolResponse::ok(json!({
                "algorithm": args.algorithm.to_string(),
                "checksum": result.actual,
                "verified": result.ok,
                "file_size": result.bytes,
                "elapsed_ms": result.elapsed.as_millis() as u64,
            })),
            Err(err) => ToolResponse::err(err),
        }
    }
}
