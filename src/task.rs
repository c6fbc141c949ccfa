//! Task identity, the `Status` state machine, and the `Segment`/`Progress`/
//! `TaskRecord` DTOs shared by the orchestrator, registry, and tool facade.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DownloadConfig;
use crate::error::{CoreError, StateErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }

    /// Validates a transition per the state machine in spec §4.6, including
    /// the documented exception that `Failed -> Downloading` is allowed when
    /// the caller re-invokes `start` as an explicit retry.
    pub fn validate_transition(self, to: Status) -> Result<(), CoreError> {
        let ok = matches!(
            (self, to),
            (Status::Pending, Status::Downloading)
                | (Status::Pending, Status::Cancelled)
                | (Status::Downloading, Status::Paused)
                | (Status::Downloading, Status::Completed)
                | (Status::Downloading, Status::Failed)
                | (Status::Downloading, Status::Cancelled)
                | (Status::Paused, Status::Downloading)
                | (Status::Paused, Status::Cancelled)
                | (Status::Failed, Status::Downloading)
        );
        if ok {
            Ok(())
        } else {
            Err(CoreError::State(StateErrorKind::InvalidTransition))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub start: u64,
    pub end: u64,
    pub downloaded: u64,
    pub status: SegmentStatus,
    pub part_path: PathBuf,
    pub checksum: Option<String>,
    pub retry_count: u32,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.downloaded)
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub total_size: u64,
    pub downloaded_size: u64,
    pub percentage: f64,
    pub speed: f64,
    pub eta_seconds: Option<f64>,
    pub segments: Vec<Segment>,
}

impl Progress {
    pub fn empty(total_size: u64) -> Self {
        Self {
            total_size,
            downloaded_size: 0,
            percentage: if total_size == 0 { 100.0 } else { 0.0 },
            speed: 0.0,
            eta_seconds: None,
            segments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub accept_ranges: bool,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub code: &'static str,
    pub message: String,
}

impl TaskError {
    pub fn from_core(err: &CoreError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub config: DownloadConfig,
    pub status: Status,
    pub progress: Progress,
    pub created_at: u64,
    pub updated_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub error: Option<TaskError>,
    pub server_metadata: ServerMetadata,
}

impl TaskRecord {
    pub fn new(id: TaskId, config: DownloadConfig) -> Self {
        let now = now_epoch_ms();
        Self {
            id,
            progress: Progress::empty(0),
            config,
            status: Status::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            server_metadata: ServerMetadata::default(),
        }
    }

    pub fn transition(&mut self, to: Status) -> Result<(), CoreError> {
        self.status.validate_transition(to)?;
        self.status = to;
        self.touch();
        if to == Status::Downloading && self.started_at.is_none() {
            self.started_at = Some(self.updated_at);
        }
        if to.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = now_epoch_ms();
    }
}

/// Milliseconds since the Unix epoch. The only place wall-clock time enters
/// the core; callers needing monotonic deltas use `std::time::Instant`
/// instead (see `progress.rs`).
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
