//! Task registry (spec §4.9): process-wide `task_id -> TaskRecord` map,
//! persisted to `tasks.json`. External readers get clones, never a lock
//! guard, matching the "copy-on-read" requirement in §5.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::task::{Status, TaskId, TaskRecord};

pub const DEFAULT_REGISTRY_PATH: &str = "tasks.json";

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
}

pub struct TaskFilter {
    pub status: Option<Status>,
}

pub struct TaskRegistry {
    path: PathBuf,
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Loads `tasks.json` if present. A missing or corrupt file yields an
    /// empty registry rather than an error (spec §9: "tolerate an empty
    /// registry on cold start").
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let tasks = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<TaskRecord>>(&bytes)
                .unwrap_or_default()
                .into_iter()
                .map(|record| (record.id, record))
                .collect(),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            tasks: RwLock::new(tasks),
        }
    }

    pub async fn register(&self, record: TaskRecord) {
        let mut tasks = self.tasks.write().await;
        tasks.insert(record.id, record);
    }

    pub async fn get(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    /// Applies `f` to the stored record under the write lock and returns a
    /// clone of the updated value, so mutation and observation share one
    /// atomic step (no interleaved partial writes visible to readers).
    pub async fn update<F>(&self, task_id: TaskId, f: F) -> Result<TaskRecord, CoreError>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut tasks = self.tasks.write().await;
        let record = tasks
            .get_mut(&task_id)
            .ok_or(CoreError::State(crate::error::StateErrorKind::NotFound))?;
        f(record);
        Ok(record.clone())
    }

    pub async fn delete(&self, task_id: TaskId) -> Result<(), CoreError> {
        let mut tasks = self.tasks.write().await;
        let record = tasks
            .get(&task_id)
            .ok_or(CoreError::State(crate::error::StateErrorKind::NotFound))?;
        if !record.status.is_terminal() {
            return Err(CoreError::State(
                crate::error::StateErrorKind::InvalidTransition,
            ));
        }
        tasks.remove(&task_id);
        Ok(())
    }

    pub async fn list(&self, filter: TaskFilter, limit: usize, offset: usize) -> (Vec<TaskRecord>, usize) {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<TaskRecord> = tasks
            .values()
            .filter(|record| filter.status.map(|s| s == record.status).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.created_at);
        let total = matching.len();
        let page = matching.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }

    pub async fn stats(&self) -> RegistryStats {
        let tasks = self.tasks.read().await;
        let mut by_status = HashMap::new();
        for record in tasks.values() {
            *by_status.entry(format!("{:?}", record.status)).or_insert(0) += 1;
        }
        RegistryStats {
            total: tasks.len(),
            by_status,
        }
    }

    pub async fn count_downloading(&self) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|r| r.status == Status::Downloading)
            .count()
    }

    pub async fn sweep_expired(&self, max_age_secs: u64) -> usize {
        let now = crate::task::now_epoch_ms() / 1000;
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, record| {
            !(record.status.is_terminal()
                && now.saturating_sub(record.updated_at / 1000) > max_age_secs)
        });
        before - tasks.len()
    }

    /// Flushes the full registry to `tasks.json` atomically. Callers
    /// throttle this themselves (orchestrator: on terminal transitions and
    /// at most every 500ms while downloading) so this never blocks a hot
    /// progress-tick path on disk I/O more than that.
    pub async fn flush(&self) -> Result<(), CoreError> {
        let tasks = self.tasks.read().await;
        let records: Vec<&TaskRecord> = tasks.values().collect();
        let payload = serde_json::to_vec_pretty(&records)
            .map_err(|e| CoreError::Config(format!("failed to serialize registry: {e}")))?;
        drop(tasks);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| crate::error::classify_io_error(&e))?;
            }
        }
        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, &payload)
            .await
            .map_err(|e| crate::error::classify_io_error(&e))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| crate::error::classify_io_error(&e))?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "tasks.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}
