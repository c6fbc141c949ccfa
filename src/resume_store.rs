//! Resume store (spec §4.7): one `{task_id}.resume.json` file per task
//! under a durable directory, written atomically (write-temp + rename), the
//! same durability trick the teacher's `PartMapHandle` used for its
//! bincode part-map but applied to a human-readable per-task record
//! instead of a single append-only binary log (see SPEC_FULL.md §2.1 for
//! why `serde_json` replaces `bincode` here).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::CoreError;
use crate::task::{Segment, TaskId};

pub const DEFAULT_RESUME_DIR: &str = ".download-resume";
pub const DEFAULT_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;
const RESUME_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub version: u32,
    pub task_id: TaskId,
    pub url: String,
    pub output_path: PathBuf,
    pub total_size: u64,
    pub segments: Vec<Segment>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ResumeRecord {
    pub fn new(
        task_id: TaskId,
        url: String,
        output_path: PathBuf,
        total_size: u64,
        segments: Vec<Segment>,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Self {
        let now = now_secs();
        Self {
            version: RESUME_VERSION,
            task_id,
            url,
            output_path,
            total_size,
            segments,
            etag,
            last_modified,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validates applicability against a fresh HEAD (spec §4.7): the total
    /// size must agree, and whichever of etag/last-modified both sides
    /// have must be unchanged. A record with no comparable freshness
    /// signal at all is treated as stale (we would otherwise resume blind).
    pub fn is_valid_for(&self, fresh_total_size: u64, fresh_etag: Option<&str>, fresh_last_modified: Option<&str>) -> bool {
        if self.total_size != fresh_total_size {
            return false;
        }
        match (self.etag.as_deref(), fresh_etag) {
            (Some(old), Some(new)) => {
                if old != new {
                    return false;
                }
            }
            _ => match (self.last_modified.as_deref(), fresh_last_modified) {
                (Some(old), Some(new)) => {
                    if old != new {
                        return false;
                    }
                }
                _ => return false,
            },
        }
        true
    }
}

pub struct ResumeStore {
    dir: PathBuf,
}

impl ResumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, task_id: TaskId) -> PathBuf {
        self.dir.join(format!("{task_id}.resume.json"))
    }

    async fn ensure_dir(&self) -> Result<(), CoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| crate::error::classify_io_error(&e))
    }

    pub async fn save(&self, record: &ResumeRecord) -> Result<(), CoreError> {
        self.ensure_dir().await?;
        let path = self.path_for(record.task_id);
        let tmp_path = path.with_extension("resume.json.tmp");
        let payload = serde_json::to_vec_pretty(record)
            .map_err(|e| CoreError::Config(format!("failed to serialize resume record: {e}")))?;
        fs::write(&tmp_path, &payload)
            .await
            .map_err(|e| crate::error::classify_io_error(&e))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| crate::error::classify_io_error(&e))?;
        Ok(())
    }

    pub async fn load(&self, task_id: TaskId) -> Result<Option<ResumeRecord>, CoreError> {
        let path = self.path_for(task_id);
        match fs::read(&path).await {
            Ok(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::Config(format!("corrupt resume record: {e}")))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(crate::error::classify_io_error(&e)),
        }
    }

    pub async fn cleanup(&self, task_id: TaskId) -> Result<(), CoreError> {
        let path = self.path_for(task_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(crate::error::classify_io_error(&e)),
        }
    }

    pub async fn list(&self) -> Result<Vec<ResumeRecord>, CoreError> {
        self.ensure_dir().await?;
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| crate::error::classify_io_error(&e))?;
        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| crate::error::classify_io_error(&e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(bytes) = fs::read(&path).await {
                if let Ok(record) = serde_json::from_slice::<ResumeRecord>(&bytes) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    pub async fn cleanup_expired(&self, max_age_secs: u64) -> Result<usize, CoreError> {
        let now = now_secs();
        let records = self.list().await?;
        let mut removed = 0;
        for record in records {
            if now.saturating_sub(record.updated_at) > max_age_secs {
                self.cleanup(record.task_id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn resume_dir(&self) -> &Path {
        &self.dir
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SegmentStatus;
    use tempfile::tempdir;

    fn sample_segments() -> Vec<Segment> {
        vec![Segment {
            id: "segment_0".to_string(),
            start: 0,
            end: 99,
            downloaded: 50,
            status: SegmentStatus::Downloading,
            part_path: PathBuf::from("/tmp/x.part0"),
            checksum: None,
            retry_count: 0,
        }]
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = ResumeStore::new(dir.path());
        let task_id = TaskId::new();
        let record = ResumeRecord::new(
            task_id,
            "https://example.com/f".into(),
            PathBuf::from("/tmp/f"),
            100,
            sample_segments(),
            Some("etag-1".into()),
            None,
        );
        store.save(&record).await.unwrap();
        let loaded = store.load(task_id).await.unwrap().unwrap();
        assert_eq!(loaded.total_size, 100);
        assert_eq!(loaded.segments.len(), 1);
    }

    #[tokio::test]
    async fn missing_record_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = ResumeStore::new(dir.path());
        assert!(store.load(TaskId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_file() {
        let dir = tempdir().unwrap();
        let store = ResumeStore::new(dir.path());
        let task_id = TaskId::new();
        let record = ResumeRecord::new(
            task_id,
            "https://example.com/f".into(),
            PathBuf::from("/tmp/f"),
            100,
            sample_segments(),
            None,
            None,
        );
        store.save(&record).await.unwrap();
        store.cleanup(task_id).await.unwrap();
        assert!(store.load(task_id).await.unwrap().is_none());
    }

    #[test]
    fn etag_mismatch_invalidates_record() {
        let record = ResumeRecord::new(
            TaskId::new(),
            "u".into(),
            PathBuf::from("/tmp/f"),
            100,
            sample_segments(),
            Some("etag-1".into()),
            None,
        );
        assert!(!record.is_valid_for(100, Some("etag-2"), None));
        assert!(record.is_valid_for(100, Some("etag-1"), None));
    }

    #[test]
    fn size_mismatch_invalidates_record() {
        let record = ResumeRecord::new(
            TaskId::new(),
            "u".into(),
            PathBuf::from("/tmp/f"),
            100,
            sample_segments(),
            Some("etag-1".into()),
            None,
        );
        assert!(!record.is_valid_for(200, Some("etag-1"), None));
    }

    #[test]
    fn falls_back_to_last_modified_when_no_etag() {
        let record = ResumeRecord::new(
            TaskId::new(),
            "u".into(),
            PathBuf::from("/tmp/f"),
            100,
            sample_segments(),
            None,
            Some("Wed, 21 Oct 2015 07:28:00 GMT".into()),
        );
        assert!(record.is_valid_for(100, None, Some("Wed, 21 Oct 2015 07:28:00 GMT")));
        assert!(!record.is_valid_for(100, None, Some("Thu, 22 Oct 2015 07:28:00 GMT")));
    }
}
