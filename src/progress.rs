//! Progress monitor (spec §4.10): per-task rolling-window speed and ETA,
//! feeding `ProgressSnapshot`/`Progress` DTOs. The window size mirrors the
//! teacher's `Scheduler`'s `throughput_window = 24` ring buffer, scaled to
//! this system's 500ms aggregation cadence (spec §4.3 step 4) for a
//! similar ~10s trailing window.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::task::{Progress, Segment, TaskId};

const WINDOW_SAMPLES: usize = 20;

#[derive(Clone, Copy)]
struct Sample {
    at: Instant,
    downloaded: u64,
}

#[derive(Default)]
struct TaskWindow {
    samples: VecDeque<Sample>,
}

pub struct ProgressMonitor {
    windows: Mutex<HashMap<TaskId, TaskWindow>>,
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn record(&self, task_id: TaskId, downloaded_size: u64) {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(task_id).or_default();
        window.samples.push_back(Sample {
            at: Instant::now(),
            downloaded: downloaded_size,
        });
        if window.samples.len() > WINDOW_SAMPLES {
            window.samples.pop_front();
        }
    }

    pub async fn speed(&self, task_id: TaskId) -> f64 {
        let windows = self.windows.lock().await;
        let Some(window) = windows.get(&task_id) else {
            return 0.0;
        };
        if window.samples.len() < 2 {
            return 0.0;
        }
        let oldest = window.samples.front().unwrap();
        let newest = window.samples.back().unwrap();
        let elapsed = newest.at.duration_since(oldest.at).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        let bytes = newest.downloaded.saturating_sub(oldest.downloaded) as f64;
        bytes / elapsed
    }

    pub async fn eta_seconds(&self, task_id: TaskId, total_size: u64, downloaded_size: u64) -> Option<f64> {
        let speed = self.speed(task_id).await;
        if speed <= 0.0 || total_size == 0 {
            return None;
        }
        let remaining = total_size.saturating_sub(downloaded_size) as f64;
        Some(remaining / speed)
    }

    pub async fn forget(&self, task_id: TaskId) {
        self.windows.lock().await.remove(&task_id);
    }

    pub async fn snapshot(
        &self,
        task_id: TaskId,
        total_size: u64,
        downloaded_size: u64,
        segments: Vec<Segment>,
    ) -> Progress {
        let speed = self.speed(task_id).await;
        let eta_seconds = self.eta_seconds(task_id, total_size, downloaded_size).await;
        let percentage = if total_size == 0 {
            100.0
        } else {
            (downloaded_size as f64 / total_size as f64) * 100.0
        };
        Progress {
            total_size,
            downloaded_size,
            percentage,
            speed,
            eta_seconds,
            segments,
        }
    }
}
