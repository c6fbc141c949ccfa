//! Segment worker (spec §4.2): one ranged GET per attempt, streamed into a
//! per-segment hash and part file. Generalizes the teacher's
//! `download_segment_with_retry`/`download_segment_once` pair — the
//! retry loop here is driven by `retry::BackoffPolicy` and
//! `CoreError::is_retryable` instead of the teacher's fixed
//! `sleep(1 << attempt.min(4))`/unconditional-retry shape, and each
//! segment owns its own part file rather than writing at an offset into
//! one shared preallocated file.

use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::HashAlgorithm;
use crate::error::{self, CoreError};
use crate::hash::StreamingHasher;
use crate::retry::BackoffPolicy;
use crate::task::{Segment, SegmentStatus};

const PROGRESS_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum WorkerEvent {
    ProgressTick {
        segment_id: String,
        downloaded: u64,
        speed_sample: f64,
    },
    SegmentCompleted {
        segment: Segment,
    },
    SegmentFailed {
        segment_id: String,
        reason: CoreError,
    },
}

#[allow(clippy::too_many_arguments)]
pub async fn run_segment(
    client: Client,
    url: String,
    headers: Vec<(String, String)>,
    mut segment: Segment,
    total_size: u64,
    timeout_ms: u64,
    backoff: BackoffPolicy,
    algorithm: HashAlgorithm,
    cancel: CancellationToken,
    events: mpsc::Sender<WorkerEvent>,
) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match fetch_once(
            &client,
            &url,
            &headers,
            &mut segment,
            total_size,
            timeout_ms,
            algorithm,
            &cancel,
            &events,
        )
        .await
        {
            Ok(()) => {
                segment.status = SegmentStatus::Completed;
                let _ = events
                    .send(WorkerEvent::SegmentCompleted { segment })
                    .await;
                return;
            }
            Err(CoreError::Cancelled) => {
                return;
            }
            Err(err) => {
                segment.retry_count += 1;
                let retryable = err.is_retryable();
                let delay = if retryable { backoff.delay_for(attempt) } else { None };
                match delay {
                    Some(delay) => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => return,
                        }
                    }
                    None => {
                        segment.status = SegmentStatus::Failed;
                        let _ = events
                            .send(WorkerEvent::SegmentFailed {
                                segment_id: segment.id.clone(),
                                reason: err,
                            })
                            .await;
                        return;
                    }
                }
            }
        }
    }
}

/// One fetch attempt. On success, `segment.downloaded`/`segment.checksum`
/// reflect the bytes written so far; on any error the segment keeps
/// whatever bytes a prior attempt already persisted, so the next attempt
/// resumes from `downloaded` rather than restarting. A `200` response is
/// only accepted when this segment spans the entire file (`start == 0` and
/// `end == total_size - 1`); any other segment receiving `200` instead of
/// `206` for a non-zero `Range` fails as `RangeNotSatisfiable` rather than
/// silently swallowing the whole body. The hash is rebuilt by rehashing the
/// bytes a prior attempt already wrote before streaming the remainder, so
/// `segment.checksum` always covers the full segment, not just the last
/// attempt's tail (spec §4.2: "the hash state is preserved").
async fn fetch_once(
    client: &Client,
    url: &str,
    headers: &[(String, String)],
    segment: &mut Segment,
    total_size: u64,
    timeout_ms: u64,
    algorithm: HashAlgorithm,
    cancel: &CancellationToken,
    events: &mpsc::Sender<WorkerEvent>,
) -> Result<(), CoreError> {
    let range_start = segment.start + segment.downloaded;
    let range_end = segment.end;
    let is_full_request = segment_spans_whole_file(segment, total_size);

    let mut request = client
        .get(url)
        .timeout(Duration::from_millis(timeout_ms))
        .header(reqwest::header::RANGE, format!("bytes={range_start}-{range_end}"));
    for (key, value) in headers {
        request = request.header(key.as_str(), value.as_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| error::classify_reqwest_error(&e))?;

    let status = response.status();
    if let Some(err) = error::classify_http_status(status.as_u16(), is_full_request) {
        return Err(err);
    }
    if status != StatusCode::PARTIAL_CONTENT && !(is_full_request && status.is_success()) {
        return Err(CoreError::RangeNotSatisfiable);
    }

    let mut hasher = StreamingHasher::new(algorithm);
    if segment.downloaded > 0 {
        rehash_existing(&segment.part_path, segment.downloaded, &mut hasher).await?;
    }
    let mut file = open_part_file(&segment.part_path).await?;
    let mut last_tick = Instant::now();
    let mut stream = response.bytes_stream();

    loop {
        let next = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => {
                let _ = file.flush().await;
                return Err(CoreError::Cancelled);
            }
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| error::classify_reqwest_error(&e))?;

        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| error::classify_io_error(&e))?;
        segment.downloaded += chunk.len() as u64;

        if last_tick.elapsed() >= PROGRESS_TICK_INTERVAL {
            let _ = events
                .send(WorkerEvent::ProgressTick {
                    segment_id: segment.id.clone(),
                    downloaded: segment.downloaded,
                    speed_sample: chunk.len() as f64 / last_tick.elapsed().as_secs_f64().max(0.001),
                })
                .await;
            last_tick = Instant::now();
        }
    }

    file.flush().await.map_err(|e| error::classify_io_error(&e))?;
    file.sync_all().await.map_err(|e| error::classify_io_error(&e))?;
    segment.checksum = Some(hasher.digest());
    Ok(())
}

/// Whether `segment` covers byte 0 through the last byte of the resource,
/// the only case where a plain `200` (instead of `206`) is an acceptable
/// answer to a ranged GET.
fn segment_spans_whole_file(segment: &Segment, total_size: u64) -> bool {
    segment.start == 0 && total_size > 0 && segment.end == total_size - 1
}

/// Feeds the first `len` bytes already on disk at `path` into `hasher`, so a
/// retried or resumed attempt's digest covers the whole segment rather than
/// just the bytes streamed by the current attempt.
async fn rehash_existing(path: &Path, len: u64, hasher: &mut StreamingHasher) -> Result<(), CoreError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| error::classify_io_error(&e))?;
    let mut remaining = len;
    let mut buf = [0u8; 64 << 10];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let read = file
            .read(&mut buf[..want])
            .await
            .map_err(|e| error::classify_io_error(&e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        remaining -= read as u64;
    }
    Ok(())
}

async fn open_part_file(path: &Path) -> Result<tokio::fs::File, CoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| error::classify_io_error(&e))?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| error::classify_io_error(&e))
}
