//! Segmentation planner (spec §4.1): decides segment count and boundaries,
//! and supports splitting a lagging segment once capacity frees up.
//! Generalizes the teacher's `compute_chunk_size` (which only ever derived
//! a single chunk size from a fixed segment count) into the full
//! clamp-and-scale rule the spec describes.

use std::path::Path;

use crate::error::CoreError;
use crate::task::{Segment, SegmentStatus};

pub const SINGLE_SEGMENT_THRESHOLD: u64 = 1 << 20; // 1 MiB

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl NetworkQuality {
    fn scale(self) -> f64 {
        match self {
            NetworkQuality::Poor => 0.5,
            NetworkQuality::Fair => 0.75,
            NetworkQuality::Good => 1.0,
            NetworkQuality::Excellent => 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentationBounds {
    pub min_chunk: u64,
    pub max_chunk: u64,
    pub optimal_chunk: u64,
}

impl Default for SegmentationBounds {
    fn default() -> Self {
        Self {
            min_chunk: 256 << 10,
            max_chunk: 64 << 20,
            optimal_chunk: 1 << 20,
        }
    }
}

pub struct PlanInput<'a> {
    pub total_size: u64,
    pub max_concurrency: usize,
    pub accept_ranges: bool,
    pub network_quality: Option<NetworkQuality>,
    pub bounds: SegmentationBounds,
    pub part_dir: &'a Path,
    pub part_prefix: &'a str,
}

fn ceil_div(a: u64, b: u64) -> u64 {
    if b == 0 {
        return 1;
    }
    (a + b - 1) / b
}

fn part_path(part_dir: &Path, part_prefix: &str, index: usize) -> std::path::PathBuf {
    part_dir.join(format!("{part_prefix}.part{index}"))
}

/// Computes the segment count `N` per spec §4.1 (before boundary math).
fn compute_segment_count(input: &PlanInput) -> usize {
    if input.total_size < SINGLE_SEGMENT_THRESHOLD || !input.accept_ranges {
        return 1;
    }

    let by_max_chunk = ceil_div(input.total_size, input.bounds.max_chunk);
    let by_optimal_chunk = ceil_div(input.total_size, input.bounds.optimal_chunk);
    let mut n = (input.max_concurrency as u64)
        .clamp(by_max_chunk.max(1), by_optimal_chunk.max(1))
        .min(input.max_concurrency as u64);

    if let Some(quality) = input.network_quality {
        let scaled = (n as f64 * quality.scale()).round() as i64;
        n = scaled.clamp(1, input.max_concurrency as i64) as u64;
    }

    n.clamp(1, input.max_concurrency.max(1) as u64) as usize
}

/// Builds the initial segment partition for a task. Deterministic given the
/// same inputs; ids are stable `segment_0 .. segment_{N-1}`.
pub fn plan(input: PlanInput) -> Result<Vec<Segment>, CoreError> {
    if input.max_concurrency == 0 {
        return Err(CoreError::InvalidPlan("max_concurrency must be >= 1".into()));
    }

    if input.total_size == 0 {
        return Ok(vec![Segment {
            id: "segment_0".to_string(),
            start: 0,
            end: 0,
            downloaded: 0,
            status: SegmentStatus::Completed,
            part_path: part_path(input.part_dir, input.part_prefix, 0),
            checksum: None,
            retry_count: 0,
        }]);
    }

    let n = compute_segment_count(&input).max(1) as u64;
    let base_len = input.total_size / n;
    let remainder = input.total_size % n;

    let mut segments = Vec::with_capacity(n as usize);
    let mut start = 0u64;
    for i in 0..n {
        let mut len = base_len;
        if i == n - 1 {
            // last segment absorbs the remainder so the partition always
            // sums to exactly total_size
            len = input.total_size - start;
        }
        let _ = remainder;
        let end = start + len - 1;
        segments.push(Segment {
            id: format!("segment_{i}"),
            start,
            end,
            downloaded: 0,
            status: SegmentStatus::Pending,
            part_path: part_path(input.part_dir, input.part_prefix, i as usize),
            checksum: None,
            retry_count: 0,
        });
        start = end + 1;
    }

    Ok(segments)
}

/// Splits `segment` into two child segments if its remaining bytes exceed
/// `2 * min_chunk`; the first child preserves already-downloaded bytes so
/// no work or hash progress is lost (spec §4.1 rebalancing note). Returns
/// `None` when the segment is not a good rebalance candidate.
pub fn maybe_split(
    segment: &Segment,
    bounds: &SegmentationBounds,
    next_id: &str,
    part_dir: &Path,
    part_prefix: &str,
    next_part_index: usize,
) -> Option<(Segment, Segment)> {
    if segment.remaining() <= 2 * bounds.min_chunk {
        return None;
    }

    let remaining_start = segment.start + segment.downloaded;
    let remaining_len = segment.end - remaining_start + 1;
    let half = remaining_len / 2;
    let split_point = remaining_start + half;

    let first = Segment {
        id: segment.id.clone(),
        start: segment.start,
        end: split_point - 1,
        downloaded: segment.downloaded,
        status: segment.status,
        part_path: segment.part_path.clone(),
        checksum: None,
        retry_count: segment.retry_count,
    };
    let second = Segment {
        id: next_id.to_string(),
        start: split_point,
        end: segment.end,
        downloaded: 0,
        status: SegmentStatus::Pending,
        part_path: part_path(part_dir, part_prefix, next_part_index),
        checksum: None,
        retry_count: 0,
    };
    Some((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn input(total_size: u64, max_concurrency: usize, accept_ranges: bool) -> PlanInput<'static> {
        PlanInput {
            total_size,
            max_concurrency,
            accept_ranges,
            network_quality: None,
            bounds: SegmentationBounds::default(),
            part_dir: Path::new("/tmp"),
            part_prefix: "file.bin",
        }
    }

    #[test]
    fn small_file_is_single_segment() {
        let segments = plan(input(512, 8, true)).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[0].end, 511);
    }

    #[test]
    fn no_accept_ranges_is_single_segment() {
        let segments = plan(input(10 << 20, 8, false)).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn partitions_exactly_with_no_gaps_or_overlaps() {
        let segments = plan(input(4_000_000, 4, true)).unwrap();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[0].end, 999_999);
        assert_eq!(segments[1].start, 1_000_000);
        assert_eq!(segments[1].end, 1_999_999);
        assert_eq!(segments[2].start, 2_000_000);
        assert_eq!(segments[2].end, 2_999_999);
        assert_eq!(segments[3].start, 3_000_000);
        assert_eq!(segments[3].end, 3_999_999);

        let mut total = 0u64;
        for s in &segments {
            total += s.len();
        }
        assert_eq!(total, 4_000_000);
    }

    #[test]
    fn total_size_one_with_high_concurrency_is_one_segment() {
        let segments = plan(input(1, 16, true)).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[0].end, 0);
    }

    #[test]
    fn zero_total_size_is_single_completed_empty_segment() {
        let segments = plan(input(0, 4, true)).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].status, SegmentStatus::Completed);
    }

    #[test]
    fn zero_concurrency_is_invalid_plan() {
        let err = plan(input(1000, 0, true)).unwrap_err();
        assert_eq!(err.code(), "InvalidPlan");
    }

    #[test]
    fn network_quality_scales_segment_count() {
        let mut poor = input(64 << 20, 8, true);
        poor.network_quality = Some(NetworkQuality::Poor);
        let poor_segments = plan(poor).unwrap();

        let mut excellent = input(64 << 20, 8, true);
        excellent.network_quality = Some(NetworkQuality::Excellent);
        let excellent_segments = plan(excellent).unwrap();

        assert!(poor_segments.len() <= excellent_segments.len());
    }

    #[test]
    fn split_preserves_downloaded_bytes_in_first_child() {
        let segment = Segment {
            id: "segment_0".to_string(),
            start: 0,
            end: 999_999,
            downloaded: 100_000,
            status: SegmentStatus::Downloading,
            part_path: PathBuf::from("/tmp/file.bin.part0"),
            checksum: None,
            retry_count: 0,
        };
        let bounds = SegmentationBounds {
            min_chunk: 100,
            max_chunk: 1 << 20,
            optimal_chunk: 1 << 20,
        };
        let (first, second) = maybe_split(
            &segment,
            &bounds,
            "segment_1",
            Path::new("/tmp"),
            "file.bin",
            1,
        )
        .expect("should split");
        assert_eq!(first.downloaded, 100_000);
        assert_eq!(first.start, 0);
        assert_eq!(second.start, first.end + 1);
        assert_eq!(second.end, segment.end);
    }

    #[test]
    fn does_not_split_near_complete_segment() {
        let segment = Segment {
            id: "segment_0".to_string(),
            start: 0,
            end: 999,
            downloaded: 950,
            status: SegmentStatus::Downloading,
            part_path: PathBuf::from("/tmp/file.bin.part0"),
            checksum: None,
            retry_count: 0,
        };
        let bounds = SegmentationBounds::default();
        assert!(maybe_split(&segment, &bounds, "segment_1", Path::new("/tmp"), "file.bin", 1)
            .is_none());
    }
}
