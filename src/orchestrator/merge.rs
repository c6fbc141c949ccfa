//! Part-file merge (spec §4.4). Kept as the teacher's sequential
//! concatenate-then-remove approach rather than the preallocated-offset
//! alternative the spec permits — see SPEC_FULL.md §9.1 for why.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{self, CoreError};
use crate::task::Segment;

const COPY_BUFFER_SIZE: usize = 256 << 10;

/// Concatenates `segments` (already sorted by `start`) into `output_path`,
/// removing each part file as it is consumed. On any failure the
/// partially written output is deleted and remaining part files are left
/// in place so a retry can pick up the merge again (spec §4.4).
pub async fn merge_segments(segments: &[Segment], output_path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| error::classify_io_error(&e))?;
    }

    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by_key(|s| s.start);

    let result = merge_inner(&ordered, output_path).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(output_path).await;
    }
    result
}

async fn merge_inner(ordered: &[&Segment], output_path: &Path) -> Result<(), CoreError> {
    let mut output = File::create(output_path)
        .await
        .map_err(|e| error::classify_io_error(&e))?;

    for segment in ordered {
        let mut part = File::open(&segment.part_path)
            .await
            .map_err(|e| error::classify_io_error(&e))?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let read = part
                .read(&mut buffer)
                .await
                .map_err(|e| error::classify_io_error(&e))?;
            if read == 0 {
                break;
            }
            output
                .write_all(&buffer[..read])
                .await
                .map_err(|e| error::classify_io_error(&e))?;
        }
        drop(part);
        tokio::fs::remove_file(&segment.part_path)
            .await
            .map_err(|e| error::classify_io_error(&e))?;
    }

    output.flush().await.map_err(|e| error::classify_io_error(&e))?;
    output.sync_all().await.map_err(|e| error::classify_io_error(&e))?;
    Ok(())
}
