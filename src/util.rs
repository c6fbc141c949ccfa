//! Small formatting/filesystem helpers shared by the demo CLI and tests.
//! Ported from the teacher's `util.rs`; bandwidth-limit parsing was
//! dropped along with `BandwidthLimiter` (no throttling concept in this
//! system — see DESIGN.md).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub fn format_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut val = value as f64;
    let mut unit = 0usize;
    while val >= 1024.0 && unit < UNITS.len() - 1 {
        val /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value} {}", UNITS[unit])
    } else {
        format!("{val:.2} {}", UNITS[unit])
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    Ok(())
}

pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
}
