//! Immutable per-task configuration (`DownloadConfig`) plus the integrity
//! and work-mode option enums it holds. Validation turns an open-ended
//! option bag into `CoreError::Config` the way the spec's "dynamic config
//! objects" note requires: unknown keys rejected, recognized keys clamped
//! or refused outright.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 16;
pub const MIN_CHUNK_SIZE: u64 = 1024;
pub const MIN_TIMEOUT_MS: u64 = 1000;
pub const MAX_RETRY_COUNT: u32 = 10;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 20;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRY_COUNT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    Blocking,
    NonBlocking,
    Persistent,
    Temporary,
}

impl Default for WorkMode {
    fn default() -> Self {
        WorkMode::NonBlocking
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha256
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(CoreError::Config(format!(
                "unsupported hash algorithm: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    pub algorithm: HashAlgorithm,
    pub expected_checksum: Option<String>,
    #[serde(default = "default_true")]
    pub verify_segments: bool,
    #[serde(default = "default_true")]
    pub verify_final: bool,
}

fn default_true() -> bool {
    true
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            expected_checksum: None,
            verify_segments: true,
            verify_final: true,
        }
    }
}

/// Case-insensitive header map: keys are stored lower-cased, the original
/// casing supplied by the caller is not retained (matching how the spec
/// describes `headers` as a case-insensitive map).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderMap(pub HashMap<String, String>);

impl HeaderMap {
    pub fn from_pairs(pairs: HashMap<String, String>) -> Self {
        let mut map = HashMap::with_capacity(pairs.len());
        for (k, v) in pairs {
            map.insert(k.to_ascii_lowercase(), v);
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub url: String,
    pub output_path: PathBuf,
    pub filename: Option<String>,
    pub max_concurrency: usize,
    pub chunk_size: u64,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub work_mode: WorkMode,
    pub enable_resume: bool,
    pub headers: HeaderMap,
    pub session_id: Option<String>,
    pub integrity: IntegrityConfig,
}

/// Builder-shaped raw options as they would arrive from the tool facade
/// (an open-ended bag of `Option<T>`, mirroring `download_file`'s optional
/// args in the spec's tool table). `DownloadConfig::from_options` is the
/// single place that enforces range clamps and rejects nonsense, so every
/// caller (CLI, tool facade) goes through the same validation.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub url: String,
    pub output_path: PathBuf,
    pub filename: Option<String>,
    pub max_concurrency: Option<usize>,
    pub chunk_size: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub retry_count: Option<u32>,
    pub work_mode: Option<WorkMode>,
    pub enable_resume: Option<bool>,
    pub headers: Option<HashMap<String, String>>,
    pub session_id: Option<String>,
    pub integrity: Option<IntegrityConfig>,
}

impl DownloadConfig {
    pub fn from_options(opts: DownloadOptions) -> Result<Self, CoreError> {
        let url = url::Url::parse(&opts.url)
            .map_err(|e| CoreError::Config(format!("invalid URL {}: {e}", opts.url)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CoreError::Config(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let max_concurrency = opts
            .max_concurrency
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
            .clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);

        let chunk_size = opts.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size < MIN_CHUNK_SIZE {
            return Err(CoreError::Config(format!(
                "chunk_size must be >= {MIN_CHUNK_SIZE} bytes"
            )));
        }

        let timeout_ms = opts.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms < MIN_TIMEOUT_MS {
            return Err(CoreError::Config(format!(
                "timeout_ms must be >= {MIN_TIMEOUT_MS}"
            )));
        }

        let retry_count = opts.retry_count.unwrap_or(DEFAULT_RETRY_COUNT);
        if retry_count > MAX_RETRY_COUNT {
            return Err(CoreError::Config(format!(
                "retry_count must be <= {MAX_RETRY_COUNT}"
            )));
        }

        Ok(Self {
            url: opts.url,
            output_path: opts.output_path,
            filename: opts.filename,
            max_concurrency,
            chunk_size,
            timeout_ms,
            retry_count,
            work_mode: opts.work_mode.unwrap_or_default(),
            enable_resume: opts.enable_resume.unwrap_or(true),
            headers: HeaderMap::from_pairs(opts.headers.unwrap_or_default()),
            session_id: opts.session_id,
            integrity: opts.integrity.unwrap_or_default(),
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_count + 1
    }
}
