//! Error taxonomy surfaced by the core.
//!
//! Every terminal task outcome and every tool-call failure carries one of
//! these variants. `code()` gives the stable wire string stored in
//! `TaskRecord.error` and returned as `error.code` from the tool facade;
//! implementations elsewhere must not invent ad hoc strings for the same
//! conditions.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    NotFound,
    Permission,
    OutOfSpace,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityErrorKind {
    ChecksumMismatch,
    UnsupportedAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateErrorKind {
    InvalidTransition,
    NotFound,
    QueueFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectErrorKind {
    TooMany,
    Invalid,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server responded with {0}")]
    Server5xx(u16),
    #[error("client error: {0}")]
    Client4xx(u16),
    #[error("range not satisfiable")]
    RangeNotSatisfiable,
    #[error("redirect error: {0:?}")]
    Redirect(RedirectErrorKind),
    #[error("filesystem error: {0:?}")]
    FileSystem(FsErrorKind),
    #[error("integrity error: {0:?}")]
    Integrity(IntegrityErrorKind),
    #[error("state error: {0:?}")]
    State(StateErrorKind),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cancelled")]
    Cancelled,
    #[error("merge failed: {0}")]
    MergeError(String),
    #[error("invalid segmentation plan: {0}")]
    InvalidPlan(String),
}

impl CoreError {
    /// Stable string stored in `TaskRecord.error.code` and the tool facade's
    /// `error.code`. Never derived from `Display` since library strings are
    /// not supposed to leak to callers (spec's "never raw library strings").
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Network(_) => "Network",
            CoreError::Timeout => "Timeout",
            CoreError::Server5xx(_) => "Server5xx",
            CoreError::Client4xx(_) => "Client4xx",
            CoreError::RangeNotSatisfiable => "RangeNotSatisfiable",
            CoreError::Redirect(RedirectErrorKind::TooMany) => "TooManyRedirects",
            CoreError::Redirect(RedirectErrorKind::Invalid) => "InvalidRedirect",
            CoreError::FileSystem(FsErrorKind::NotFound) => "FileSystem.NotFound",
            CoreError::FileSystem(FsErrorKind::Permission) => "FileSystem.Permission",
            CoreError::FileSystem(FsErrorKind::OutOfSpace) => "FileSystem.OutOfSpace",
            CoreError::FileSystem(FsErrorKind::Other) => "FileSystem.Other",
            CoreError::Integrity(IntegrityErrorKind::ChecksumMismatch) => "ChecksumMismatch",
            CoreError::Integrity(IntegrityErrorKind::UnsupportedAlgorithm) => {
                "UnsupportedAlgorithm"
            }
            CoreError::State(StateErrorKind::InvalidTransition) => "InvalidStateTransition",
            CoreError::State(StateErrorKind::NotFound) => "TaskNotFound",
            CoreError::State(StateErrorKind::QueueFull) => "QueueFull",
            CoreError::Config(_) => "Config.Invalid",
            CoreError::Cancelled => "Cancelled",
            CoreError::MergeError(_) => "MergeError",
            CoreError::InvalidPlan(_) => "InvalidPlan",
        }
    }

    /// Whether a segment worker should retry this error (subject to the
    /// attempt ceiling), per the fatal/retryable split in the spec's error
    /// handling design.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Timeout | CoreError::Network(_) | CoreError::Server5xx(_) => true,
            CoreError::Client4xx(code) => *code == 408 || *code == 429,
            CoreError::FileSystem(kind) => {
                !matches!(kind, FsErrorKind::Permission | FsErrorKind::OutOfSpace)
            }
            _ => false,
        }
    }
}

/// Classifies an HTTP status code into the taxonomy above. Callers pass
/// `allow_full_200` only when the request covers the entire resource (a
/// single whole-file segment), so a plain `200` is accepted there; any other
/// segment getting `200` for a partial `Range` is `RangeNotSatisfiable`
/// (spec §4.2 step 2, spec §8 boundary).
pub fn classify_http_status(status: u16, allow_full_200: bool) -> Option<CoreError> {
    match status {
        206 => None,
        200 if allow_full_200 => None,
        200 => Some(CoreError::RangeNotSatisfiable),
        416 => Some(CoreError::RangeNotSatisfiable),
        408 | 429 => Some(CoreError::Client4xx(status)),
        400..=499 => Some(CoreError::Client4xx(status)),
        500..=599 => Some(CoreError::Server5xx(status)),
        _ => Some(CoreError::Network(format!("unexpected status {status}"))),
    }
}

pub fn classify_io_error(err: &std::io::Error) -> CoreError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => CoreError::FileSystem(FsErrorKind::NotFound),
        ErrorKind::PermissionDenied => CoreError::FileSystem(FsErrorKind::Permission),
        _ => {
            #[cfg(target_os = "linux")]
            if err.raw_os_error() == Some(28) {
                // ENOSPC
                return CoreError::FileSystem(FsErrorKind::OutOfSpace);
            }
            CoreError::FileSystem(FsErrorKind::Other)
        }
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> CoreError {
    if err.is_timeout() {
        CoreError::Timeout
    } else if let Some(status) = err.status() {
        classify_http_status(status.as_u16(), false).unwrap_or(CoreError::Network(err.to_string()))
    } else {
        CoreError::Network(err.to_string())
    }
}
