//! Closed error taxonomy for domain logic that must branch on failure kind.
//!
//! Fallible entry points outside this taxonomy (config I/O, process/signal
//! plumbing, transport errors) use `anyhow::Result` instead, per SPEC_FULL.md §7.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no such {what}: {key}")]
    LookupMiss { what: &'static str, key: String },

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("http error: {0}")]
    HttpStatus(#[from] HttpStatusError),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("bmc worker failed: {0}")]
    WorkerFailed(String),

    #[error("model drift: {0}")]
    ModelDrift(String),

    #[error("work queue overloaded, dropped request")]
    OverloadDropped,

    #[error("bad state: {0}")]
    BadState(String),

    #[error("internal logic error: {0}")]
    InternalLogic(String),
}

#[derive(Debug, Error)]
pub enum HttpStatusError {
    #[error("unauthorized (401)")]
    Unauthorized,
    #[error("not found (404)")]
    NotFound,
    #[error("conflict (409)")]
    Conflict,
    #[error("length required (411)")]
    LengthRequired,
    #[error("connection lost (status 0)")]
    ZeroStatus,
    #[error("unexpected http status {0}")]
    Other(u16),
}

impl HttpStatusError {
    pub fn from_status(code: u16) -> Self {
        match code {
            0 => Self::ZeroStatus,
            401 => Self::Unauthorized,
            404 => Self::NotFound,
            409 => Self::Conflict,
            411 => Self::LengthRequired,
            other => Self::Other(other),
        }
    }

    /// Failures that the work queue treats as "re-auth and retry" rather than a hard failure.
    pub fn is_retryable_with_reauth(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::ZeroStatus)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
