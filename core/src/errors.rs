//! Error kinds shared across the engine.
//!
//! Mirrors the propagation policy: the market-maker loop catches every
//! non-fatal variant per event, logs, and continues. Only `FatalConfig`
//! and explicit shutdown stop it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("risk violation: {0}")]
    RiskViolation(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("state inconsistency: {0}")]
    StateInconsistency(String),

    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::FatalConfig(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
