//! Error taxonomy for the tracker engine.
//!
//! Provider failures are recovered locally by the scheduler's backoff path
//! and never surface to callers; validation and persistence failures are
//! returned as explicit results. Nothing here terminates the process.

use thiserror::Error;

/// Failure talking to the market data source.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network error or non-success HTTP status. Recovered via backoff.
    #[error("market data provider unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Unavailable(err.to_string())
    }
}

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Malformed input, e.g. a zero quantity or missing ticker. Not retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Store read/write failure. Loads degrade to defaults; saves are
    /// reported but do not roll back in-memory state.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, Error>;
