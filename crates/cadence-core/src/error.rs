//! Error types for the Cadence speech pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Every credential in the pool has been tried and rotated past.
    #[error("Credential pool exhausted")]
    PoolExhausted,

    /// A single synthesis or generation attempt failed (network, auth, quota).
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// A received frame could not be turned into playable audio.
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// A frame arrived for an activation that has already been stopped.
    #[error("Frame arrived after cancellation")]
    CancellationRace,

    #[error("Audio output error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether another credential might succeed where this attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransportFailure(_) | Error::Http(_) | Error::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(Error::TransportFailure("429".into()).is_retryable());
        assert!(!Error::PoolExhausted.is_retryable());
        assert!(!Error::DecodeFailure("odd length".into()).is_retryable());
    }
}
