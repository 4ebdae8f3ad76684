use thiserror::Error;

/// Rejected detector settings. Raised before a session processes any sample.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("sensitivity factor k must be finite and positive, got {0}")]
    InvalidSensitivity(f64),
    #[error("warm-up count must be at least 1")]
    InvalidWarmup,
}

/// Failure on the sample transport. Ends a session; never fatal to the process.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("stream broken: {0}")]
    Broken(String),
}

/// Failure to persist an anomaly record. Logged and counted by the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SinkError {
    #[error("sink queue is full")]
    Full,
    #[error("sink is closed")]
    Closed,
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("record rejected: {0}")]
    Rejected(String),
    #[error("failed to encode record: {0}")]
    Encode(String),
}
