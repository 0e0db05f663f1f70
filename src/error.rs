use std::sync::Arc;
use thiserror::Error;

pub use crate::dns::ParseError;

/// Configuration errors, fatal at init
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Unknown configuration option: {0}")]
    UnknownOption(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("NSEC3 iteration limit for key size {key_size} out of range: {value}")]
    Nsec3IterationsOutOfRange { key_size: usize, value: u64 },
    #[error("Invalid trust anchor: {0}")]
    InvalidTrustAnchor(String),
    #[error("Trust anchor file error: {0}")]
    AnchorFile(String),
    #[error("No trust anchors configured")]
    NoTrustAnchors,
    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(Arc::new(err))
    }
}

/// Upstream resolver failures, propagated unchanged to the caller
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Upstream query timed out")]
    Timeout,
    #[error("Upstream response malformed: {0}")]
    Malformed(#[from] ParseError),
    #[error("Upstream resolver failure: {0}")]
    Upstream(String),
    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::IoError(Arc::new(err))
    }
}

/// Unified error type for the crate
#[derive(Debug, Clone, Error)]
pub enum VordrError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

pub type Result<T> = std::result::Result<T, VordrError>;
