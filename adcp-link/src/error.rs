use thiserror::Error;

/// Failure talking to the ADCP or to the compass behind it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommFailure {
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("break failed: {0}")]
    Break(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("link is not in compass mode")]
    Disconnected,
}
