//! Error taxonomy for the CM client.
//!
//! One variant per failure domain, `thiserror`-derived, with `From`
//! conversions at the I/O boundary, rather than a single flat string error.

use thiserror::Error;

/// Errors surfaced by the CM client.
#[derive(Debug, Error)]
pub enum CmError {
    /// Socket I/O failure. Informational on its own; the session task turns
    /// it into a `close(had_error=true)` and lets the reconnect policy decide.
    #[error("transport error: {0}")]
    Transport(String),

    /// `ChannelEncryptResult` came back with a non-OK result code. Terminal,
    /// no retry.
    #[error("encryption failed: result={0}")]
    EncryptionFailed(u32),

    /// Unexpected teardown of a previously-connected (`Ready`) session.
    #[error("disconnected")]
    Disconnected,

    /// First connect attempt failed and `auto_retry` was disabled.
    #[error("cannot connect")]
    CannotConnect,

    /// Header decode failure or an otherwise impossible wire shape.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for CmError {
    fn from(err: std::io::Error) -> Self {
        CmError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CmError>;
