use std::time::Duration;

use shadow_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("worker channel closed")]
    ChannelClosed,
    #[error("env destroyed")]
    Destroyed,
    #[error("env not started")]
    NotStarted,
    #[error("env already started")]
    AlreadyStarted,
    #[error("importing '{url}' failed: {message}")]
    ScriptImport { url: String, message: String },
    #[error("registry setup failed: {0}")]
    Setup(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("worker thread error: {0}")]
    Worker(String),
}
