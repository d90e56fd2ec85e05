use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no 'type' discriminator")]
    MissingType,
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("transfer slot {0} is missing or was already claimed")]
    MissingTransfer(usize),
}
