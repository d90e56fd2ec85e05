use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("registry config names unknown factory '{factory}' for token '{token}'")]
    UnknownFactory { token: String, factory: String },
    #[error("registry config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("no script registered for '{0}'")]
    ScriptNotFound(String),
    #[error("script '{url}' failed to install: {message}")]
    ScriptFailed { url: String, message: String },
}
