use shadow_protocol::{ConsoleLoggerConfig, Frame, LogLevel, WireMessage};
use tokio::sync::mpsc::UnboundedSender;

/// Worker-side log sink. Every record is emitted locally through `tracing`;
/// records the current config allows are also posted to the view as
/// `consoleLog` messages.
#[derive(Debug)]
pub struct ConsoleLogger {
    config: ConsoleLoggerConfig,
    outbound: UnboundedSender<Frame>,
}

impl ConsoleLogger {
    pub fn new(config: ConsoleLoggerConfig, outbound: UnboundedSender<Frame>) -> Self {
        Self { config, outbound }
    }

    pub fn config(&self) -> &ConsoleLoggerConfig {
        &self.config
    }

    pub fn configure(&mut self, config: ConsoleLoggerConfig) {
        tracing::debug!(
            "console forwarding {} at {}",
            if config.enabled { "enabled" } else { "disabled" },
            config.level
        );
        self.config = config;
    }

    /// Returns whether the record was forwarded to the view.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> bool {
        let message = message.into();
        emit(level, None, &message);
        if !self.config.allows(level) {
            return false;
        }
        let frame = match (WireMessage::ConsoleLog { level, message }).encode() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("failed to encode console record: {err}");
                return false;
            }
        };
        self.outbound.send(frame).is_ok()
    }
}

/// Emits `message` through `tracing` at the matching level.
pub fn emit(level: LogLevel, prefix: Option<&str>, message: &str) {
    let line = match prefix {
        Some(prefix) => format!("{prefix} {message}"),
        None => message.to_string(),
    };
    match level {
        LogLevel::Error => tracing::error!("{line}"),
        LogLevel::Warn => tracing::warn!("{line}"),
        LogLevel::Info => tracing::info!("{line}"),
        LogLevel::Debug => tracing::debug!("{line}"),
        LogLevel::Trace => tracing::trace!("{line}"),
    }
}
