use std::time::Duration;

use shadow_protocol::ConsoleLoggerConfig;

pub const READY_TIMEOUT_ENV: &str = "SHADOW_ENV_READY_TIMEOUT_MS";
pub const IMPORT_TIMEOUT_ENV: &str = "SHADOW_ENV_IMPORT_TIMEOUT_MS";
pub const ACK_TIMEOUT_ENV: &str = "SHADOW_ENV_ACK_TIMEOUT_MS";
pub const CONFIRM_STRUCTURAL_ENV: &str = "SHADOW_ENV_CONFIRM_STRUCTURAL";

#[derive(Debug, Clone, PartialEq)]
pub struct EnvConfig {
    /// How long `start` waits for the worker's `ready`.
    pub ready_timeout: Duration,
    /// How long `import_script` waits for its ack.
    pub import_timeout: Duration,
    /// How long a confirmed `apply_change_trail` waits for its ack.
    pub ack_timeout: Duration,
    /// Wait for an ack on trails that create, destroy or move entities even
    /// when the caller did not ask for confirmation.
    pub confirm_structural_changes: bool,
    /// Initial console forwarding settings of the worker.
    pub console: ConsoleLoggerConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(5),
            import_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
            confirm_structural_changes: true,
            console: ConsoleLoggerConfig::default(),
        }
    }
}

impl EnvConfig {
    /// Defaults overridden by `SHADOW_ENV_*` variables. Malformed values are
    /// ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let millis = |name: &str, fallback: Duration| match lookup(name) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!("ignoring {name}={raw:?}: expected milliseconds");
                    fallback
                }
            },
            None => fallback,
        };
        config.ready_timeout = millis(READY_TIMEOUT_ENV, config.ready_timeout);
        config.import_timeout = millis(IMPORT_TIMEOUT_ENV, config.import_timeout);
        config.ack_timeout = millis(ACK_TIMEOUT_ENV, config.ack_timeout);
        if let Some(raw) = lookup(CONFIRM_STRUCTURAL_ENV) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.confirm_structural_changes = true,
                "0" | "false" | "no" | "off" => config.confirm_structural_changes = false,
                _ => tracing::warn!("ignoring {CONFIRM_STRUCTURAL_ENV}={raw:?}: expected a boolean"),
            }
        }
        config
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_confirm_structural_changes(mut self, confirm: bool) -> Self {
        self.confirm_structural_changes = confirm;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn overrides_from_variables() {
        let config = EnvConfig::from_lookup(lookup(&[
            (READY_TIMEOUT_ENV, "250"),
            (ACK_TIMEOUT_ENV, " 40 "),
            (CONFIRM_STRUCTURAL_ENV, "off"),
        ]));
        assert_eq!(config.ready_timeout, Duration::from_millis(250));
        assert_eq!(config.ack_timeout, Duration::from_millis(40));
        assert_eq!(config.import_timeout, EnvConfig::default().import_timeout);
        assert!(!config.confirm_structural_changes);
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let config = EnvConfig::from_lookup(lookup(&[
            (IMPORT_TIMEOUT_ENV, "soon"),
            (CONFIRM_STRUCTURAL_ENV, "maybe"),
        ]));
        assert_eq!(config, EnvConfig::default());
    }
}
