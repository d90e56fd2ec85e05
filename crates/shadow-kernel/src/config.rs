use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use shadow_protocol::Token;

use crate::error::KernelError;

/// Declarative registry setup, loaded once when a shadow context starts.
///
/// ```json
/// { "define": { "token": "factory-name" }, "routes": { "token": ["other", "tokens"] } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub define: IndexMap<Token, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub routes: IndexMap<Token, Vec<Token>>,
}

impl RegistryConfig {
    pub fn from_json(text: &str) -> Result<Self, KernelError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("read {}: {err}", path.display()))?;
        Ok(Self::from_json(&text)?)
    }
}
