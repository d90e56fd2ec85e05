use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::KernelError;
use crate::registry::Registry;

/// Installs factories and routes into a registry on behalf of one script url.
pub type ScriptInstaller = Arc<dyn Fn(&mut Registry) -> anyhow::Result<()> + Send + Sync>;

/// Scripts a shadow context may import, keyed by url.
///
/// The catalog is shared with worker threads, so installers must be
/// `Send + Sync`; the factories they register are not.
#[derive(Clone, Default)]
pub struct ScriptCatalog {
    scripts: HashMap<String, ScriptInstaller>,
}

impl ScriptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, url: impl Into<String>, installer: F) -> &mut Self
    where
        F: Fn(&mut Registry) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.scripts.insert(url.into(), Arc::new(installer));
        self
    }

    pub fn contains(&self, url: &str) -> bool {
        self.scripts.contains_key(url)
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }

    fn installer(&self, url: &str) -> Option<ScriptInstaller> {
        self.scripts.get(url).cloned()
    }
}

impl fmt::Debug for ScriptCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut urls: Vec<_> = self.urls().collect();
        urls.sort_unstable();
        f.debug_struct("ScriptCatalog").field("urls", &urls).finish()
    }
}

/// Per-context import state on top of a [`ScriptCatalog`].
#[derive(Debug, Default)]
pub struct ScriptLoader {
    catalog: ScriptCatalog,
    imported: IndexSet<String>,
}

impl ScriptLoader {
    pub fn new(catalog: ScriptCatalog) -> Self {
        Self {
            catalog,
            imported: IndexSet::new(),
        }
    }

    /// Installs `url` into `registry`. Returns `Ok(false)` when the script
    /// had already been imported.
    pub fn import(&mut self, url: &str, registry: &mut Registry) -> Result<bool, KernelError> {
        if self.imported.contains(url) {
            log::debug!("script '{url}' already imported");
            return Ok(false);
        }
        let installer = self
            .catalog
            .installer(url)
            .ok_or_else(|| KernelError::ScriptNotFound(url.to_string()))?;
        installer(registry).map_err(|err| KernelError::ScriptFailed {
            url: url.to_string(),
            message: format!("{err:#}"),
        })?;
        self.imported.insert(url.to_string());
        log::info!("imported script '{url}'");
        Ok(true)
    }

    pub fn imported(&self) -> impl Iterator<Item = &str> {
        self.imported.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_installs_once() {
        let mut catalog = ScriptCatalog::new();
        catalog.register("effects.js", |registry: &mut Registry| {
            registry.append_route("scene", ["glow"]);
            Ok(())
        });
        let mut loader = ScriptLoader::new(catalog);
        let mut registry = Registry::new();

        assert!(loader.import("effects.js", &mut registry).unwrap());
        assert!(!loader.import("effects.js", &mut registry).unwrap());
        assert_eq!(registry.route("scene").unwrap(), vec!["glow"]);
        assert_eq!(loader.imported().collect::<Vec<_>>(), vec!["effects.js"]);
    }

    #[test]
    fn unknown_and_failing_scripts() {
        let mut catalog = ScriptCatalog::new();
        catalog.register("broken.js", |_: &mut Registry| anyhow::bail!("syntax error"));
        let mut loader = ScriptLoader::new(catalog);
        let mut registry = Registry::new();

        assert!(matches!(
            loader.import("missing.js", &mut registry),
            Err(KernelError::ScriptNotFound(url)) if url == "missing.js"
        ));
        let err = loader.import("broken.js", &mut registry).unwrap_err();
        assert!(err.to_string().contains("syntax error"));
        assert_eq!(loader.imported().count(), 0);
    }
}
