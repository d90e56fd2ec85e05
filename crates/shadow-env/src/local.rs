use async_trait::async_trait;
use shadow_kernel::{ApplyReport, Kernel, Registry, ScriptCatalog, ScriptLoader};
use shadow_protocol::{ChangeTrail, LogLevel};

use crate::config::EnvConfig;
use crate::env::{MessageToViewCallback, RegistrySetup, ShadowEnv};
use crate::error::EnvError;
use crate::logger;

/// Env running the kernel on the caller's thread. Trails are applied as
/// soon as they are handed over, without any encoding.
pub struct LocalEnv {
    config: EnvConfig,
    setup: Option<RegistrySetup>,
    loader: Option<ScriptLoader>,
    kernel: Option<Kernel>,
    callback: Option<MessageToViewCallback>,
    destroyed: bool,
}

impl LocalEnv {
    pub fn new(config: EnvConfig, catalog: ScriptCatalog) -> Self {
        Self {
            config,
            setup: None,
            loader: Some(ScriptLoader::new(catalog)),
            kernel: None,
            callback: None,
            destroyed: false,
        }
    }

    /// Runs `setup` on the fresh registry during `start`.
    pub fn with_setup<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut Registry) -> anyhow::Result<()> + Send + 'static,
    {
        let setup: RegistrySetup = Box::new(setup);
        self.setup = Some(setup);
        self
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// The kernel, once started.
    pub fn kernel(&self) -> Option<&Kernel> {
        self.kernel.as_ref()
    }

    fn kernel_mut(&mut self) -> Result<&mut Kernel, EnvError> {
        if self.destroyed {
            return Err(EnvError::Destroyed);
        }
        self.kernel.as_mut().ok_or(EnvError::NotStarted)
    }

    fn report(&self, report: &ApplyReport) {
        let prefix = self.config.console.prefix.as_deref();
        for fault in &report.faults {
            logger::emit(LogLevel::Error, prefix, &fault.to_string());
        }
        for skipped in &report.skipped {
            tracing::warn!("skipped {} for {}: {}", skipped.kind, skipped.uuid, skipped.reason);
        }
    }
}

#[async_trait(?Send)]
impl ShadowEnv for LocalEnv {
    async fn start(&mut self) -> Result<(), EnvError> {
        if self.destroyed {
            return Err(EnvError::Destroyed);
        }
        if self.kernel.is_some() {
            return Err(EnvError::AlreadyStarted);
        }
        let mut registry = Registry::new();
        if let Some(setup) = self.setup.take() {
            setup(&mut registry).map_err(|err| EnvError::Setup(format!("{err:#}")))?;
        }
        self.kernel = Some(Kernel::new(registry));
        tracing::debug!("local shadow env started");
        Ok(())
    }

    async fn import_script(&mut self, url: &str) -> Result<(), EnvError> {
        self.kernel_mut()?;
        let (Some(kernel), Some(loader)) = (self.kernel.as_mut(), self.loader.as_mut()) else {
            return Err(EnvError::NotStarted);
        };
        loader
            .import(url, kernel.registry_mut())
            .map(|_| ())
            .map_err(|err| EnvError::ScriptImport {
                url: url.to_string(),
                message: err.to_string(),
            })
    }

    async fn apply_change_trail(
        &mut self,
        trail: ChangeTrail,
        _wait_for_confirmation: bool,
    ) -> Result<(), EnvError> {
        let kernel = self.kernel_mut()?;
        let report = kernel.apply_change_trail(trail);
        let messages = kernel.drain_messages_to_view();
        self.report(&report);
        match self.callback.as_mut() {
            Some(callback) => messages.into_iter().for_each(callback),
            None if !messages.is_empty() => {
                tracing::debug!("dropping {} view messages: no callback", messages.len());
            }
            None => {}
        }
        Ok(())
    }

    async fn destroy(&mut self) -> Result<(), EnvError> {
        self.destroyed = true;
        // Dropping the kernel tears every shadow object down.
        self.kernel = None;
        self.loader = None;
        Ok(())
    }

    fn on_message_to_view(&mut self, callback: MessageToViewCallback) {
        self.callback = Some(callback);
    }
}
