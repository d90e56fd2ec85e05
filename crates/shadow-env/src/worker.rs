use std::thread::{self, JoinHandle};

use shadow_kernel::{Kernel, Registry, ScriptCatalog, ScriptLoader};
use shadow_protocol::{ConsoleLoggerConfig, Frame, LogLevel};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::env::RegistrySetup;
use crate::error::EnvError;
use crate::logger::ConsoleLogger;
use crate::router::MessageRouter;

/// View end of a worker link.
#[derive(Debug)]
pub struct WorkerLink {
    pub(crate) to_worker: UnboundedSender<Frame>,
    pub(crate) from_worker: UnboundedReceiver<Frame>,
}

/// Worker end of a worker link. Public so tests and embedders can drive
/// the protocol by hand.
#[derive(Debug)]
pub struct WorkerEnd {
    pub to_view: UnboundedSender<Frame>,
    pub from_view: UnboundedReceiver<Frame>,
}

/// Two FIFO channels joining a view-side env to a worker.
pub fn link_pair() -> (WorkerLink, WorkerEnd) {
    let (to_worker, from_view) = mpsc::unbounded_channel();
    let (to_view, from_worker) = mpsc::unbounded_channel();
    (
        WorkerLink {
            to_worker,
            from_worker,
        },
        WorkerEnd { to_view, from_view },
    )
}

/// Starts a kernel on a dedicated thread serving `end`.
///
/// The registry is built on that thread: `setup` runs first, and scripts are
/// resolved against `catalog` as `importScript` messages arrive. The thread
/// exits once the view end drops its sender.
pub fn spawn_worker(
    end: WorkerEnd,
    setup: Option<RegistrySetup>,
    catalog: ScriptCatalog,
    console: ConsoleLoggerConfig,
) -> Result<JoinHandle<()>, EnvError> {
    thread::Builder::new()
        .name("shadow-worker".into())
        .spawn(move || run_worker(end, setup, catalog, console))
        .map_err(|err| EnvError::Worker(err.to_string()))
}

fn run_worker(
    end: WorkerEnd,
    setup: Option<RegistrySetup>,
    catalog: ScriptCatalog,
    console: ConsoleLoggerConfig,
) {
    let WorkerEnd {
        to_view,
        mut from_view,
    } = end;
    let console = ConsoleLogger::new(console, to_view.clone());

    let mut registry = Registry::new();
    if let Some(setup) = setup {
        if let Err(err) = setup(&mut registry) {
            console.log(LogLevel::Error, format!("registry setup failed: {err:#}"));
        }
    }

    let mut router = MessageRouter::new(
        Kernel::new(registry),
        ScriptLoader::new(catalog),
        console,
        to_view,
    );
    if !router.ready() {
        tracing::debug!("view end closed before worker was ready");
        return;
    }
    tracing::debug!("shadow worker ready");

    while let Some(frame) = from_view.blocking_recv() {
        if !router.route(frame) {
            break;
        }
    }
    tracing::debug!(
        entities = router.kernel().len(),
        "shadow worker shutting down"
    );
}
