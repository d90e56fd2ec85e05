use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use shadow_kernel::{Registry, ScriptCatalog};
use shadow_protocol::{ChangeTrail, ConsoleLoggerConfig, Frame, WireMessage};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::EnvConfig;
use crate::env::{MessageToViewCallback, RegistrySetup, ShadowEnv};
use crate::error::EnvError;
use crate::logger;
use crate::worker::{WorkerLink, link_pair, spawn_worker};

enum Reply {
    Done,
    Failed(String),
    Destroyed,
    Closed,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;
type SharedCallback = Arc<Mutex<Option<MessageToViewCallback>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Backend {
    Spawn {
        setup: Option<RegistrySetup>,
        catalog: ScriptCatalog,
    },
    Link(WorkerLink),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Destroyed,
}

/// Env whose kernel lives behind a worker link, by default on a dedicated
/// thread.
///
/// Everything crossing the link is an encoded [`WireMessage`]. Waits for
/// `ready` and for acks are bounded by the timeouts in [`EnvConfig`]; a wait
/// that times out is forgotten before the error is returned.
pub struct RemoteEnv {
    config: EnvConfig,
    backend: Option<Backend>,
    state: State,
    to_worker: Option<UnboundedSender<Frame>>,
    pending: Pending,
    /// Set by the reader once the worker side of the link is gone.
    closed: Arc<AtomicBool>,
    callback: SharedCallback,
    next_id: u64,
    reader: Option<JoinHandle<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl RemoteEnv {
    /// Env that spawns its own worker thread on `start`.
    pub fn new(config: EnvConfig, catalog: ScriptCatalog) -> Self {
        Self::with_backend(
            config,
            Backend::Spawn {
                setup: None,
                catalog,
            },
        )
    }

    /// Env talking over an existing link; the caller drives the worker end.
    pub fn with_link(config: EnvConfig, link: WorkerLink) -> Self {
        Self::with_backend(config, Backend::Link(link))
    }

    fn with_backend(config: EnvConfig, backend: Backend) -> Self {
        Self {
            config,
            backend: Some(backend),
            state: State::Idle,
            to_worker: None,
            pending: Arc::default(),
            closed: Arc::default(),
            callback: Arc::default(),
            next_id: 0,
            reader: None,
            worker: None,
        }
    }

    /// Runs `setup` on the worker thread before its kernel is created.
    pub fn with_setup<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut Registry) -> anyhow::Result<()> + Send + 'static,
    {
        let setup: RegistrySetup = Box::new(setup);
        match &mut self.backend {
            Some(Backend::Spawn { setup: slot, .. }) => *slot = Some(setup),
            _ => tracing::warn!("registry setup ignored: env does not spawn its worker"),
        }
        self
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Number of `ready`/ack waits currently outstanding.
    pub fn pending_waits(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Reconfigures console forwarding on the worker.
    pub fn set_console_config(&mut self, console: ConsoleLoggerConfig) -> Result<(), EnvError> {
        self.post(WireMessage::ConsoleLoggerConfig(console.clone()))?;
        self.config.console = console;
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), EnvError> {
        match self.state {
            State::Running if self.closed.load(Ordering::SeqCst) => Err(EnvError::ChannelClosed),
            State::Running => Ok(()),
            State::Idle => Err(EnvError::NotStarted),
            State::Destroyed => Err(EnvError::Destroyed),
        }
    }

    fn post(&self, message: WireMessage) -> Result<(), EnvError> {
        self.ensure_running()?;
        let frame = message.encode()?;
        self.to_worker
            .as_ref()
            .ok_or(EnvError::ChannelClosed)?
            .send(frame)
            .map_err(|_| EnvError::ChannelClosed)
    }

    fn register_wait(&mut self) -> (u64, oneshot::Receiver<Reply>) {
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(self.next_id, tx);
        (self.next_id, rx)
    }

    fn forget_wait(&self, id: u64) {
        lock(&self.pending).remove(&id);
    }

    /// Posts `message` and waits for the reply registered under `id`.
    async fn request(
        &self,
        id: u64,
        reply: oneshot::Receiver<Reply>,
        message: WireMessage,
        operation: &'static str,
        after: Duration,
    ) -> Result<Option<String>, EnvError> {
        if let Err(err) = self.post(message) {
            self.forget_wait(id);
            return Err(err);
        }
        // The reader flags the link before failing the waits it holds, so a
        // wait registered after that drain is caught here.
        if self.closed.load(Ordering::SeqCst) {
            self.forget_wait(id);
            return Err(EnvError::ChannelClosed);
        }
        match timeout(after, reply).await {
            Ok(Ok(Reply::Done)) => Ok(None),
            Ok(Ok(Reply::Failed(message))) => Ok(Some(message)),
            Ok(Ok(Reply::Destroyed)) => Err(EnvError::Destroyed),
            Ok(Ok(Reply::Closed)) | Ok(Err(_)) => Err(EnvError::ChannelClosed),
            Err(_) => {
                self.forget_wait(id);
                tracing::warn!("{operation} timed out after {after:?}");
                Err(EnvError::Timeout { operation, after })
            }
        }
    }

    /// Tears the link down. Pending waits fail with [`EnvError::Destroyed`].
    fn shut_down(&mut self) -> Option<thread::JoinHandle<()>> {
        self.state = State::Destroyed;
        self.to_worker = None;
        for (_, reply) in lock(&self.pending).drain() {
            let _ = reply.send(Reply::Destroyed);
        }
        self.worker.take()
    }
}

#[async_trait(?Send)]
impl ShadowEnv for RemoteEnv {
    async fn start(&mut self) -> Result<(), EnvError> {
        match self.state {
            State::Running => return Err(EnvError::AlreadyStarted),
            State::Destroyed => return Err(EnvError::Destroyed),
            State::Idle => {}
        }
        let link = match self.backend.take() {
            Some(Backend::Link(link)) => link,
            Some(Backend::Spawn { setup, catalog }) => {
                let (link, end) = link_pair();
                self.worker = Some(spawn_worker(
                    end,
                    setup,
                    catalog,
                    self.config.console.clone(),
                )?);
                link
            }
            None => return Err(EnvError::AlreadyStarted),
        };

        let WorkerLink {
            to_worker,
            from_worker,
        } = link;
        let (ready_tx, ready_rx) = oneshot::channel();
        self.reader = Some(tokio::spawn(read_loop(
            from_worker,
            self.pending.clone(),
            self.closed.clone(),
            self.callback.clone(),
            ready_tx,
            self.config.console.prefix.clone(),
        )));
        self.to_worker = Some(to_worker);

        let after = self.config.ready_timeout;
        match timeout(after, ready_rx).await {
            Ok(Ok(())) => {
                self.state = State::Running;
                tracing::debug!("remote shadow env ready");
                Ok(())
            }
            Ok(Err(_)) => {
                self.shut_down();
                Err(EnvError::ChannelClosed)
            }
            Err(_) => {
                self.shut_down();
                if let Some(reader) = self.reader.take() {
                    reader.abort();
                }
                Err(EnvError::Timeout {
                    operation: "start",
                    after,
                })
            }
        }
    }

    async fn import_script(&mut self, url: &str) -> Result<(), EnvError> {
        self.ensure_running()?;
        let (id, reply) = self.register_wait();
        let message = WireMessage::ImportScript {
            id,
            url: url.to_string(),
        };
        match self
            .request(id, reply, message, "import_script", self.config.import_timeout)
            .await?
        {
            None => Ok(()),
            Some(message) => Err(EnvError::ScriptImport {
                url: url.to_string(),
                message,
            }),
        }
    }

    async fn apply_change_trail(
        &mut self,
        trail: ChangeTrail,
        wait_for_confirmation: bool,
    ) -> Result<(), EnvError> {
        self.ensure_running()?;
        let confirm = wait_for_confirmation
            || (self.config.confirm_structural_changes && trail.has_structural_changes());
        if !confirm {
            self.next_id += 1;
            return self.post(WireMessage::ChangeTrail {
                id: self.next_id,
                confirm,
                trail,
            });
        }
        let (id, reply) = self.register_wait();
        let message = WireMessage::ChangeTrail {
            id,
            confirm,
            trail,
        };
        self.request(id, reply, message, "apply_change_trail", self.config.ack_timeout)
            .await
            .map(|_| ())
    }

    async fn destroy(&mut self) -> Result<(), EnvError> {
        if self.state == State::Destroyed {
            return Ok(());
        }
        let worker = self.shut_down();
        let reader = self.reader.take();
        let Some(worker) = worker else {
            if let Some(reader) = reader {
                reader.abort();
            }
            return Ok(());
        };
        let joined = tokio::task::spawn_blocking(move || worker.join())
            .await
            .map_err(|err| EnvError::Worker(err.to_string()))?;
        if joined.is_err() {
            return Err(EnvError::Worker("worker thread panicked".into()));
        }
        // The worker dropped its sender; the reader drains what is left.
        if let Some(reader) = reader {
            let _ = reader.await;
        }
        tracing::debug!("remote shadow env destroyed");
        Ok(())
    }

    fn on_message_to_view(&mut self, callback: MessageToViewCallback) {
        *lock(&self.callback) = Some(callback);
    }
}

impl Drop for RemoteEnv {
    fn drop(&mut self) {
        if self.state != State::Destroyed {
            // The worker thread exits on its own once the sender is gone.
            self.shut_down();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// View-side mirror of the worker's router.
async fn read_loop(
    mut from_worker: UnboundedReceiver<Frame>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    callback: SharedCallback,
    ready: oneshot::Sender<()>,
    prefix: Option<String>,
) {
    let mut ready = Some(ready);
    while let Some(frame) = from_worker.recv().await {
        let message = match WireMessage::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("dropping message from worker: {err}");
                continue;
            }
        };
        match message {
            WireMessage::Ready => match ready.take() {
                Some(ready) => {
                    let _ = ready.send(());
                }
                None => tracing::debug!("duplicate ready from worker"),
            },
            WireMessage::ChangeTrailAck { id } => resolve(&pending, id, Reply::Done),
            WireMessage::ImportScriptAck { id, error } => {
                let reply = match error {
                    None => Reply::Done,
                    Some(message) => Reply::Failed(message),
                };
                resolve(&pending, id, reply);
            }
            WireMessage::MessageToView(message) => match lock(&callback).as_mut() {
                Some(callback) => callback(message),
                None => tracing::debug!(
                    "no view callback for '{}' on {}",
                    message.message_type,
                    message.uuid
                ),
            },
            WireMessage::ConsoleLog { level, message } => {
                logger::emit(level, prefix.as_deref(), &message)
            }
            other => tracing::warn!("view ignores '{}' messages", other.kind()),
        }
    }
    closed.store(true, Ordering::SeqCst);
    let waits: Vec<_> = lock(&pending).drain().map(|(_, waiter)| waiter).collect();
    if !waits.is_empty() {
        tracing::warn!("worker link closed with {} waits outstanding", waits.len());
    }
    for waiter in waits {
        let _ = waiter.send(Reply::Closed);
    }
    tracing::debug!("worker link closed");
}

fn resolve(pending: &Pending, id: u64, reply: Reply) {
    match lock(pending).remove(&id) {
        Some(waiter) => {
            let _ = waiter.send(reply);
        }
        None => tracing::debug!("reply for unknown or expired wait {id}"),
    }
}
