//! Transport between the view world and a shadow kernel.
//!
//! [`LocalEnv`] runs the kernel in the caller's thread. [`RemoteEnv`] runs it
//! on a worker thread and talks to it through encoded [`WireMessage`]s over
//! a pair of FIFO channels; [`MessageRouter`] is the worker's dispatcher.
//!
//! [`WireMessage`]: shadow_protocol::WireMessage

pub mod config;
pub mod env;
pub mod error;
pub mod local;
pub mod logger;
pub mod remote;
pub mod router;
pub mod worker;

pub use config::EnvConfig;
pub use env::{MessageToViewCallback, RegistrySetup, ShadowEnv};
pub use error::EnvError;
pub use local::LocalEnv;
pub use logger::ConsoleLogger;
pub use remote::RemoteEnv;
pub use router::MessageRouter;
pub use worker::{WorkerEnd, WorkerLink, link_pair, spawn_worker};
