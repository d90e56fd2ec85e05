//! Shadow side of the mirror: the registry of shadow object factories and the
//! kernel that applies change trails to the mirrored entity tree.

pub mod config;
pub mod error;
pub mod kernel;
pub mod registry;
pub mod scripts;
pub mod shadow;

pub use config::RegistryConfig;
pub use error::KernelError;
pub use kernel::{ApplyReport, Kernel, MissingFactory, SkippedEntry};
pub use registry::{Factory, Registry};
pub use scripts::{ScriptCatalog, ScriptInstaller, ScriptLoader};
pub use shadow::{
    EntityFault, EntityInfo, FaultStage, ShadowCx, ShadowEvent, ShadowObject, Teardown,
    ViewDispatcher,
};
