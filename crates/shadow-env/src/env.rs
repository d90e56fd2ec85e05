use async_trait::async_trait;
use shadow_kernel::Registry;
use shadow_protocol::{ChangeTrail, ViewMessage};

use crate::error::EnvError;

/// Receives messages shadow objects dispatch toward the view.
pub type MessageToViewCallback = Box<dyn FnMut(ViewMessage) + Send>;

/// Populates a fresh registry before the kernel is created. Runs on the
/// thread that will own the kernel.
pub type RegistrySetup = Box<dyn FnOnce(&mut Registry) -> anyhow::Result<()> + Send>;

/// The view side's handle on a shadow context, local or remote.
///
/// Trails are applied in the order they are passed in. `start` must complete
/// before anything else; after `destroy` every call fails with
/// [`EnvError::Destroyed`].
#[async_trait(?Send)]
pub trait ShadowEnv {
    async fn start(&mut self) -> Result<(), EnvError>;

    /// Makes the factories of the script at `url` available to the kernel.
    async fn import_script(&mut self, url: &str) -> Result<(), EnvError>;

    /// Hands `trail` to the kernel. With `wait_for_confirmation` the call
    /// resolves only once the kernel has applied it.
    async fn apply_change_trail(
        &mut self,
        trail: ChangeTrail,
        wait_for_confirmation: bool,
    ) -> Result<(), EnvError>;

    async fn destroy(&mut self) -> Result<(), EnvError>;

    fn on_message_to_view(&mut self, callback: MessageToViewCallback);
}
