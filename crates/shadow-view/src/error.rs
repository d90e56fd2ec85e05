use shadow_protocol::Uuid;
use thiserror::Error;

/// A tree mutation that was rejected before anything was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralViolation {
    #[error("unknown component {0}")]
    UnknownComponent(Uuid),
    #[error("unknown parent {0}")]
    UnknownParent(Uuid),
    #[error("component {0} cannot be its own parent")]
    SelfParent(Uuid),
    #[error("moving {uuid} under {parent} would create a cycle")]
    Cycle { uuid: Uuid, parent: Uuid },
}
