//! Shared vocabulary between the view world and the shadow world: change
//! trail entries, property payloads, and the tagged wire messages exchanged
//! with a worker, including out-of-band transfer of binary buffers.

mod error;
mod message;
mod trail;
mod transfer;

pub use error::ProtocolError;
pub use message::{ConsoleLoggerConfig, LogLevel, MessageKind, ViewMessage, WireMessage};
pub use trail::{ChangeTrail, ChangeTrailEntry, PropValue, Token};
pub use transfer::{Frame, TransferList, TransferSlots};
pub use uuid::Uuid;
