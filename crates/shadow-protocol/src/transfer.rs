use crate::error::ProtocolError;
use crate::trail::PropValue;

/// What actually crosses the worker channel: the JSON text of one message
/// plus the binary buffers that were moved out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: String,
    pub transfer: Vec<Vec<u8>>,
}

/// Collects buffers detached from outgoing values.
#[derive(Debug, Default)]
pub struct TransferList {
    buffers: Vec<Vec<u8>>,
}

impl TransferList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves a buffer out of `value`, leaving a slot reference behind.
    pub fn detach(&mut self, value: &mut PropValue) {
        if !value.is_transferable() {
            return;
        }
        let index = self.buffers.len();
        if let PropValue::Buffer(bytes) = std::mem::replace(value, PropValue::Transfer(index)) {
            self.buffers.push(bytes);
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn into_buffers(self) -> Vec<Vec<u8>> {
        self.buffers
    }
}

/// Buffers received with a frame, waiting to be claimed by slot references.
#[derive(Debug)]
pub struct TransferSlots {
    slots: Vec<Option<Vec<u8>>>,
}

impl TransferSlots {
    pub fn new(buffers: Vec<Vec<u8>>) -> Self {
        Self {
            slots: buffers.into_iter().map(Some).collect(),
        }
    }

    /// Replaces a slot reference in `value` with the buffer it points to.
    /// Each slot can be claimed once.
    pub fn attach(&mut self, value: &mut PropValue) -> Result<(), ProtocolError> {
        if let PropValue::Transfer(index) = *value {
            let bytes = self
                .slots
                .get_mut(index)
                .and_then(Option::take)
                .ok_or(ProtocolError::MissingTransfer(index))?;
            *value = PropValue::Buffer(bytes);
        }
        Ok(())
    }

    /// Number of buffers nobody claimed.
    pub fn unclaimed(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
