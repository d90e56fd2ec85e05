use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::trail::{ChangeTrail, ChangeTrailEntry, PropValue};
use crate::transfer::{Frame, TransferList, TransferSlots};

/// Message sent from a shadow object toward its view component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewMessage {
    pub uuid: Uuid,
    #[serde(rename = "messageType")]
    pub message_type: String,
    #[serde(default)]
    pub data: PropValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Controls which shadow-side log records are forwarded to the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLoggerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_level")]
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

impl Default for ConsoleLoggerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
            prefix: None,
        }
    }
}

impl ConsoleLoggerConfig {
    pub fn allows(&self, level: LogLevel) -> bool {
        self.enabled && level <= self.level
    }
}

/// Value of the `type` field of every wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ready,
    ChangeTrail,
    ChangeTrailAck,
    ImportScript,
    ImportScriptAck,
    ConsoleLoggerConfig,
    MessageToView,
    ConsoleLog,
}

impl MessageKind {
    pub const ALL: [MessageKind; 8] = [
        MessageKind::Ready,
        MessageKind::ChangeTrail,
        MessageKind::ChangeTrailAck,
        MessageKind::ImportScript,
        MessageKind::ImportScriptAck,
        MessageKind::ConsoleLoggerConfig,
        MessageKind::MessageToView,
        MessageKind::ConsoleLog,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Ready => "ready",
            MessageKind::ChangeTrail => "changeTrail",
            MessageKind::ChangeTrailAck => "changeTrailAck",
            MessageKind::ImportScript => "importScript",
            MessageKind::ImportScriptAck => "importScriptAck",
            MessageKind::ConsoleLoggerConfig => "consoleLoggerConfig",
            MessageKind::MessageToView => "messageToView",
            MessageKind::ConsoleLog => "consoleLog",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every message exchanged between a view-side env and its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    /// Worker finished booting.
    Ready,
    ChangeTrail {
        id: u64,
        #[serde(default)]
        confirm: bool,
        trail: ChangeTrail,
    },
    ChangeTrailAck {
        id: u64,
    },
    ImportScript {
        id: u64,
        url: String,
    },
    ImportScriptAck {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ConsoleLoggerConfig(ConsoleLoggerConfig),
    MessageToView(ViewMessage),
    ConsoleLog {
        level: LogLevel,
        message: String,
    },
}

impl WireMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            WireMessage::Ready => MessageKind::Ready,
            WireMessage::ChangeTrail { .. } => MessageKind::ChangeTrail,
            WireMessage::ChangeTrailAck { .. } => MessageKind::ChangeTrailAck,
            WireMessage::ImportScript { .. } => MessageKind::ImportScript,
            WireMessage::ImportScriptAck { .. } => MessageKind::ImportScriptAck,
            WireMessage::ConsoleLoggerConfig(_) => MessageKind::ConsoleLoggerConfig,
            WireMessage::MessageToView(_) => MessageKind::MessageToView,
            WireMessage::ConsoleLog { .. } => MessageKind::ConsoleLog,
        }
    }

    /// Moves binary buffers out into the frame's transfer list and
    /// serializes the rest as JSON.
    pub fn encode(mut self) -> Result<Frame, ProtocolError> {
        let mut transfer = TransferList::new();
        self.for_each_value(|value| transfer.detach(value));
        let data = serde_json::to_string(&self)?;
        Ok(Frame {
            data,
            transfer: transfer.into_buffers(),
        })
    }

    /// Reads the `type` discriminator first so unknown message types are
    /// reported as such instead of as a generic decode failure.
    pub fn decode(frame: Frame) -> Result<WireMessage, ProtocolError> {
        let Frame { data, transfer } = frame;
        let value: Value = serde_json::from_str(&data)?;
        let name = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        if MessageKind::parse(name).is_none() {
            return Err(ProtocolError::UnknownType(name.to_string()));
        }
        let mut message: WireMessage = serde_json::from_value(value)?;
        let mut slots = TransferSlots::new(transfer);
        let mut result = Ok(());
        message.for_each_value(|value| {
            if result.is_ok() {
                result = slots.attach(value);
            }
        });
        result.map(|()| message)
    }

    fn for_each_value(&mut self, mut f: impl FnMut(&mut PropValue)) {
        match self {
            WireMessage::ChangeTrail { trail, .. } => {
                for entry in trail.entries_mut() {
                    if let ChangeTrailEntry::SetProperty { value, .. } = entry {
                        f(value);
                    }
                }
            }
            WireMessage::MessageToView(message) => f(&mut message.data),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn change_trail_frame_carries_buffers_out_of_band() {
        let uuid = Uuid::new_v4();
        let trail: ChangeTrail = vec![
            ChangeTrailEntry::CreateEntity {
                uuid,
                token: "canvas".into(),
                parent: None,
                order: 0,
            },
            ChangeTrailEntry::SetProperty {
                uuid,
                name: "pixels".into(),
                value: PropValue::Buffer(vec![0xde, 0xad]),
            },
        ]
        .into();
        let message = WireMessage::ChangeTrail {
            id: 7,
            confirm: true,
            trail,
        };

        let frame = message.clone().encode().unwrap();
        assert_eq!(frame.transfer, vec![vec![0xde, 0xad]]);
        let json: Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(json["type"], "changeTrail");
        assert_eq!(json["trail"][1]["value"], json!({"transfer": 0}));

        assert_eq!(WireMessage::decode(frame).unwrap(), message);
    }

    #[test]
    fn unknown_type_is_distinguished() {
        let frame = Frame {
            data: r#"{"type":"teleport","to":"mars"}"#.into(),
            transfer: vec![],
        };
        assert!(matches!(
            WireMessage::decode(frame),
            Err(ProtocolError::UnknownType(name)) if name == "teleport"
        ));

        let frame = Frame {
            data: r#"{"id":1}"#.into(),
            transfer: vec![],
        };
        assert!(matches!(
            WireMessage::decode(frame),
            Err(ProtocolError::MissingType)
        ));
    }

    #[test]
    fn missing_transfer_slot_fails_decode() {
        let uuid = Uuid::new_v4();
        let frame = Frame {
            data: json!({
                "type": "messageToView",
                "uuid": uuid,
                "messageType": "frame",
                "data": {"transfer": 0}
            })
            .to_string(),
            transfer: vec![],
        };
        assert!(matches!(
            WireMessage::decode(frame),
            Err(ProtocolError::MissingTransfer(0))
        ));
    }

    #[test]
    fn logger_config_defaults() {
        let message: WireMessage = serde_json::from_str(r#"{"type":"consoleLoggerConfig"}"#).unwrap();
        let WireMessage::ConsoleLoggerConfig(config) = message else {
            panic!("expected logger config");
        };
        assert!(config.enabled);
        assert!(config.allows(LogLevel::Warn));
        assert!(!config.allows(LogLevel::Debug));
    }

    #[test]
    fn every_kind_round_trips_its_name() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
    }
}
