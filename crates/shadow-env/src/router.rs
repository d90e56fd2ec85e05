use shadow_kernel::{ApplyReport, Kernel, ScriptLoader};
use shadow_protocol::{Frame, LogLevel, WireMessage};
use tokio::sync::mpsc::UnboundedSender;

use crate::logger::ConsoleLogger;

/// Worker-side dispatch of inbound frames by their `type`.
pub struct MessageRouter {
    kernel: Kernel,
    loader: ScriptLoader,
    console: ConsoleLogger,
    outbound: UnboundedSender<Frame>,
}

impl MessageRouter {
    pub fn new(
        kernel: Kernel,
        loader: ScriptLoader,
        console: ConsoleLogger,
        outbound: UnboundedSender<Frame>,
    ) -> Self {
        Self {
            kernel,
            loader,
            console,
            outbound,
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn console(&self) -> &ConsoleLogger {
        &self.console
    }

    /// Announces the worker to the view.
    pub fn ready(&self) -> bool {
        self.send(WireMessage::Ready)
    }

    /// Handles one inbound frame. Returns `false` once the view end is gone.
    pub fn route(&mut self, frame: Frame) -> bool {
        let message = match WireMessage::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("dropping inbound message: {err}");
                return true;
            }
        };
        match message {
            WireMessage::ChangeTrail { id, confirm, trail } => {
                tracing::trace!(id, entries = trail.len(), "applying change trail");
                let report = self.kernel.apply_change_trail(trail);
                self.report(&report);
                if !self.forward_messages_to_view() {
                    return false;
                }
                !confirm || self.send(WireMessage::ChangeTrailAck { id })
            }
            WireMessage::ImportScript { id, url } => {
                let error = match self.loader.import(&url, self.kernel.registry_mut()) {
                    Ok(_) => None,
                    Err(err) => {
                        self.console.log(LogLevel::Error, err.to_string());
                        Some(err.to_string())
                    }
                };
                self.send(WireMessage::ImportScriptAck { id, error })
            }
            WireMessage::ConsoleLoggerConfig(config) => {
                self.console.configure(config);
                true
            }
            other => {
                tracing::warn!("worker ignores '{}' messages", other.kind());
                true
            }
        }
    }

    fn report(&self, report: &ApplyReport) {
        for fault in &report.faults {
            self.console.log(LogLevel::Error, fault.to_string());
        }
        for skipped in &report.skipped {
            self.console.log(
                LogLevel::Warn,
                format!("skipped {} for {}: {}", skipped.kind, skipped.uuid, skipped.reason),
            );
        }
        for missing in &report.missing_factories {
            tracing::debug!("no factory for '{}' on {}", missing.token, missing.uuid);
        }
    }

    fn forward_messages_to_view(&mut self) -> bool {
        for message in self.kernel.drain_messages_to_view() {
            if !self.send(WireMessage::MessageToView(message)) {
                return false;
            }
        }
        true
    }

    fn send(&self, message: WireMessage) -> bool {
        let kind = message.kind();
        match message.encode() {
            Ok(frame) => self.outbound.send(frame).is_ok(),
            Err(err) => {
                tracing::warn!("failed to encode '{kind}': {err}");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use shadow_kernel::{Registry, ScriptCatalog};
    use shadow_protocol::{ChangeTrailEntry, ConsoleLoggerConfig, PropValue, Uuid};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;

    fn router(registry: Registry, catalog: ScriptCatalog) -> (MessageRouter, UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let console = ConsoleLogger::new(ConsoleLoggerConfig::default(), tx.clone());
        let router = MessageRouter::new(Kernel::new(registry), ScriptLoader::new(catalog), console, tx);
        (router, rx)
    }

    fn received(rx: &mut UnboundedReceiver<Frame>) -> Vec<WireMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            messages.push(WireMessage::decode(frame).unwrap());
        }
        messages
    }

    fn frame(message: WireMessage) -> Frame {
        message.encode().unwrap()
    }

    #[test]
    fn acks_only_confirmed_trails_after_view_messages() {
        let mut registry = Registry::new();
        registry.define("echo", |cx| {
            let label = cx.use_property("label");
            let dispatcher = cx.dispatcher();
            cx.create_effect(move || {
                if let Some(value) = label.get() {
                    dispatcher.dispatch("echo", value);
                }
                Ok(())
            });
            Ok(None)
        });
        let (mut router, mut rx) = router(registry, ScriptCatalog::new());
        let uuid = Uuid::new_v4();
        let trail = vec![
            ChangeTrailEntry::CreateEntity {
                uuid,
                token: "echo".into(),
                parent: None,
                order: 0,
            },
            ChangeTrailEntry::SetProperty {
                uuid,
                name: "label".into(),
                value: PropValue::Buffer(vec![1, 2, 3]),
            },
        ];

        assert!(router.route(frame(WireMessage::ChangeTrail {
            id: 1,
            confirm: false,
            trail: trail[..1].to_vec().into(),
        })));
        assert!(received(&mut rx).is_empty());

        assert!(router.route(frame(WireMessage::ChangeTrail {
            id: 2,
            confirm: true,
            trail: trail[1..].to_vec().into(),
        })));
        let messages = received(&mut rx);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            WireMessage::MessageToView(message) => {
                assert_eq!(message.data, PropValue::Buffer(vec![1, 2, 3]));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(messages[1], WireMessage::ChangeTrailAck { id: 2 });
    }

    #[test]
    fn import_failures_are_acked_with_an_error() {
        let mut catalog = ScriptCatalog::new();
        catalog.register("ok.js", |registry| {
            registry.define("thing", |_| Ok(None));
            Ok(())
        });
        let (mut router, mut rx) = router(Registry::new(), catalog);

        router.route(frame(WireMessage::ImportScript {
            id: 1,
            url: "ok.js".into(),
        }));
        router.route(frame(WireMessage::ImportScript {
            id: 2,
            url: "missing.js".into(),
        }));

        assert!(router.kernel().registry().has_factory("thing"));
        let messages = received(&mut rx);
        assert_eq!(messages[0], WireMessage::ImportScriptAck { id: 1, error: None });
        assert!(matches!(
            &messages[1],
            WireMessage::ConsoleLog { level: LogLevel::Error, .. }
        ));
        match &messages[2] {
            WireMessage::ImportScriptAck { id: 2, error: Some(error) } => {
                assert!(error.contains("missing.js"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn console_config_and_unknown_messages_leave_kernel_alone() {
        let (mut router, mut rx) = router(Registry::new(), ScriptCatalog::new());

        assert!(router.route(frame(WireMessage::ConsoleLoggerConfig(ConsoleLoggerConfig {
            enabled: true,
            level: LogLevel::Trace,
            prefix: Some("[shadow]".into()),
        }))));
        assert!(router.route(Frame {
            data: r#"{"type":"reticulateSplines"}"#.into(),
            transfer: Vec::new(),
        }));
        assert!(router.route(Frame {
            data: "not json".into(),
            transfer: Vec::new(),
        }));
        assert!(router.route(frame(WireMessage::Ready)));

        assert_eq!(router.console().config().level, LogLevel::Trace);
        assert!(router.kernel().is_empty());
        assert!(received(&mut rx).is_empty());
    }
}
