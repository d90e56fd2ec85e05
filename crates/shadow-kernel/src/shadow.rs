//! The capability object handed to factories and the shadow objects they
//! produce.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use shadow_protocol::{PropValue, Token, Uuid, ViewMessage};
use shadow_signals::{Effect, Reader, Signal, SignalStore};

pub type Teardown = Box<dyn FnOnce()>;

pub(crate) type PropertyStore = SignalStore<Option<PropValue>>;
pub(crate) type ContextStore = SignalStore<Option<Value>>;
pub(crate) type Outbox = Rc<RefCell<VecDeque<ViewMessage>>>;

/// Where a shadow object failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStage {
    Factory,
    Effect,
    Event,
    Teardown,
}

impl fmt::Display for FaultStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultStage::Factory => "factory",
            FaultStage::Effect => "effect",
            FaultStage::Event => "event handler",
            FaultStage::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// A failure isolated to one shadow object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFault {
    pub uuid: Uuid,
    pub token: Token,
    pub stage: FaultStage,
    pub message: String,
}

impl fmt::Display for EntityFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of '{}' on {} failed: {}",
            self.stage, self.token, self.uuid, self.message
        )
    }
}

#[derive(Clone, Default)]
pub(crate) struct FaultSink {
    faults: Rc<RefCell<Vec<EntityFault>>>,
}

impl FaultSink {
    pub(crate) fn record(&self, uuid: Uuid, token: &str, stage: FaultStage, message: String) {
        let fault = EntityFault {
            uuid,
            token: token.to_string(),
            stage,
            message,
        };
        log::warn!("{fault}");
        self.faults.borrow_mut().push(fault);
    }

    pub(crate) fn drain(&self) -> Vec<EntityFault> {
        self.faults.borrow_mut().drain(..).collect()
    }
}

/// Runs user code, turning both returned errors and panics into a message.
pub(crate) fn isolate<R>(f: impl FnOnce() -> anyhow::Result<R>) -> Result<R, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// Event delivered to shadow objects by a `sendEvent` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowEvent {
    pub event_type: String,
    pub data: Value,
}

type EventCallback = Box<dyn FnMut(&ShadowEvent) -> anyhow::Result<()>>;

pub(crate) struct EventHandler {
    event_type: String,
    callback: EventCallback,
}

/// Metadata of the entity a shadow object is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInfo {
    pub uuid: Uuid,
    /// Token the view component was created with.
    pub token: Token,
    /// Token this particular shadow object was resolved for.
    pub object_token: Token,
    pub parent: Option<Uuid>,
}

/// Sends messages from a shadow object back to its view component. Cheap to
/// clone into effects and event handlers.
#[derive(Clone)]
pub struct ViewDispatcher {
    uuid: Uuid,
    outbox: Outbox,
}

impl ViewDispatcher {
    pub fn dispatch(&self, message_type: impl Into<String>, data: impl Into<PropValue>) {
        self.outbox.borrow_mut().push_back(ViewMessage {
            uuid: self.uuid,
            message_type: message_type.into(),
            data: data.into(),
        });
    }
}

impl fmt::Debug for ViewDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewDispatcher").field("uuid", &self.uuid).finish()
    }
}

/// Capability object passed to a [`Factory`](crate::Factory).
///
/// Everything registered through it (effects, event handlers) belongs to the
/// shadow object being built and is dropped with it.
pub struct ShadowCx<'a> {
    pub(crate) info: EntityInfo,
    pub(crate) properties: &'a Rc<PropertyStore>,
    pub(crate) provided: &'a Rc<ContextStore>,
    pub(crate) context: &'a Rc<ContextStore>,
    pub(crate) context_links: &'a mut HashMap<String, Effect>,
    pub(crate) ancestors: &'a [Rc<ContextStore>],
    pub(crate) outbox: Outbox,
    pub(crate) faults: FaultSink,
    pub(crate) effects: Vec<Effect>,
    pub(crate) handlers: Vec<EventHandler>,
}

impl ShadowCx<'_> {
    pub fn entity(&self) -> &EntityInfo {
        &self.info
    }

    /// Reader of the property cell `name`; effects reading it re-run on every
    /// `setProperty` for this entity.
    pub fn use_property(&mut self, name: &str) -> Reader<Option<PropValue>> {
        self.properties.signal(name).reader()
    }

    /// Reader of the nearest ancestor's provided value for `name`. Follows
    /// the entity when it is moved to another parent.
    pub fn use_context(&mut self, name: &str) -> Reader<Option<Value>> {
        if !self.context_links.contains_key(name) {
            let link = context_link(name, self.ancestors.to_vec(), self.context.signal(name));
            self.context_links.insert(name.to_string(), link);
        }
        self.context.signal(name).reader()
    }

    /// Publishes `value` under `name` to every descendant. The returned cell
    /// updates descendants when written.
    pub fn provide_context(&mut self, name: &str, value: Value) -> Signal<Option<Value>> {
        let cell = self.provided.signal(name);
        cell.set(Some(value));
        cell
    }

    /// Registers a reactive effect. Errors and panics are reported as faults
    /// of this shadow object and do not stop the effect from running again.
    pub fn create_effect<F>(&mut self, mut f: F)
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        let faults = self.faults.clone();
        let uuid = self.info.uuid;
        let token = self.info.object_token.clone();
        let effect = Effect::new(move || {
            if let Err(message) = isolate(&mut f) {
                faults.record(uuid, &token, FaultStage::Effect, message);
            }
        });
        self.effects.push(effect);
    }

    pub fn on_event<F>(&mut self, event_type: impl Into<String>, callback: F)
    where
        F: FnMut(&ShadowEvent) -> anyhow::Result<()> + 'static,
    {
        self.handlers.push(EventHandler {
            event_type: event_type.into(),
            callback: Box::new(callback),
        });
    }

    pub fn dispatcher(&self) -> ViewDispatcher {
        ViewDispatcher {
            uuid: self.info.uuid,
            outbox: self.outbox.clone(),
        }
    }

    pub fn dispatch_message_to_view(
        &self,
        message_type: impl Into<String>,
        data: impl Into<PropValue>,
    ) {
        self.dispatcher().dispatch(message_type, data);
    }
}

/// Keeps `target` equal to the first value provided under `name` along
/// `ancestors` (nearest first).
pub(crate) fn context_link(
    name: &str,
    ancestors: Vec<Rc<ContextStore>>,
    target: Signal<Option<Value>>,
) -> Effect {
    let name = name.to_string();
    Effect::new(move || {
        let resolved = ancestors
            .iter()
            .find_map(|store| store.signal(&name).get());
        target.set(resolved);
    })
}

/// One instantiated factory result living on an entity.
pub struct ShadowObject {
    token: Token,
    effects: Vec<Effect>,
    handlers: Vec<EventHandler>,
    teardown: Option<Teardown>,
}

impl ShadowObject {
    pub(crate) fn new(
        token: Token,
        effects: Vec<Effect>,
        handlers: Vec<EventHandler>,
        teardown: Option<Teardown>,
    ) -> Self {
        Self {
            token,
            effects,
            handlers,
            teardown,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn handle_event(&mut self, uuid: Uuid, event: &ShadowEvent, faults: &FaultSink) {
        for handler in &mut self.handlers {
            if handler.event_type != event.event_type {
                continue;
            }
            if let Err(message) = isolate(|| (handler.callback)(event)) {
                faults.record(uuid, &self.token, FaultStage::Event, message);
            }
        }
    }

    /// Runs the teardown, then drops effects and handlers.
    pub(crate) fn destroy(mut self, uuid: Uuid, faults: &FaultSink) {
        if let Some(teardown) = self.teardown.take() {
            if let Err(message) = isolate(|| {
                teardown();
                Ok(())
            }) {
                faults.record(uuid, &self.token, FaultStage::Teardown, message);
            }
        }
        for effect in self.effects.drain(..) {
            effect.stop();
        }
        self.handlers.clear();
    }
}

impl fmt::Debug for ShadowObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowObject")
            .field("token", &self.token)
            .field("effects", &self.effects.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
