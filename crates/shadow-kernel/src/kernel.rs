use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use shadow_protocol::{ChangeTrail, ChangeTrailEntry, PropValue, Token, Uuid, ViewMessage};
use shadow_signals::Effect;

use crate::registry::Registry;
use crate::shadow::{
    ContextStore, EntityFault, EntityInfo, FaultSink, FaultStage, Outbox, PropertyStore,
    ShadowCx, ShadowEvent, ShadowObject, context_link, isolate,
};

/// Entry of a trail that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub uuid: Uuid,
    pub kind: &'static str,
    pub reason: String,
}

/// Token resolved for an entity that had no registered factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingFactory {
    pub uuid: Uuid,
    pub token: Token,
}

/// Outcome of [`Kernel::apply_change_trail`]. Nothing in here aborts a trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub applied: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_factories: Vec<MissingFactory>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<EntityFault>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.faults.is_empty()
    }
}

struct Entity {
    token: Token,
    parent: Option<Uuid>,
    order: u32,
    children: Vec<Uuid>,
    properties: Rc<PropertyStore>,
    /// Values this entity provides to its descendants.
    provided: Rc<ContextStore>,
    /// Values this entity inherits, kept current by `context_links`.
    context: Rc<ContextStore>,
    context_links: HashMap<String, Effect>,
    objects: Vec<ShadowObject>,
}

impl Entity {
    fn new(token: Token, parent: Option<Uuid>, order: u32) -> Self {
        Self {
            token,
            parent,
            order,
            children: Vec::new(),
            properties: Rc::new(PropertyStore::new()),
            provided: Rc::new(ContextStore::new()),
            context: Rc::new(ContextStore::new()),
            context_links: HashMap::new(),
            objects: Vec::new(),
        }
    }
}

/// Shadow-side owner of the mirrored entity tree.
///
/// The kernel is mutated only by [`Kernel::apply_change_trail`]; messages the
/// shadow objects send toward the view are queued until the host drains them
/// with [`Kernel::drain_messages_to_view`].
pub struct Kernel {
    registry: Registry,
    entities: HashMap<Uuid, Entity>,
    roots: Vec<Uuid>,
    outbox: Outbox,
    faults: FaultSink,
}

impl Kernel {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            entities: HashMap::new(),
            roots: Vec::new(),
            outbox: Rc::new(RefCell::new(VecDeque::new())),
            faults: FaultSink::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Applies `trail` strictly in order. Failures are contained per entry
    /// and per shadow object and reported, never raised.
    pub fn apply_change_trail(&mut self, trail: ChangeTrail) -> ApplyReport {
        let mut report = ApplyReport::default();
        for entry in trail {
            self.apply_entry(entry, &mut report);
        }
        report.faults.extend(self.faults.drain());
        report
    }

    fn apply_entry(&mut self, entry: ChangeTrailEntry, report: &mut ApplyReport) {
        let uuid = entry.uuid();
        let kind = entry.kind();
        let outcome = match entry {
            ChangeTrailEntry::CreateEntity {
                uuid,
                token,
                parent,
                order,
            } => self.create_entity(uuid, token, parent, order, report),
            ChangeTrailEntry::DestroyEntity { uuid } => self.destroy_entity(uuid),
            ChangeTrailEntry::ChangeParent {
                uuid,
                parent,
                order,
            } => self.change_parent(uuid, parent, order),
            ChangeTrailEntry::SetProperty { uuid, name, value } => {
                self.set_property(uuid, &name, value)
            }
            ChangeTrailEntry::SendEvent {
                uuid,
                event_type,
                data,
            } => self.send_event(uuid, event_type, data),
        };
        match outcome {
            Ok(()) => report.applied += 1,
            Err(reason) => {
                log::warn!("skipped {kind} for {uuid}: {reason}");
                report.skipped.push(SkippedEntry { uuid, kind, reason });
            }
        }
    }

    fn create_entity(
        &mut self,
        uuid: Uuid,
        token: Token,
        parent: Option<Uuid>,
        order: u32,
        report: &mut ApplyReport,
    ) -> Result<(), String> {
        if self.entities.contains_key(&uuid) {
            return Err("entity already exists".into());
        }
        let parent = match parent {
            Some(parent) if !self.entities.contains_key(&parent) => {
                log::warn!("parent {parent} of {uuid} is unknown; attaching as root");
                None
            }
            parent => parent,
        };

        self.entities
            .insert(uuid, Entity::new(token.clone(), parent, order));
        self.link(uuid, parent, order);

        let resolved: Vec<(Token, _)> = self
            .registry
            .find_tokens_by_route(&token)
            .into_iter()
            .map(|object_token| {
                let factory = self.registry.factory(&object_token);
                (object_token, factory)
            })
            .collect();
        let ancestors = self.ancestor_contexts(uuid);

        for (object_token, factory) in resolved {
            let Some(factory) = factory else {
                log::debug!("no factory for '{object_token}' on {uuid}");
                report.missing_factories.push(MissingFactory {
                    uuid,
                    token: object_token,
                });
                continue;
            };
            let Some(entity) = self.entities.get_mut(&uuid) else {
                break;
            };
            let mut cx = ShadowCx {
                info: EntityInfo {
                    uuid,
                    token: token.clone(),
                    object_token: object_token.clone(),
                    parent,
                },
                properties: &entity.properties,
                provided: &entity.provided,
                context: &entity.context,
                context_links: &mut entity.context_links,
                ancestors: &ancestors,
                outbox: self.outbox.clone(),
                faults: self.faults.clone(),
                effects: Vec::new(),
                handlers: Vec::new(),
            };
            match isolate(|| factory(&mut cx)) {
                Ok(teardown) => {
                    let ShadowCx {
                        effects, handlers, ..
                    } = cx;
                    entity
                        .objects
                        .push(ShadowObject::new(object_token, effects, handlers, teardown));
                }
                Err(message) => {
                    drop(cx);
                    self.faults
                        .record(uuid, &object_token, FaultStage::Factory, message);
                }
            }
        }
        Ok(())
    }

    fn destroy_entity(&mut self, uuid: Uuid) -> Result<(), String> {
        let Some(children) = self.entities.get(&uuid).map(|entity| entity.children.clone()) else {
            return Err("unknown entity".into());
        };
        // The view destroys children first; anything still attached here is
        // torn down before its parent all the same.
        for child in children {
            let _ = self.destroy_entity(child);
        }
        self.unlink(uuid);
        let Some(mut entity) = self.entities.remove(&uuid) else {
            return Ok(());
        };
        while let Some(object) = entity.objects.pop() {
            object.destroy(uuid, &self.faults);
        }
        entity.context_links.clear();
        entity.properties.destroy();
        entity.provided.destroy();
        entity.context.destroy();
        Ok(())
    }

    fn change_parent(&mut self, uuid: Uuid, parent: Option<Uuid>, order: u32) -> Result<(), String> {
        if !self.entities.contains_key(&uuid) {
            return Err("unknown entity".into());
        }
        if let Some(parent) = parent {
            if !self.entities.contains_key(&parent) {
                return Err(format!("unknown parent {parent}"));
            }
            if parent == uuid || self.is_ancestor(uuid, parent) {
                return Err(format!("moving under {parent} would create a cycle"));
            }
        }
        let reparented = self.entities.get(&uuid).map(|entity| entity.parent) != Some(parent);
        self.unlink(uuid);
        self.link(uuid, parent, order);
        if reparented {
            self.rebind_context(uuid);
        }
        Ok(())
    }

    fn set_property(&mut self, uuid: Uuid, name: &str, value: PropValue) -> Result<(), String> {
        let Some(entity) = self.entities.get(&uuid) else {
            return Err("unknown entity".into());
        };
        // Effects run synchronously inside `set`; keep the store alive even
        // if one of them manages to drop the entity's last handle.
        let properties = entity.properties.clone();
        properties.set(name, Some(value));
        Ok(())
    }

    fn send_event(&mut self, uuid: Uuid, event_type: String, data: Value) -> Result<(), String> {
        let Some(entity) = self.entities.get_mut(&uuid) else {
            return Err("unknown entity".into());
        };
        let event = ShadowEvent { event_type, data };
        for object in &mut entity.objects {
            object.handle_event(uuid, &event, &self.faults);
        }
        Ok(())
    }

    /// Destroys every entity, children before parents.
    pub fn clear(&mut self) {
        for root in std::mem::take(&mut self.roots) {
            let _ = self.destroy_entity(root);
        }
        let leftovers: Vec<Uuid> = self.entities.keys().copied().collect();
        for uuid in leftovers {
            let _ = self.destroy_entity(uuid);
        }
        self.outbox.borrow_mut().clear();
    }

    pub fn drain_messages_to_view(&mut self) -> Vec<ViewMessage> {
        self.outbox.borrow_mut().drain(..).collect()
    }

    /// Faults raised outside of `apply_change_trail` (there are none today
    /// besides `clear`), drained for forwarding.
    pub fn drain_faults(&mut self) -> Vec<EntityFault> {
        self.faults.drain()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn has_entity(&self, uuid: Uuid) -> bool {
        self.entities.contains_key(&uuid)
    }

    pub fn entity_token(&self, uuid: Uuid) -> Option<&str> {
        self.entities.get(&uuid).map(|entity| entity.token.as_str())
    }

    /// Tokens of the shadow objects living on `uuid`, in creation order.
    pub fn shadow_object_tokens(&self, uuid: Uuid) -> Option<Vec<Token>> {
        self.entities.get(&uuid).map(|entity| {
            entity
                .objects
                .iter()
                .map(|object| object.token().to_string())
                .collect()
        })
    }

    pub fn parent(&self, uuid: Uuid) -> Option<Uuid> {
        self.entities.get(&uuid).and_then(|entity| entity.parent)
    }

    pub fn children(&self, uuid: Uuid) -> Option<&[Uuid]> {
        self.entities
            .get(&uuid)
            .map(|entity| entity.children.as_slice())
    }

    pub fn roots(&self) -> &[Uuid] {
        &self.roots
    }

    pub fn property(&self, uuid: Uuid, name: &str) -> Option<PropValue> {
        self.entities
            .get(&uuid)
            .and_then(|entity| entity.properties.value(name).flatten())
    }

    /// Context value `name` as currently seen by `uuid`, if some shadow
    /// object on it asked for that context.
    pub fn context_value(&self, uuid: Uuid, name: &str) -> Option<Value> {
        self.entities
            .get(&uuid)
            .and_then(|entity| entity.context.value(name).flatten())
    }

    fn link(&mut self, uuid: Uuid, parent: Option<Uuid>, order: u32) {
        if let Some(entity) = self.entities.get_mut(&uuid) {
            entity.parent = parent;
            entity.order = order;
        }
        let siblings = match parent {
            Some(parent) => match self.entities.get(&parent) {
                Some(entity) => entity.children.clone(),
                None => return,
            },
            None => self.roots.clone(),
        };
        let position = siblings
            .iter()
            .position(|sibling| {
                self.entities
                    .get(sibling)
                    .is_some_and(|entity| entity.order > order)
            })
            .unwrap_or(siblings.len());
        let list = match parent {
            Some(parent) => match self.entities.get_mut(&parent) {
                Some(entity) => &mut entity.children,
                None => return,
            },
            None => &mut self.roots,
        };
        list.insert(position, uuid);
    }

    fn unlink(&mut self, uuid: Uuid) {
        let parent = self.entities.get(&uuid).and_then(|entity| entity.parent);
        let list = match parent.and_then(|parent| self.entities.get_mut(&parent)) {
            Some(entity) => &mut entity.children,
            None => &mut self.roots,
        };
        list.retain(|child| *child != uuid);
    }

    fn is_ancestor(&self, candidate: Uuid, of: Uuid) -> bool {
        let mut current = self.parent(of);
        while let Some(uuid) = current {
            if uuid == candidate {
                return true;
            }
            current = self.parent(uuid);
        }
        false
    }

    /// Provided-context stores of every ancestor, nearest first.
    fn ancestor_contexts(&self, uuid: Uuid) -> Vec<Rc<ContextStore>> {
        let mut stores = Vec::new();
        let mut current = self.parent(uuid);
        while let Some(ancestor) = current {
            let Some(entity) = self.entities.get(&ancestor) else {
                break;
            };
            stores.push(entity.provided.clone());
            current = entity.parent;
        }
        stores
    }

    /// Re-points the context links of `uuid` and its subtree at their new
    /// ancestors.
    fn rebind_context(&mut self, uuid: Uuid) {
        let mut pending = vec![uuid];
        while let Some(current) = pending.pop() {
            let ancestors = self.ancestor_contexts(current);
            let Some(entity) = self.entities.get_mut(&current) else {
                continue;
            };
            let names: Vec<String> = entity.context_links.keys().cloned().collect();
            for name in names {
                let link = context_link(&name, ancestors.clone(), entity.context.signal(&name));
                entity.context_links.insert(name, link);
            }
            pending.extend(entity.children.iter().copied());
        }
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("registry", &self.registry)
            .field("entities", &self.entities.len())
            .field("roots", &self.roots)
            .finish()
    }
}
