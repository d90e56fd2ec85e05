use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::Value;
use shadow_protocol::{ChangeTrail, ChangeTrailEntry, PropValue, Token, Uuid, ViewMessage};

use crate::component::ViewComponent;
use crate::error::StructuralViolation;

/// Receives messages shadow objects dispatch toward one component.
pub type MessageListener = Box<dyn FnMut(&ViewMessage)>;

/// Owner of the view tree and producer of change trails.
///
/// Every mutation updates the tree immediately and records the matching
/// entry; [`ComponentContext::flush`] hands the accumulated entries over in
/// the order they were made.
#[derive(Default)]
pub struct ComponentContext {
    components: HashMap<Uuid, ViewComponent>,
    roots: Vec<Uuid>,
    pending: Vec<ChangeTrailEntry>,
    /// Destroyed uuids whose `destroyEntity` is still unflushed.
    retired: HashSet<Uuid>,
    listeners: HashMap<Uuid, Vec<MessageListener>>,
}

impl ComponentContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new component as the last child of `parent` (or as a
    /// root) and records `createEntity`.
    pub fn create_component(
        &mut self,
        token: impl Into<Token>,
        parent: Option<Uuid>,
    ) -> Result<Uuid, StructuralViolation> {
        let order = match parent {
            Some(parent) => {
                let Some(component) = self.components.get(&parent) else {
                    return Err(StructuralViolation::UnknownParent(parent));
                };
                next_order(&self.components, &component.children)
            }
            None => next_order(&self.components, &self.roots),
        };
        let token = token.into();
        let uuid = self.allocate_uuid();
        self.components
            .insert(uuid, ViewComponent::new(uuid, token.clone(), parent, order));
        self.link(uuid, parent, order);
        log::trace!("created component {uuid} ({token})");
        self.pending.push(ChangeTrailEntry::CreateEntity {
            uuid,
            token,
            parent,
            order,
        });
        Ok(uuid)
    }

    /// Destroys `uuid` and its whole subtree, recording one `destroyEntity`
    /// per component, children before parents.
    pub fn destroy_component(&mut self, uuid: Uuid) -> Result<(), StructuralViolation> {
        if !self.components.contains_key(&uuid) {
            return Err(StructuralViolation::UnknownComponent(uuid));
        }
        self.unlink(uuid);
        for doomed in self.post_order(uuid) {
            if let Some(component) = self.components.remove(&doomed) {
                component.destroy();
            }
            self.listeners.remove(&doomed);
            self.retired.insert(doomed);
            self.pending.push(ChangeTrailEntry::DestroyEntity { uuid: doomed });
        }
        Ok(())
    }

    pub fn set_property(
        &mut self,
        uuid: Uuid,
        name: impl Into<String>,
        value: impl Into<PropValue>,
    ) -> Result<(), StructuralViolation> {
        let component = self
            .components
            .get(&uuid)
            .ok_or(StructuralViolation::UnknownComponent(uuid))?;
        let name = name.into();
        let value = value.into();
        component.properties().set(&name, Some(value.clone()));
        self.pending
            .push(ChangeTrailEntry::SetProperty { uuid, name, value });
        Ok(())
    }

    /// Moves `uuid` under `parent` (or to the roots) at `order`. Rejected
    /// moves leave both the tree and the trail untouched.
    pub fn change_parent(
        &mut self,
        uuid: Uuid,
        parent: Option<Uuid>,
        order: u32,
    ) -> Result<(), StructuralViolation> {
        if !self.components.contains_key(&uuid) {
            return Err(StructuralViolation::UnknownComponent(uuid));
        }
        if let Some(parent) = parent {
            if parent == uuid {
                return Err(StructuralViolation::SelfParent(uuid));
            }
            if !self.components.contains_key(&parent) {
                return Err(StructuralViolation::UnknownParent(parent));
            }
            if self.ancestors(parent).contains(&uuid) {
                return Err(StructuralViolation::Cycle { uuid, parent });
            }
        }
        self.unlink(uuid);
        self.link(uuid, parent, order);
        self.pending.push(ChangeTrailEntry::ChangeParent {
            uuid,
            parent,
            order,
        });
        Ok(())
    }

    /// Reorders `uuid` among its siblings.
    pub fn set_order(&mut self, uuid: Uuid, order: u32) -> Result<(), StructuralViolation> {
        let parent = self
            .components
            .get(&uuid)
            .ok_or(StructuralViolation::UnknownComponent(uuid))?
            .parent;
        self.change_parent(uuid, parent, order)
    }

    pub fn send_event(
        &mut self,
        uuid: Uuid,
        event_type: impl Into<String>,
        data: Value,
    ) -> Result<(), StructuralViolation> {
        if !self.components.contains_key(&uuid) {
            return Err(StructuralViolation::UnknownComponent(uuid));
        }
        self.pending.push(ChangeTrailEntry::SendEvent {
            uuid,
            event_type: event_type.into(),
            data,
        });
        Ok(())
    }

    /// Takes every entry recorded since the last flush.
    pub fn flush(&mut self) -> ChangeTrail {
        self.retired.clear();
        std::mem::take(&mut self.pending).into()
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drops the whole tree without recording anything and discards
    /// unflushed entries.
    pub fn clear(&mut self) {
        for component in self.components.values() {
            component.destroy();
        }
        self.components.clear();
        self.roots.clear();
        self.listeners.clear();
        self.pending.clear();
        self.retired.clear();
    }

    /// A trail that rebuilds the current tree from scratch, parents before
    /// children, followed by every property that holds a value. Unflushed
    /// entries are left alone.
    pub fn snapshot_trail(&self) -> ChangeTrail {
        let mut creates = Vec::new();
        let mut properties = Vec::new();
        let mut stack: Vec<Uuid> = self.roots.iter().rev().copied().collect();
        while let Some(uuid) = stack.pop() {
            let Some(component) = self.components.get(&uuid) else {
                continue;
            };
            creates.push(ChangeTrailEntry::CreateEntity {
                uuid,
                token: component.token().to_string(),
                parent: component.parent,
                order: component.order,
            });
            for name in component.properties().names() {
                if let Some(value) = component.property(&name) {
                    properties.push(ChangeTrailEntry::SetProperty { uuid, name, value });
                }
            }
            stack.extend(component.children.iter().rev().copied());
        }
        creates.into_iter().chain(properties).collect()
    }

    /// Provides `value` under `name` to the descendants of `uuid`.
    pub fn provide_context(
        &mut self,
        uuid: Uuid,
        name: &str,
        value: Value,
    ) -> Result<(), StructuralViolation> {
        let component = self
            .components
            .get(&uuid)
            .ok_or(StructuralViolation::UnknownComponent(uuid))?;
        component.context_providers().set(name, Some(value));
        Ok(())
    }

    /// Value provided under `name` by the nearest ancestor of `uuid`.
    pub fn lookup_context(&self, uuid: Uuid, name: &str) -> Option<Value> {
        self.ancestors(uuid).into_iter().find_map(|ancestor| {
            self.components
                .get(&ancestor)
                .and_then(|component| component.context_providers().value(name).flatten())
        })
    }

    /// Registers a listener for messages addressed to `uuid`. Listeners are
    /// dropped with the component.
    pub fn on_message<F>(&mut self, uuid: Uuid, listener: F) -> Result<(), StructuralViolation>
    where
        F: FnMut(&ViewMessage) + 'static,
    {
        if !self.components.contains_key(&uuid) {
            return Err(StructuralViolation::UnknownComponent(uuid));
        }
        self.listeners
            .entry(uuid)
            .or_default()
            .push(Box::new(listener));
        Ok(())
    }

    /// Hands `message` to the listeners of its component. Returns how many
    /// listeners saw it.
    pub fn deliver_message(&mut self, message: &ViewMessage) -> usize {
        let Some(listeners) = self.listeners.get_mut(&message.uuid) else {
            log::debug!(
                "no listener for '{}' on {}",
                message.message_type,
                message.uuid
            );
            return 0;
        };
        for listener in listeners.iter_mut() {
            listener(message);
        }
        listeners.len()
    }

    pub fn component(&self, uuid: Uuid) -> Option<&ViewComponent> {
        self.components.get(&uuid)
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.components.contains_key(&uuid)
    }

    pub fn children(&self, uuid: Uuid) -> Option<&[Uuid]> {
        self.components.get(&uuid).map(ViewComponent::children)
    }

    pub fn parent(&self, uuid: Uuid) -> Option<Uuid> {
        self.components.get(&uuid).and_then(ViewComponent::parent)
    }

    pub fn roots(&self) -> &[Uuid] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    fn allocate_uuid(&self) -> Uuid {
        loop {
            let uuid = Uuid::new_v4();
            if !self.components.contains_key(&uuid) && !self.retired.contains(&uuid) {
                return uuid;
            }
        }
    }

    /// Ancestors of `uuid`, nearest first.
    fn ancestors(&self, uuid: Uuid) -> Vec<Uuid> {
        let mut chain = Vec::new();
        let mut current = self.parent(uuid);
        while let Some(ancestor) = current {
            chain.push(ancestor);
            current = self.parent(ancestor);
        }
        chain
    }

    fn post_order(&self, uuid: Uuid) -> Vec<Uuid> {
        let mut order = Vec::new();
        let mut stack = vec![(uuid, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            stack.push((current, true));
            if let Some(component) = self.components.get(&current) {
                stack.extend(component.children.iter().rev().map(|child| (*child, false)));
            }
        }
        order
    }

    fn link(&mut self, uuid: Uuid, parent: Option<Uuid>, order: u32) {
        if let Some(component) = self.components.get_mut(&uuid) {
            component.parent = parent;
            component.order = order;
        }
        let siblings = match parent {
            Some(parent) => match self.components.get(&parent) {
                Some(component) => &component.children,
                None => return,
            },
            None => &self.roots,
        };
        let position = siblings
            .iter()
            .position(|sibling| {
                self.components
                    .get(sibling)
                    .is_some_and(|component| component.order > order)
            })
            .unwrap_or(siblings.len());
        let list = match parent.and_then(|parent| self.components.get_mut(&parent)) {
            Some(component) => &mut component.children,
            None => &mut self.roots,
        };
        list.insert(position, uuid);
    }

    fn unlink(&mut self, uuid: Uuid) {
        let parent = self.parent(uuid);
        let list = match parent.and_then(|parent| self.components.get_mut(&parent)) {
            Some(component) => &mut component.children,
            None => &mut self.roots,
        };
        list.retain(|child| *child != uuid);
    }
}

fn next_order(components: &HashMap<Uuid, ViewComponent>, siblings: &[Uuid]) -> u32 {
    siblings
        .iter()
        .filter_map(|sibling| components.get(sibling).map(ViewComponent::order))
        .max()
        .map_or(0, |order| order + 1)
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("components", &self.components.len())
            .field("roots", &self.roots)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flush_drains_in_call_order() {
        let mut cx = ComponentContext::new();
        let uuid = cx.create_component("X", None).unwrap();
        cx.set_property(uuid, "n", 5).unwrap();

        let trail = cx.flush();
        assert_eq!(
            trail.entries(),
            &[
                ChangeTrailEntry::CreateEntity {
                    uuid,
                    token: "X".into(),
                    parent: None,
                    order: 0,
                },
                ChangeTrailEntry::SetProperty {
                    uuid,
                    name: "n".into(),
                    value: PropValue::from(5),
                },
            ]
        );
        assert!(cx.flush().is_empty());
        assert_eq!(cx.component(uuid).unwrap().property("n"), Some(PropValue::from(5)));
    }

    #[test]
    fn destroy_records_post_order() {
        let mut cx = ComponentContext::new();
        let root = cx.create_component("root", None).unwrap();
        let a = cx.create_component("a", Some(root)).unwrap();
        let a1 = cx.create_component("a1", Some(a)).unwrap();
        let a2 = cx.create_component("a2", Some(a)).unwrap();
        let b = cx.create_component("b", Some(root)).unwrap();
        cx.flush();

        cx.destroy_component(root).unwrap();

        let destroyed: Vec<Uuid> = cx.flush().iter().map(ChangeTrailEntry::uuid).collect();
        assert_eq!(destroyed, vec![a1, a2, a, b, root]);
        assert!(cx.is_empty());
        assert!(cx.roots().is_empty());
    }

    #[test]
    fn destroy_releases_cells_and_unlinks() {
        let mut cx = ComponentContext::new();
        let root = cx.create_component("root", None).unwrap();
        let child = cx.create_component("child", Some(root)).unwrap();
        cx.set_property(child, "n", 1).unwrap();
        let cell = cx.component(child).unwrap().properties().signal("n");

        cx.destroy_component(child).unwrap();

        assert!(cell.is_disposed());
        assert_eq!(cx.children(root), Some(&[][..]));
        assert_eq!(
            cx.set_property(child, "n", 2),
            Err(StructuralViolation::UnknownComponent(child))
        );
    }

    #[test]
    fn rejected_moves_record_nothing() {
        let mut cx = ComponentContext::new();
        let root = cx.create_component("root", None).unwrap();
        let child = cx.create_component("child", Some(root)).unwrap();
        let stranger = Uuid::new_v4();
        cx.flush();

        assert_eq!(
            cx.change_parent(root, Some(root), 0),
            Err(StructuralViolation::SelfParent(root))
        );
        assert_eq!(
            cx.change_parent(root, Some(child), 0),
            Err(StructuralViolation::Cycle {
                uuid: root,
                parent: child
            })
        );
        assert_eq!(
            cx.change_parent(child, Some(stranger), 0),
            Err(StructuralViolation::UnknownParent(stranger))
        );
        assert_eq!(
            cx.create_component("x", Some(stranger)),
            Err(StructuralViolation::UnknownParent(stranger))
        );
        assert!(cx.flush().is_empty());
        assert_eq!(cx.parent(child), Some(root));
    }

    #[test]
    fn children_follow_order() {
        let mut cx = ComponentContext::new();
        let root = cx.create_component("root", None).unwrap();
        let first = cx.create_component("c", Some(root)).unwrap();
        let second = cx.create_component("c", Some(root)).unwrap();
        let third = cx.create_component("c", Some(root)).unwrap();
        assert_eq!(cx.component(third).unwrap().order(), 2);

        cx.set_order(first, 5).unwrap();
        assert_eq!(cx.children(root).unwrap(), &[second, third, first]);

        let trail = cx.flush();
        assert_eq!(
            trail.entries().last(),
            Some(&ChangeTrailEntry::ChangeParent {
                uuid: first,
                parent: Some(root),
                order: 5,
            })
        );
    }

    #[test]
    fn context_resolves_nearest_provider() {
        let mut cx = ComponentContext::new();
        let root = cx.create_component("root", None).unwrap();
        let middle = cx.create_component("middle", Some(root)).unwrap();
        let leaf = cx.create_component("leaf", Some(middle)).unwrap();

        cx.provide_context(root, "theme", json!("light")).unwrap();
        assert_eq!(cx.lookup_context(leaf, "theme"), Some(json!("light")));
        assert_eq!(cx.lookup_context(root, "theme"), None);

        cx.provide_context(middle, "theme", json!("dark")).unwrap();
        assert_eq!(cx.lookup_context(leaf, "theme"), Some(json!("dark")));

        cx.change_parent(leaf, Some(root), 0).unwrap();
        assert_eq!(cx.lookup_context(leaf, "theme"), Some(json!("light")));
    }

    #[test]
    fn snapshot_rebuilds_tree_without_touching_pending() {
        let mut cx = ComponentContext::new();
        let root = cx.create_component("root", None).unwrap();
        let child = cx.create_component("child", Some(root)).unwrap();
        cx.set_property(child, "label", "hi").unwrap();
        cx.set_property(root, "size", 3).unwrap();

        let snapshot = cx.snapshot_trail();
        let kinds: Vec<_> = snapshot.iter().map(ChangeTrailEntry::kind).collect();
        assert_eq!(
            kinds,
            vec!["createEntity", "createEntity", "setProperty", "setProperty"]
        );
        assert_eq!(snapshot.entries()[1].uuid(), child);
        assert_eq!(cx.flush().len(), 4);
    }

    #[test]
    fn messages_reach_component_listeners() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut cx = ComponentContext::new();
        let uuid = cx.create_component("x", None).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            cx.on_message(uuid, move |message| {
                seen.borrow_mut().push(message.message_type.clone())
            })
            .unwrap();
        }
        let message = ViewMessage {
            uuid,
            message_type: "ping".into(),
            data: PropValue::default(),
        };

        assert_eq!(cx.deliver_message(&message), 1);
        cx.destroy_component(uuid).unwrap();
        assert_eq!(cx.deliver_message(&message), 0);
        assert_eq!(*seen.borrow(), vec!["ping"]);
    }
}
