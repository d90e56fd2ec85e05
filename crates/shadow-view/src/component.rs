use std::fmt;

use serde_json::Value;
use shadow_protocol::{PropValue, Token, Uuid};
use shadow_signals::SignalStore;

/// One node of the view tree. Only [`ComponentContext`](crate::ComponentContext)
/// mutates structure; property and context cells can be read (and observed)
/// by anyone holding a reference.
pub struct ViewComponent {
    uuid: Uuid,
    token: Token,
    pub(crate) parent: Option<Uuid>,
    pub(crate) order: u32,
    pub(crate) children: Vec<Uuid>,
    properties: SignalStore<Option<PropValue>>,
    context_providers: SignalStore<Option<Value>>,
}

impl ViewComponent {
    pub(crate) fn new(uuid: Uuid, token: Token, parent: Option<Uuid>, order: u32) -> Self {
        Self {
            uuid,
            token,
            parent,
            order,
            children: Vec::new(),
            properties: SignalStore::new(),
            context_providers: SignalStore::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    /// Children sorted by order; equal orders keep insertion order.
    pub fn children(&self) -> &[Uuid] {
        &self.children
    }

    pub fn properties(&self) -> &SignalStore<Option<PropValue>> {
        &self.properties
    }

    pub fn context_providers(&self) -> &SignalStore<Option<Value>> {
        &self.context_providers
    }

    pub fn property(&self, name: &str) -> Option<PropValue> {
        self.properties.value(name).flatten()
    }

    /// Releases every property and context cell.
    pub(crate) fn destroy(&self) {
        self.properties.destroy();
        self.context_providers.destroy();
    }
}

impl fmt::Debug for ViewComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewComponent")
            .field("uuid", &self.uuid)
            .field("token", &self.token)
            .field("parent", &self.parent)
            .field("order", &self.order)
            .field("children", &self.children)
            .field("properties", &self.properties.names())
            .finish()
    }
}
