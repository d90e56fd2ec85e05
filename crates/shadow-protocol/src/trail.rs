use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque name of a shadow object kind and/or a composition route.
pub type Token = String;

/// Payload of a property write or a view-bound message.
///
/// Binary buffers are transferables: they never appear in the JSON encoding.
/// Before a message is serialized each buffer is moved into the frame's
/// transfer list and replaced by a [`PropValue::Transfer`] slot reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropValue {
    Json(Value),
    #[serde(skip)]
    Buffer(Vec<u8>),
    Transfer(usize),
}

impl PropValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            PropValue::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            PropValue::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_transferable(&self) -> bool {
        matches!(self, PropValue::Buffer(_))
    }
}

impl Default for PropValue {
    fn default() -> Self {
        PropValue::Json(Value::Null)
    }
}

impl From<Value> for PropValue {
    fn from(value: Value) -> Self {
        PropValue::Json(value)
    }
}

impl From<Vec<u8>> for PropValue {
    fn from(bytes: Vec<u8>) -> Self {
        PropValue::Buffer(bytes)
    }
}

macro_rules! json_prop_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for PropValue {
                fn from(value: $ty) -> Self {
                    PropValue::Json(Value::from(value))
                }
            }
        )*
    };
}

json_prop_from!(bool, i32, i64, u32, u64, f64, String, &str);

/// One recorded delta of the view tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeTrailEntry {
    CreateEntity {
        uuid: Uuid,
        token: Token,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<Uuid>,
        #[serde(default)]
        order: u32,
    },
    DestroyEntity {
        uuid: Uuid,
    },
    ChangeParent {
        uuid: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<Uuid>,
        #[serde(default)]
        order: u32,
    },
    SetProperty {
        uuid: Uuid,
        name: String,
        value: PropValue,
    },
    SendEvent {
        uuid: Uuid,
        #[serde(rename = "eventType")]
        event_type: String,
        #[serde(default)]
        data: Value,
    },
}

impl ChangeTrailEntry {
    pub fn uuid(&self) -> Uuid {
        match self {
            ChangeTrailEntry::CreateEntity { uuid, .. }
            | ChangeTrailEntry::DestroyEntity { uuid }
            | ChangeTrailEntry::ChangeParent { uuid, .. }
            | ChangeTrailEntry::SetProperty { uuid, .. }
            | ChangeTrailEntry::SendEvent { uuid, .. } => *uuid,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeTrailEntry::CreateEntity { .. } => "createEntity",
            ChangeTrailEntry::DestroyEntity { .. } => "destroyEntity",
            ChangeTrailEntry::ChangeParent { .. } => "changeParent",
            ChangeTrailEntry::SetProperty { .. } => "setProperty",
            ChangeTrailEntry::SendEvent { .. } => "sendEvent",
        }
    }

    /// Entries that change the shape of the tree rather than data on it.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ChangeTrailEntry::CreateEntity { .. }
                | ChangeTrailEntry::DestroyEntity { .. }
                | ChangeTrailEntry::ChangeParent { .. }
        )
    }
}

/// Ordered log of entries recorded between two flushes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeTrail {
    entries: Vec<ChangeTrailEntry>,
}

impl ChangeTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ChangeTrailEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ChangeTrailEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [ChangeTrailEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChangeTrailEntry> {
        self.entries.iter()
    }

    pub fn has_structural_changes(&self) -> bool {
        self.entries.iter().any(ChangeTrailEntry::is_structural)
    }

    pub fn into_entries(self) -> Vec<ChangeTrailEntry> {
        self.entries
    }
}

impl From<Vec<ChangeTrailEntry>> for ChangeTrail {
    fn from(entries: Vec<ChangeTrailEntry>) -> Self {
        Self { entries }
    }
}

impl FromIterator<ChangeTrailEntry> for ChangeTrail {
    fn from_iter<I: IntoIterator<Item = ChangeTrailEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ChangeTrail {
    type Item = ChangeTrailEntry;
    type IntoIter = std::vec::IntoIter<ChangeTrailEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChangeTrail {
    type Item = &'a ChangeTrailEntry;
    type IntoIter = std::slice::Iter<'a, ChangeTrailEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn entries_use_type_discriminator() {
        let uuid = Uuid::new_v4();
        let entry = ChangeTrailEntry::SetProperty {
            uuid,
            name: "n".into(),
            value: 5.into(),
        };
        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            encoded,
            json!({"type": "setProperty", "uuid": uuid.to_string(), "name": "n", "value": {"json": 5}})
        );
    }

    #[test]
    fn buffers_refuse_plain_serialization() {
        let value = PropValue::Buffer(vec![1, 2, 3]);
        assert!(serde_json::to_string(&value).is_err());
    }

    #[test]
    fn structural_detection() {
        let uuid = Uuid::new_v4();
        let trail: ChangeTrail = vec![ChangeTrailEntry::SendEvent {
            uuid,
            event_type: "click".into(),
            data: Value::Null,
        }]
        .into();
        assert!(!trail.has_structural_changes());

        let trail: ChangeTrail = vec![ChangeTrailEntry::DestroyEntity { uuid }].into();
        assert!(trail.has_structural_changes());
    }
}
