//! Lifecycle states and the field snapshot used for state tracking.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, DomainResult};

/// Lifecycle state of a tracked entity relative to persisted storage.
///
/// This is the vocabulary commit logic branches on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityState {
    /// Freshly instantiated, not yet persisted.
    New,
    /// Matches what was loaded (or last committed).
    Clean,
    /// Changed since it was loaded (or last committed).
    Dirty,
    /// Scheduled for removal.
    Deleted,
}

impl EntityState {
    pub const ALL: [EntityState; 4] = [
        EntityState::New,
        EntityState::Clean,
        EntityState::Dirty,
        EntityState::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityState::New => "NEW",
            EntityState::Clean => "CLEAN",
            EntityState::Dirty => "DIRTY",
            EntityState::Deleted => "DELETED",
        }
    }
}

impl core::fmt::Display for EntityState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name/value snapshot of an entity's fields.
///
/// Keys are kept sorted so that anything derived from the snapshot (most
/// importantly the tracking fingerprint) does not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateData(BTreeMap<String, Value>);

impl StateData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Copy of the fields whose names do not start with `private_prefix`.
    ///
    /// An empty prefix marks nothing as private.
    pub fn public(&self, private_prefix: &str) -> StateData {
        self.iter()
            .filter(|(name, _)| !is_private(name, private_prefix))
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    /// Deserialize a single field.
    ///
    /// A missing field is treated as `null`, so `Option<T>` targets read it as
    /// `None` while required targets fail with [`DomainError::InvalidData`].
    pub fn field<T: DeserializeOwned>(&self, name: &str) -> DomainResult<T> {
        let value = self.0.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| DomainError::invalid_data(format!("field `{name}`: {e}")))
    }

    /// Deserialize a single field, falling back to `T::default()` when the
    /// field is absent or `null`.
    pub fn field_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> DomainResult<T> {
        Ok(self.field::<Option<T>>(name)?.unwrap_or_default())
    }

    /// Snapshot any serializable struct (its top-level fields become entries).
    pub fn from_serialize<T: Serialize>(value: &T) -> DomainResult<Self> {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(other) => Err(DomainError::invalid_data(format!(
                "expected an object, got `{other}`"
            ))),
            Err(e) => Err(DomainError::invalid_data(e.to_string())),
        }
    }

    /// Rebuild a deserializable struct from the snapshot.
    pub fn to_deserialize<T: DeserializeOwned>(&self) -> DomainResult<T> {
        let map: serde_json::Map<String, Value> = self.0.clone().into_iter().collect();
        serde_json::from_value(Value::Object(map))
            .map_err(|e| DomainError::invalid_data(e.to_string()))
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

/// Whether `name` is framework-private under `private_prefix`.
pub fn is_private(name: &str, private_prefix: &str) -> bool {
    !private_prefix.is_empty() && name.starts_with(private_prefix)
}

impl FromIterator<(String, Value)> for StateData {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for StateData {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<BTreeMap<String, Value>> for StateData {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self(value)
    }
}
