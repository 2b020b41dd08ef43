//! Resource - Values carried by resource props and outputs

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A sensitive string value
///
/// The wrapped content is only reachable through [`Secret::expose`]; `Debug`
/// and `Display` always print a mask so secrets do not end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the clear-text value
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(******)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("******")
    }
}

/// A map node that can be referenced from several places at once
///
/// Cloning a `SharedMap` clones the handle, not the contents, which is how
/// one resource output ends up embedded in another (or in itself). Two
/// handles are equal only when they point at the same node.
///
/// A node that (transitively) contains itself stays alive until the cycle is
/// broken, e.g. with [`SharedMap::clear`].
#[derive(Clone, Default)]
pub struct SharedMap(Arc<RwLock<BTreeMap<String, Value>>>);

impl SharedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every entry, breaking any cycle that runs through this node
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Replace the node contents while keeping its identity
    pub fn replace(&self, map: BTreeMap<String, Value>) {
        *self.write() = map;
    }

    /// Copy of the current entries (nested shared nodes are copied as handles)
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.read().clone()
    }

    pub fn ptr_eq(&self, other: &SharedMap) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity of the node for as long as it is alive
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for SharedMap {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for SharedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never walk the contents: they may lead back here.
        f.debug_struct("SharedMap")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len())
            .finish()
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Sensitive value, persisted through the secret envelope only
    Secret(Secret),
    /// Handle to a shared map node; the only way to express cycles
    Shared(SharedMap),
}

impl Value {
    pub fn secret(value: impl Into<String>) -> Self {
        Value::Secret(Secret::new(value))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&Secret> {
        match self {
            Value::Secret(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_shared(&self) -> Option<&SharedMap> {
        match self {
            Value::Shared(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a field of a `Map` or `Shared` value
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Map(map) => map.get(key).cloned(),
            Value::Shared(shared) => shared.get(key),
            _ => None,
        }
    }

    /// Render for display
    ///
    /// Secrets are masked and a shared node met again while it is still being
    /// rendered becomes `"[circular]"`, so the result is always finite.
    pub fn to_json_lossy(&self) -> serde_json::Value {
        let mut visiting = HashSet::new();
        self.render(&mut visiting)
    }

    fn render(&self, visiting: &mut HashSet<usize>) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(|v| v.render(visiting)).collect()),
            Value::Map(map) => render_map(map, visiting),
            Value::Secret(_) => Json::String("[secret]".to_string()),
            Value::Shared(shared) => {
                let addr = shared.addr();
                if !visiting.insert(addr) {
                    return Json::String("[circular]".to_string());
                }
                let rendered = render_map(&shared.snapshot(), visiting);
                visiting.remove(&addr);
                rendered
            }
        }
    }
}

fn render_map(map: &BTreeMap<String, Value>, visiting: &mut HashSet<usize>) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), v.render(visiting)))
            .collect(),
    )
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Secret> for Value {
    fn from(s: Secret) -> Self {
        Value::Secret(s)
    }
}

impl From<SharedMap> for Value {
    fn from(s: SharedMap) -> Self {
        Value::Shared(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}
