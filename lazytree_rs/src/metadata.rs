//! Immutable-but-extensible metadata containers and the subtree tagger.
//!
//! Every function in a loaded subtree gets its own fresh [`MetaMap`]:
//! existing keys cannot be reassigned or removed, new keys may be added and
//! freeze on first assignment, nested maps inherit the rule, nested lists
//! freeze whole. This keeps trust-carrying fields intact across user code
//! that might otherwise mutate them. The companion scrub clears the
//! attachments when a module is reloaded, because function handles survive
//! reloads and would otherwise carry stale metadata.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::live::is_reserved_key;
use crate::value::Value;

/// A metadata value. Lists are frozen at construction.
#[derive(Clone, Debug)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Arc<[MetaValue]>),
    Map(MetaMap),
}

impl PartialEq for MetaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MetaValue::Null, MetaValue::Null) => true,
            (MetaValue::Bool(a), MetaValue::Bool(b)) => a == b,
            (MetaValue::Int(a), MetaValue::Int(b)) => a == b,
            (MetaValue::Float(a), MetaValue::Float(b)) => a == b,
            (MetaValue::Str(a), MetaValue::Str(b)) => a == b,
            (MetaValue::List(a), MetaValue::List(b)) => a == b,
            (MetaValue::Map(a), MetaValue::Map(b)) => a.snapshot() == b.snapshot(),
            _ => false,
        }
    }
}

/// Write-once key/value container; see module docs for the mutation rules.
#[derive(Clone, Debug, Default)]
pub struct MetaMap {
    inner: Arc<RwLock<IndexMap<String, MetaValue>>>,
}

impl MetaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<MetaValue> {
        self.inner.read().expect("meta lock").get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.read().expect("meta lock").contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().expect("meta lock").keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("meta lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a new key. Returns false (and changes nothing) when the key is
    /// already present: existing entries are frozen.
    pub fn set(&self, key: impl Into<String>, value: MetaValue) -> bool {
        let key = key.into();
        let mut map = self.inner.write().expect("meta lock");
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, value);
        true
    }

    fn snapshot(&self) -> Vec<(String, MetaValue)> {
        self.inner
            .read()
            .expect("meta lock")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Deep-copy into a fresh container; each tagged function gets its own.
    pub fn duplicate(&self) -> MetaMap {
        let copy = MetaMap::new();
        for (key, value) in self.snapshot() {
            let value = match value {
                MetaValue::Map(m) => MetaValue::Map(m.duplicate()),
                other => other,
            };
            copy.set(key, value);
        }
        copy
    }

    pub fn from_json(json: &serde_json::Value) -> MetaMap {
        let map = MetaMap::new();
        if let serde_json::Value::Object(entries) = json {
            for (key, value) in entries {
                map.set(key.clone(), meta_from_json(value));
            }
        }
        map
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (key, value) in self.snapshot() {
            out.insert(key, meta_to_json(&value));
        }
        serde_json::Value::Object(out)
    }
}

fn meta_from_json(json: &serde_json::Value) -> MetaValue {
    match json {
        serde_json::Value::Null => MetaValue::Null,
        serde_json::Value::Bool(b) => MetaValue::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetaValue::Int(i)
            } else {
                MetaValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => MetaValue::Str(s.clone()),
        serde_json::Value::Array(items) => {
            MetaValue::List(items.iter().map(meta_from_json).collect())
        }
        serde_json::Value::Object(_) => MetaValue::Map(MetaMap::from_json(json)),
    }
}

fn meta_to_json(value: &MetaValue) -> serde_json::Value {
    match value {
        MetaValue::Null => serde_json::Value::Null,
        MetaValue::Bool(b) => serde_json::Value::Bool(*b),
        MetaValue::Int(i) => serde_json::Value::from(*i),
        MetaValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        MetaValue::Str(s) => serde_json::Value::String(s.clone()),
        MetaValue::List(items) => {
            serde_json::Value::Array(items.iter().map(meta_to_json).collect())
        }
        MetaValue::Map(m) => m.to_json(),
    }
}

/// Attach metadata and the source folder to every function in `root`.
/// Reserved keys are not descended into.
pub fn tag_functions(root: &Value, metadata: &MetaMap, source_folder: &Path) {
    let mut visited = HashSet::new();
    tag_walk(root, metadata, source_folder, &mut visited);
}

fn tag_walk(value: &Value, metadata: &MetaMap, folder: &Path, visited: &mut HashSet<usize>) {
    match value {
        Value::Function(f) => {
            if !visited.insert(f.addr()) {
                return;
            }
            let fresh = metadata.duplicate();
            f.with_tag_mut(|tag| {
                tag.metadata = Some(fresh);
                tag.source_folder = Some(folder.to_path_buf());
            });
            for (key, child) in f.props().entries() {
                if !is_reserved_key(&key) {
                    tag_walk(&child, metadata, folder, visited);
                }
            }
        }
        Value::Object(obj) => {
            if !visited.insert(obj.addr()) {
                return;
            }
            for (key, child) in obj.entries() {
                if !is_reserved_key(&key) {
                    tag_walk(&child, metadata, folder, visited);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                tag_walk(item, metadata, folder, visited);
            }
        }
        _ => {}
    }
}

/// Remove metadata attachments from every function in `root`. Run before a
/// reload replaces module analyses.
pub fn scrub_functions(root: &Value) {
    let mut visited = HashSet::new();
    scrub_walk(root, &mut visited);
}

fn scrub_walk(value: &Value, visited: &mut HashSet<usize>) {
    match value {
        Value::Function(f) => {
            if !visited.insert(f.addr()) {
                return;
            }
            f.with_tag_mut(|tag| {
                tag.metadata = None;
                tag.source_folder = None;
            });
            for (key, child) in f.props().entries() {
                if !is_reserved_key(&key) {
                    scrub_walk(&child, visited);
                }
            }
        }
        Value::Object(obj) => {
            if !visited.insert(obj.addr()) {
                return;
            }
            for (key, child) in obj.entries() {
                if !is_reserved_key(&key) {
                    scrub_walk(&child, visited);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                scrub_walk(item, visited);
            }
        }
        _ => {}
    }
}
