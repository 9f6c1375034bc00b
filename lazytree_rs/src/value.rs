//! The dynamic value model shared by every subsystem.
//!
//! A resolved API tree is a [`Value`]: plain data, shared objects, callable
//! functions, or lazy slots that materialize on first access. Two properties
//! drive the representation:
//!
//! - **Live bindings.** [`ObjectRef`] and [`FnValue`] are shared handles with
//!   interior mutability. Mutating contents in place is how reload, `add_api`
//!   rollback, and hot reload keep externally held references working.
//! - **Sync/async duality.** Calling a function yields an [`Outcome`]: either
//!   a value produced synchronously or a future to await. The dispatcher
//!   treats the two exactly like sync results vs promise-likes.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::lazy::LazySlot;
use crate::metadata::MetaMap;

/// Ordered key/value entries of an object slot.
pub type Map = IndexMap<String, Value>;

/// Result of invoking an API function.
pub type CallResult = Result<Value>;

/// What a function invocation produced: a value right away, or a future.
pub enum Outcome {
    Ready(CallResult),
    Pending(BoxFuture<'static, CallResult>),
}

impl Outcome {
    pub fn ready(value: Value) -> Self {
        Outcome::Ready(Ok(value))
    }

    pub fn err(err: Error) -> Self {
        Outcome::Ready(Err(err))
    }

    pub fn pending<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = CallResult> + Send + 'static,
    {
        Outcome::Pending(Box::pin(fut))
    }

    /// Await the outcome regardless of which arm it took.
    pub async fn resolve(self) -> CallResult {
        match self {
            Outcome::Ready(res) => res,
            Outcome::Pending(fut) => fut.await,
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ready(res) => f.debug_tuple("Ready").field(res).finish(),
            Outcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Implementation slot of a function value.
pub type NativeImpl = Arc<dyn Fn(Vec<Value>) -> Outcome + Send + Sync>;

/// Discriminant of a [`Value`], used for shape comparison and `describe()`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Array,
    Object,
    Function,
    Lazy,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Function => "function",
            ValueKind::Lazy => "lazy",
        }
    }
}

/// A dynamic value in the API tree.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Object(ObjectRef),
    Function(FnValue),
    Lazy(LazySlot),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            Value::Function(_) => ValueKind::Function,
            Value::Lazy(_) => ValueKind::Lazy,
        }
    }

    pub fn object() -> Self {
        Value::Object(ObjectRef::default())
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FnValue> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert a data value to JSON. Functions render as an opaque marker and
    /// lazy slots as `null`; use `BoundApi::describe()` for structure.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(obj) => {
                let mut out = serde_json::Map::new();
                for (k, v) in obj.entries() {
                    out.insert(k, v.to_json());
                }
                serde_json::Value::Object(out)
            }
            Value::Function(f) => serde_json::Value::String(format!(
                "[function {}]",
                f.name().unwrap_or_else(|| "anonymous".to_string())
            )),
            Value::Lazy(_) => serde_json::Value::Null,
        }
    }

    /// Deep-copy into per-instance storage. Functions become fresh handles
    /// forwarding to the original implementation; objects become fresh maps.
    /// Loading the same registered module into two instances must not let
    /// them share mutable state, and tags (path, owning instance, metadata)
    /// are written on the copies only.
    pub(crate) fn instantiate(&self) -> Value {
        match self {
            Value::Object(obj) => {
                let fresh = ObjectRef::new();
                for (key, value) in obj.entries() {
                    fresh.set(key, value.instantiate());
                }
                Value::Object(fresh)
            }
            Value::Function(f) => Value::Function(f.instantiate()),
            Value::Array(items) => Value::Array(items.iter().map(Value::instantiate).collect()),
            other => other.clone(),
        }
    }

    /// Build a value from JSON data. Objects become fresh [`ObjectRef`]s.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let obj = ObjectRef::default();
                for (k, v) in map {
                    obj.set(k, Value::from_json(v));
                }
                Value::Object(obj)
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(n) => write!(f, "Float({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Object(obj) => write!(f, "Object(keys={:?})", obj.keys()),
            Value::Function(func) => write!(f, "Function({:?})", func.name()),
            Value::Lazy(slot) => write!(f, "Lazy({})", slot.describe_source()),
        }
    }
}

impl PartialEq for Value {
    /// Structural for data, pointer identity for objects/functions/slots.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Lazy(a), Value::Lazy(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

/// Shared, ordered, interiorly mutable object. Clones are handles to the
/// same storage: writes through one clone are visible through all others.
#[derive(Clone, Default)]
pub struct ObjectRef {
    inner: Arc<RwLock<Map>>,
}

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().expect("object lock").get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner
            .write()
            .expect("object lock")
            .insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().expect("object lock").shift_remove(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.read().expect("object lock").contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().expect("object lock").keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("object lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the entries; values are cheap clones (handles).
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .read()
            .expect("object lock")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Remove every key for which `keep` returns false.
    pub fn retain_keys(&self, keep: impl Fn(&str) -> bool) {
        self.inner
            .write()
            .expect("object lock")
            .retain(|k, _| keep(k));
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef(keys={:?})", self.keys())
    }
}

/// Tag carried by every function value: name, origin flags, dispatch path,
/// owning instance, and the metadata slots managed by the tagger.
#[derive(Clone, Default)]
pub struct FnTag {
    /// The function's own name, when it has one.
    pub name: Option<String>,
    /// True when this function occupied the module's default slot.
    pub from_default: bool,
    /// Dotted API path assigned at materialization. `None` marks an internal
    /// helper: dispatch bypasses hooks for untagged functions.
    pub path: Option<String>,
    /// Instance that materialized this function (identity engine dispatch).
    pub instance: Option<String>,
    /// Attached metadata container, if the tagger has run.
    pub metadata: Option<MetaMap>,
    /// Folder the function was loaded from, if the tagger has run.
    pub source_folder: Option<PathBuf>,
}

struct FnInner {
    imp: RwLock<NativeImpl>,
    props: ObjectRef,
    tag: RwLock<FnTag>,
}

/// A callable value. The implementation slot is swappable in place, so an
/// externally held `FnValue` keeps working across reload and rollback; the
/// `props` object carries attached named exports or callable-object members.
#[derive(Clone)]
pub struct FnValue {
    inner: Arc<FnInner>,
}

impl FnValue {
    pub fn new(name: Option<&str>, imp: NativeImpl) -> Self {
        Self::new_with_props(name, imp, ObjectRef::default())
    }

    /// A function sharing an existing props object (runtime wrappers mirror
    /// the wrapped function's members through the same storage).
    pub(crate) fn new_with_props(name: Option<&str>, imp: NativeImpl, props: ObjectRef) -> Self {
        let tag = FnTag {
            name: name.map(|s| s.to_string()),
            ..FnTag::default()
        };
        Self {
            inner: Arc::new(FnInner {
                imp: RwLock::new(imp),
                props,
                tag: RwLock::new(tag),
            }),
        }
    }

    pub(crate) fn weak(&self) -> FnWeak {
        FnWeak {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Wrap a synchronous closure.
    pub fn sync<F>(name: &str, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> CallResult + Send + Sync + 'static,
    {
        Self::new(Some(name), Arc::new(move |args| Outcome::Ready(f(args))))
    }

    /// Wrap a closure producing a future.
    pub fn asynch<F, Fut>(name: &str, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CallResult> + Send + 'static,
    {
        Self::new(Some(name), Arc::new(move |args| Outcome::pending(f(args))))
    }

    pub fn ptr_eq(&self, other: &FnValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Invoke the current implementation. The impl handle is cloned out of
    /// the lock first, so a rebind during a long call cannot deadlock.
    pub fn call(&self, args: Vec<Value>) -> Outcome {
        let imp = self.inner.imp.read().expect("fn impl lock").clone();
        imp(args)
    }

    pub fn props(&self) -> &ObjectRef {
        &self.inner.props
    }

    pub fn name(&self) -> Option<String> {
        self.inner.tag.read().expect("fn tag lock").name.clone()
    }

    pub fn tag(&self) -> FnTag {
        self.inner.tag.read().expect("fn tag lock").clone()
    }

    pub fn with_tag_mut(&self, f: impl FnOnce(&mut FnTag)) {
        f(&mut self.inner.tag.write().expect("fn tag lock"));
    }

    pub fn path(&self) -> Option<String> {
        self.inner.tag.read().expect("fn tag lock").path.clone()
    }

    /// Replace the implementation in place. External holders keep calling
    /// through the same handle and observe the new behavior.
    pub fn rebind_impl(&self, imp: NativeImpl) {
        *self.inner.imp.write().expect("fn impl lock") = imp;
    }

    /// Redirect this function to forward to `source`, without breaking the
    /// identity of `self`.
    pub fn forward_to(&self, source: &FnValue) {
        let target = source.clone();
        self.rebind_impl(Arc::new(move |args| target.call(args)));
    }

    /// Fresh handle sharing the implementation but owning its props and tag.
    pub(crate) fn instantiate(&self) -> FnValue {
        let imp = self.inner.imp.read().expect("fn impl lock").clone();
        let copy = FnValue::new(None, imp);
        for (key, value) in self.props().entries() {
            copy.props().set(key, value.instantiate());
        }
        let src = self.tag();
        copy.with_tag_mut(|tag| {
            tag.name = src.name;
            tag.from_default = src.from_default;
        });
        copy
    }
}

/// Weak handle to a function, used by the wrap cache.
#[derive(Clone)]
pub(crate) struct FnWeak {
    inner: std::sync::Weak<FnInner>,
}

impl FnWeak {
    pub(crate) fn upgrade(&self) -> Option<FnValue> {
        self.inner.upgrade().map(|inner| FnValue { inner })
    }
}

impl fmt::Debug for FnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FnValue(name={:?}, path={:?}, props={:?})",
            self.name(),
            self.path(),
            self.props().keys()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_clones_share_storage() {
        let a = ObjectRef::new();
        let b = a.clone();
        a.set("x", Value::Int(1));
        assert_eq!(b.get("x"), Some(Value::Int(1)));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn object_preserves_insertion_order() {
        let obj = ObjectRef::new();
        obj.set("zebra", Value::Int(1));
        obj.set("apple", Value::Int(2));
        obj.set("mango", Value::Int(3));
        assert_eq!(obj.keys(), vec!["zebra", "apple", "mango"]);
    }

    #[test]
    fn fn_value_calls_sync() {
        let add = FnValue::sync("add", |args| {
            let a = args.first().and_then(Value::as_int).unwrap_or(0);
            let b = args.get(1).and_then(Value::as_int).unwrap_or(0);
            Ok(Value::Int(a + b))
        });
        match add.call(vec![Value::Int(2), Value::Int(3)]) {
            Outcome::Ready(Ok(Value::Int(5))) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn fn_value_rebind_preserves_identity() {
        let f = FnValue::sync("v", |_| Ok(Value::Str("v1".into())));
        let external = f.clone();
        let v2 = FnValue::sync("v", |_| Ok(Value::Str("v2".into())));
        f.forward_to(&v2);
        match external.call(Vec::new()) {
            Outcome::Ready(Ok(Value::Str(s))) => assert_eq!(s, "v2"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(external.ptr_eq(&f));
    }

    #[test]
    fn value_equality_is_identity_for_objects() {
        let a = ObjectRef::new();
        let b = ObjectRef::new();
        assert_ne!(Value::Object(a.clone()), Value::Object(b));
        assert_eq!(Value::Object(a.clone()), Value::Object(a));
        assert_eq!(Value::Int(3), Value::Int(3));
        assert_ne!(Value::Int(3), Value::Float(3.0));
    }

    #[test]
    fn json_round_trip_for_data() {
        let json: serde_json::Value = serde_json::json!({
            "name": "tv",
            "volume": 11,
            "tags": ["a", "b"],
            "nested": {"on": true}
        });
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[tokio::test]
    async fn async_outcome_resolves() {
        let f = FnValue::asynch("later", |args| async move {
            tokio::task::yield_now().await;
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        });
        let out = f.call(vec![Value::Str("ok".into())]).resolve().await;
        assert_eq!(out.expect("call"), Value::Str("ok".into()));
    }
}
