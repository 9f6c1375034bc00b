//! Lazy directory slots: materialize on first access, answer shape queries
//! from the directory listing without materializing.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::value::Value;

type Thunk = Box<dyn Fn() -> Result<Value> + Send + Sync>;
type ShapeFn = Box<dyn Fn() -> Result<Vec<String>> + Send + Sync>;

struct LazyInner {
    source: PathBuf,
    key: String,
    cell: Mutex<Option<Value>>,
    thunk: Thunk,
    shape: ShapeFn,
}

/// A slot in the API tree that runs the directory pipeline on first access.
///
/// Clones are handles to the same cell: the first successful materialization
/// wins and every later access observes the same value. A failed
/// materialization caches nothing, so the error re-raises per access until
/// the underlying cause is fixed; sibling slots are unaffected.
#[derive(Clone)]
pub struct LazySlot {
    inner: Arc<LazyInner>,
}

impl LazySlot {
    pub(crate) fn new(source: PathBuf, key: String, thunk: Thunk, shape: ShapeFn) -> Self {
        LazySlot {
            inner: Arc::new(LazyInner {
                source,
                key,
                cell: Mutex::new(None),
                thunk,
                shape,
            }),
        }
    }

    pub fn ptr_eq(&self, other: &LazySlot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn describe_source(&self) -> String {
        self.inner.source.display().to_string()
    }

    /// The already materialized value, if any.
    pub fn peek(&self) -> Option<Value> {
        self.inner.cell.lock().expect("lazy cell").clone()
    }

    pub fn is_materialized(&self) -> bool {
        self.peek().is_some()
    }

    /// Materialize (or return the cached value). The cell lock is held
    /// across the thunk so concurrent first accesses deduplicate: exactly
    /// one runs the pipeline, the rest observe its result.
    pub fn force(&self) -> Result<Value> {
        let mut cell = self.inner.cell.lock().expect("lazy cell");
        if let Some(value) = cell.as_ref() {
            return Ok(value.clone());
        }
        let value = (self.inner.thunk)()?;
        *cell = Some(value.clone());
        Ok(value)
    }

    /// Child keys without materializing: the cached value's keys when
    /// present, otherwise the directory listing's keys.
    pub fn shape_keys(&self) -> Result<Vec<String>> {
        if let Some(value) = self.peek() {
            return Ok(match value {
                Value::Object(obj) => obj.keys(),
                Value::Function(f) => f.props().keys(),
                _ => Vec::new(),
            });
        }
        (self.inner.shape)()
    }

    pub fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.shape_keys()?.iter().any(|k| k == key))
    }
}

impl fmt::Debug for LazySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LazySlot(key={}, source={}, materialized={})",
            self.inner.key,
            self.describe_source(),
            self.is_materialized()
        )
    }
}
