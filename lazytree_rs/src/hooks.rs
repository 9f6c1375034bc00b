//! Priority-ordered, pattern-matched call interceptors.
//!
//! Selection for a call at path `P`: filter by hook type and pattern match,
//! sort by priority descending, tie-break by registration order ascending.
//! The global gate and the additive enabled-pattern filters decide whether a
//! path is observed at all.

use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::error::{Error, Result};
use crate::pattern::PathPattern;
use crate::value::Value;

/// When a hook runs relative to the target call.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HookType {
    Before,
    After,
    Always,
    Error,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::Before => "before",
            HookType::After => "after",
            HookType::Always => "always",
            HookType::Error => "error",
        }
    }
}

/// What a hook handler observed; mutated fields are ignored, flow control
/// goes through the returned [`HookFlow`].
#[derive(Debug)]
pub struct HookEvent {
    pub path: String,
    pub hook_type: HookType,
    pub args: Vec<Value>,
    /// The call result (after/always hooks; short-circuit value for always).
    pub result: Option<Value>,
    /// The observed failure (error hooks).
    pub error: Option<Error>,
    /// Where the failure came from: "call", "before hook", "after hook".
    pub error_source: Option<&'static str>,
}

/// Flow control returned by a hook handler.
#[derive(Debug)]
pub enum HookFlow {
    /// Keep going unchanged.
    Continue,
    /// Before hooks: replace the argument list for downstream steps.
    ReplaceArgs(Vec<Value>),
    /// Before hooks: short-circuit the call with this value.
    /// After hooks: replace the result with this value.
    Replace(Value),
}

pub type HookHandler = Arc<dyn Fn(&mut HookEvent) -> Result<HookFlow> + Send + Sync>;

/// Registration options.
#[derive(Clone, Debug)]
pub struct HookOptions {
    /// Higher runs earlier. Default 1000.
    pub priority: i64,
    /// Path pattern. Default `**`.
    pub pattern: String,
}

impl Default for HookOptions {
    fn default() -> Self {
        HookOptions {
            priority: 1000,
            pattern: "**".to_string(),
        }
    }
}

/// Listing entry returned by [`HookManager::list`].
#[derive(Clone, Debug)]
pub struct HookInfo {
    pub id: u64,
    pub hook_type: HookType,
    pub priority: i64,
    pub pattern: String,
    pub registration_order: u64,
}

struct HookEntry {
    id: u64,
    hook_type: HookType,
    handler: HookHandler,
    priority: i64,
    pattern: PathPattern,
    order: u64,
}

struct HookState {
    hooks: Vec<HookEntry>,
    next_id: u64,
    next_order: u64,
    enabled: bool,
    /// Additive filters; when non-empty, only matching paths are observed.
    filters: Vec<PathPattern>,
}

struct HookManagerInner {
    state: RwLock<HookState>,
    /// Errors already shown to error hooks, for once-per-error delivery.
    reported: Mutex<Vec<Weak<Error>>>,
}

/// Per-instance hook registry. Clones share state.
#[derive(Clone)]
pub struct HookManager {
    inner: Arc<HookManagerInner>,
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HookManager {
    pub fn new() -> Self {
        HookManager {
            inner: Arc::new(HookManagerInner {
                state: RwLock::new(HookState {
                    hooks: Vec::new(),
                    next_id: 1,
                    next_order: 0,
                    enabled: true,
                    filters: Vec::new(),
                }),
                reported: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register with default priority and the catch-all pattern.
    pub fn on<F>(&self, hook_type: HookType, handler: F) -> u64
    where
        F: Fn(&mut HookEvent) -> Result<HookFlow> + Send + Sync + 'static,
    {
        self.on_with(hook_type, HookOptions::default(), handler)
            .expect("default pattern compiles")
    }

    pub fn on_with<F>(&self, hook_type: HookType, opts: HookOptions, handler: F) -> Result<u64>
    where
        F: Fn(&mut HookEvent) -> Result<HookFlow> + Send + Sync + 'static,
    {
        let pattern = PathPattern::compile(&opts.pattern)?;
        let mut state = self.inner.state.write().expect("hook state");
        let id = state.next_id;
        state.next_id += 1;
        let order = state.next_order;
        state.next_order += 1;
        state.hooks.push(HookEntry {
            id,
            hook_type,
            handler: Arc::new(handler),
            priority: opts.priority,
            pattern,
            order,
        });
        Ok(id)
    }

    /// Remove one hook by id.
    pub fn off(&self, id: u64) -> bool {
        let mut state = self.inner.state.write().expect("hook state");
        let before = state.hooks.len();
        state.hooks.retain(|h| h.id != id);
        state.hooks.len() != before
    }

    /// Remove every hook registered under this exact pattern string.
    pub fn off_pattern(&self, pattern: &str) -> usize {
        let mut state = self.inner.state.write().expect("hook state");
        let before = state.hooks.len();
        state.hooks.retain(|h| h.pattern.raw() != pattern);
        before - state.hooks.len()
    }

    /// Drop hooks of one type, or all of them.
    pub fn clear(&self, hook_type: Option<HookType>) {
        let mut state = self.inner.state.write().expect("hook state");
        match hook_type {
            Some(t) => state.hooks.retain(|h| h.hook_type != t),
            None => state.hooks.clear(),
        }
    }

    /// Open the global gate; with a pattern, also add an observe filter.
    pub fn enable(&self, pattern: Option<&str>) -> Result<()> {
        let compiled = pattern.map(PathPattern::compile).transpose()?;
        let mut state = self.inner.state.write().expect("hook state");
        state.enabled = true;
        match compiled {
            Some(p) => state.filters.push(p),
            None => state.filters.clear(),
        }
        Ok(())
    }

    /// Close the global gate; with a pattern, only retract that filter.
    pub fn disable(&self, pattern: Option<&str>) {
        let mut state = self.inner.state.write().expect("hook state");
        match pattern {
            Some(p) => state.filters.retain(|f| f.raw() != p),
            None => state.enabled = false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.read().expect("hook state").enabled
    }

    /// Whether dispatch at `path` observes hooks at all.
    pub fn should_observe(&self, path: &str) -> bool {
        let state = self.inner.state.read().expect("hook state");
        if !state.enabled {
            return false;
        }
        state.filters.is_empty() || state.filters.iter().any(|f| f.matches(path))
    }

    pub fn list(&self, hook_type: Option<HookType>) -> Vec<HookInfo> {
        let state = self.inner.state.read().expect("hook state");
        state
            .hooks
            .iter()
            .filter(|h| hook_type.is_none_or(|t| h.hook_type == t))
            .map(|h| HookInfo {
                id: h.id,
                hook_type: h.hook_type,
                priority: h.priority,
                pattern: h.pattern.raw().to_string(),
                registration_order: h.order,
            })
            .collect()
    }

    /// Snapshot of the handlers to run for `path`, in execution order.
    /// Dispatch holds this snapshot: a hook registered mid-call affects only
    /// later calls.
    pub(crate) fn select(&self, hook_type: HookType, path: &str) -> Vec<(u64, HookHandler)> {
        let state = self.inner.state.read().expect("hook state");
        let mut matching: Vec<&HookEntry> = state
            .hooks
            .iter()
            .filter(|h| h.hook_type == hook_type && h.pattern.matches(path))
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        matching
            .into_iter()
            .map(|h| (h.id, h.handler.clone()))
            .collect()
    }

    /// Record an error for once-only delivery to error hooks. Returns false
    /// when this exact error was already delivered.
    pub(crate) fn mark_reported(&self, err: &Arc<Error>) -> bool {
        let mut reported = self.inner.reported.lock().expect("reported set");
        reported.retain(|w| w.upgrade().is_some());
        if reported
            .iter()
            .any(|w| w.upgrade().is_some_and(|e| Arc::ptr_eq(&e, err)))
        {
            return false;
        }
        reported.push(Arc::downgrade(err));
        true
    }

    /// Shutdown: drop every hook and close the gate.
    pub(crate) fn shutdown(&self) {
        self.clear(None);
        self.disable(None);
    }
}
