//! Process-wide instance registry.
//!
//! Maps instance ids to their live-reference targets, hook manager, and
//! engine choice. Mutated only by the loader, `add_api`/`remove_api`
//! bookkeeping, and `cleanup`; concurrent isolation between calls comes from
//! the runtime engines, not from this map. Also hosts the single "currently
//! active instance" slot the identity engine saves and restores around every
//! dispatched call.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, RwLock};

use crate::config::Engine;
use crate::hooks::HookManager;
use crate::value::{ObjectRef, Value};

/// Everything the runtime needs to serve one instance.
#[derive(Clone)]
pub(crate) struct InstanceEntry {
    /// The instance's API root (the `self` live-reference target).
    pub self_root: Value,
    pub context: ObjectRef,
    pub reference: ObjectRef,
    pub hooks: HookManager,
    pub engine: Engine,
    pub debug: bool,
}

fn registry() -> &'static RwLock<HashMap<String, InstanceEntry>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, InstanceEntry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

pub(crate) fn register(id: &str, entry: InstanceEntry) {
    registry()
        .write()
        .expect("instance registry")
        .insert(id.to_string(), entry);
}

pub(crate) fn update(id: &str, apply: impl FnOnce(&mut InstanceEntry)) {
    if let Some(entry) = registry().write().expect("instance registry").get_mut(id) {
        apply(entry);
    }
}

pub(crate) fn get(id: &str) -> Option<InstanceEntry> {
    registry().read().expect("instance registry").get(id).cloned()
}

pub(crate) fn cleanup(id: &str) -> bool {
    registry()
        .write()
        .expect("instance registry")
        .remove(id)
        .is_some()
}

fn active_slot() -> &'static Mutex<Option<String>> {
    static ACTIVE: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(None))
}

/// The identity engine's "currently active instance" slot.
pub(crate) fn current_active() -> Option<String> {
    active_slot().lock().expect("active slot").clone()
}

/// Swap the active slot, returning the previous occupant. Callers MUST
/// restore the previous value when their call finishes, throw or not.
pub(crate) fn swap_active(next: Option<String>) -> Option<String> {
    std::mem::replace(&mut *active_slot().lock().expect("active slot"), next)
}
