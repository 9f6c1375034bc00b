//! Live references for user module code.
//!
//! From inside any dispatched call, these resolve against the instance
//! hosting *this* call, under either engine, across await points. Reads see
//! live state; writes through the returned handles propagate to the
//! instance. Outside a dispatched call they return `None`.

use crate::registry;
use crate::value::{ObjectRef, Value};

use super::{ambient, identity};

/// The instance id hosting the current call.
pub fn instance_id() -> Option<String> {
    ambient::current().or_else(identity::current)
}

/// The hosting instance's API root (the `self` reference).
pub fn api() -> Option<Value> {
    registry::get(&instance_id()?).map(|entry| entry.self_root)
}

/// The hosting instance's context map.
pub fn context() -> Option<ObjectRef> {
    registry::get(&instance_id()?).map(|entry| entry.context)
}

/// The hosting instance's reference map.
pub fn reference() -> Option<ObjectRef> {
    registry::get(&instance_id()?).map(|entry| entry.reference)
}

/// Context lookup shorthand for module code.
pub fn context_get(key: &str) -> Option<Value> {
    context()?.get(key)
}
