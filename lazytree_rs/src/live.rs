//! Live-binding mutation: rewrite a persistent object or function target in
//! place so externally held references observe the new shape.

use crate::value::{FnValue, ObjectRef, Value};

/// Management member names that survive in-place rewrites.
pub(crate) const RESERVED_KEYS: &[&str] = &[
    "shutdown",
    "add_api",
    "remove_api",
    "reload",
    "describe",
    "run",
    "instance_id",
    "scope",
];

/// Keys the mutator and the metadata tagger never touch: anything with a
/// leading underscore, plus the management member names.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('_') || RESERVED_KEYS.contains(&key)
}

/// Rewrite `target`'s entries to mirror `source`, keeping reserved keys.
pub fn rebind_object(target: &ObjectRef, source: &ObjectRef) {
    target.retain_keys(is_reserved_key);
    for (key, value) in source.entries() {
        if target.has(&key) && is_reserved_key(&key) {
            continue;
        }
        target.set(key, value);
    }
}

/// Redirect `target` to forward to `source` and mirror its attached props.
pub fn rebind_function(target: &FnValue, source: &FnValue) {
    target.forward_to(source);
    target.props().retain_keys(is_reserved_key);
    for (key, value) in source.props().entries() {
        if target.props().has(&key) && is_reserved_key(&key) {
            continue;
        }
        target.props().set(key, value);
    }
    let name = source.name();
    target.with_tag_mut(|tag| {
        tag.name = name;
        tag.from_default = source.tag().from_default;
    });
}

/// Mutate `target` in place to match `source` when their shapes allow it.
/// Returns false when no identity-preserving rewrite exists (caller must
/// replace the slot instead).
pub fn rebind_value(target: &Value, source: &Value) -> bool {
    match (target, source) {
        (Value::Object(t), Value::Object(s)) => {
            if !t.ptr_eq(s) {
                rebind_object(t, s);
            }
            true
        }
        (Value::Function(t), Value::Function(s)) => {
            if !t.ptr_eq(s) {
                rebind_function(t, s);
            }
            true
        }
        _ => false,
    }
}
