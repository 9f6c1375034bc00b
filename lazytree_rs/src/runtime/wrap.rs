//! Result wrapping: callables returned from API calls keep dispatching
//! under their owning instance's engine when invoked later.
//!
//! Wrapping is memoized per target function so repeated calls hand back the
//! same wrapper identity; the cache holds weak references only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::registry;
use crate::value::{FnValue, FnWeak, NativeImpl, Value};

struct WrapCache {
    /// original fn address -> (original, wrapper)
    by_original: HashMap<usize, (FnWeak, FnWeak)>,
    /// wrapper fn address -> wrapper (double-wrap guard)
    wrappers: HashMap<usize, FnWeak>,
}

impl WrapCache {
    fn prune(&mut self) {
        self.by_original
            .retain(|_, (orig, wrapper)| orig.upgrade().is_some() && wrapper.upgrade().is_some());
        self.wrappers.retain(|_, w| w.upgrade().is_some());
    }
}

static CACHE: Lazy<Mutex<WrapCache>> = Lazy::new(|| {
    Mutex::new(WrapCache {
        by_original: HashMap::new(),
        wrappers: HashMap::new(),
    })
});

/// Wrap the callable arm of a call result; other values pass through.
pub(crate) fn wrap_result(value: Value, instance: &str) -> Value {
    match value {
        Value::Function(f) => Value::Function(wrap_function(&f, instance)),
        other => other,
    }
}

pub(crate) fn wrap_function(f: &FnValue, instance: &str) -> FnValue {
    let mut cache = CACHE.lock().expect("wrap cache");
    cache.prune();

    // already a wrapper: hand it back untouched
    if let Some(known) = cache.wrappers.get(&f.addr())
        && let Some(wrapper) = known.upgrade()
        && wrapper.ptr_eq(f)
    {
        return wrapper;
    }

    if let Some((orig_weak, wrap_weak)) = cache.by_original.get(&f.addr())
        && let (Some(original), Some(wrapper)) = (orig_weak.upgrade(), wrap_weak.upgrade())
        && original.ptr_eq(f)
    {
        return wrapper;
    }

    let original = f.clone();
    let id = instance.to_string();
    let imp: NativeImpl = Arc::new(move |args| match registry::get(&id) {
        Some(entry) => super::dispatch(&id, &entry, &original, args),
        // the owning instance is gone; the bare call still works
        None => original.call(args),
    });
    let name = f.name();
    let wrapper = FnValue::new_with_props(name.as_deref(), imp, f.props().clone());

    cache
        .by_original
        .insert(f.addr(), (f.weak(), wrapper.weak()));
    cache.wrappers.insert(wrapper.addr(), wrapper.weak());
    wrapper
}
