//! Engine B: identity-tagged dispatch through the registry's single
//! "currently active instance" slot.
//!
//! The slot is saved before and restored after every dispatched call, drop
//! guards included, so a panic cannot leave it dirty. Pending futures are
//! wrapped so the slot is set around every poll. The slot is still a single
//! process-wide variable: it must never be relied on across unrelated async
//! seams, which is why the ambient engine is the default.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;

use crate::registry;
use crate::value::{CallResult, FnValue, Outcome, Value};

pub(crate) fn current() -> Option<String> {
    registry::current_active()
}

/// Save/set/restore guard around one synchronous call section.
struct ActiveGuard {
    prev: Option<String>,
}

impl ActiveGuard {
    fn enter(id: &str) -> Self {
        ActiveGuard {
            prev: registry::swap_active(Some(id.to_string())),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        registry::swap_active(self.prev.take());
    }
}

/// Future wrapper that holds the slot only while polling.
struct SlotScoped {
    id: String,
    fut: BoxFuture<'static, CallResult>,
}

impl std::future::Future for SlotScoped {
    type Output = CallResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _guard = ActiveGuard::enter(&this.id);
        this.fut.as_mut().poll(cx)
    }
}

/// Invoke `f` with the active-instance slot set to `id`.
pub(crate) fn call_scoped(id: &str, f: &FnValue, args: Vec<Value>) -> Outcome {
    let out = {
        let _guard = ActiveGuard::enter(id);
        f.call(args)
    };
    match out {
        Outcome::Pending(fut) => Outcome::Pending(Box::pin(SlotScoped {
            id: id.to_string(),
            fut,
        })),
        ready => ready,
    }
}
