//! Engine A: ambient propagation via a task-local scope.
//!
//! Every dispatched call runs inside a scope keyed by the owning instance
//! id. The synchronous prefix runs under `sync_scope`; a pending future is
//! wrapped in `scope`, so all awaited continuations inherit the id. Parallel
//! chains are fully isolated from each other.

use crate::value::{FnValue, Outcome, Value};

tokio::task_local! {
    static ACTIVE: String;
}

/// The instance id of the ambient scope enclosing the caller, if any.
pub(crate) fn current() -> Option<String> {
    ACTIVE.try_with(|id| id.clone()).ok()
}

/// Invoke `f` inside the instance's ambient scope.
pub(crate) fn call_scoped(id: &str, f: &FnValue, args: Vec<Value>) -> Outcome {
    let out = ACTIVE.sync_scope(id.to_string(), || f.call(args));
    match out {
        Outcome::Pending(fut) => Outcome::Pending(Box::pin(ACTIVE.scope(id.to_string(), fut))),
        ready => ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    #[tokio::test]
    async fn scope_survives_await_points() {
        let f = FnValue::asynch("probe", |_| async {
            let before = current();
            tokio::task::yield_now().await;
            let after = current();
            assert_eq!(before, after);
            Ok(Value::Str(after.unwrap_or_default()))
        });
        let out = call_scoped("inst-a", &f, Vec::new()).resolve().await;
        assert_eq!(out.expect("call"), Value::Str("inst-a".into()));
    }

    #[tokio::test]
    async fn parallel_chains_are_isolated() {
        let f = FnValue::asynch("whoami", |_| async {
            tokio::task::yield_now().await;
            Ok(Value::Str(current().unwrap_or_default()))
        });

        let fa = call_scoped("inst-1", &f, Vec::new()).resolve();
        let fb = call_scoped("inst-2", &f, Vec::new()).resolve();
        let (ra, rb): (Result<Value>, Result<Value>) = tokio::join!(fa, fb);
        assert_eq!(ra.expect("a"), Value::Str("inst-1".into()));
        assert_eq!(rb.expect("b"), Value::Str("inst-2".into()));
    }

    #[test]
    fn no_scope_outside_calls() {
        assert!(current().is_none());
    }
}
