//! The runtime dispatcher: engine scoping plus the hook pipeline around
//! every API call.
//!
//! Pipeline: untagged functions (and gated-off paths) bypass hooks entirely;
//! otherwise before hooks run in order and may replace arguments or
//! short-circuit, the target runs inside its engine scope, then after hooks
//! chain the result and always hooks observe it. Failures route through
//! error hooks exactly once per error; before/after hook failures interrupt
//! the call, always/error hook failures are logged and swallowed.

pub(crate) mod ambient;
pub mod current;
pub(crate) mod identity;
pub(crate) mod wrap;

use std::sync::Arc;

use crate::config::Engine;
use crate::error::Error;
use crate::hooks::{HookEvent, HookFlow, HookManager, HookType};
use crate::registry::{self, InstanceEntry};
use crate::value::{CallResult, FnValue, Outcome, Value};

/// Invoke `f` inside the instance's engine scope, no hooks.
pub(crate) fn engine_call(id: &str, engine: Engine, f: &FnValue, args: Vec<Value>) -> Outcome {
    match engine {
        Engine::Ambient => ambient::call_scoped(id, f, args),
        Engine::Identity => identity::call_scoped(id, f, args),
    }
}

/// Dispatch a bare function handle through the instance that materialized
/// it, resolved from the identity tag written at load time. Untagged
/// functions (and functions whose instance is gone) run as plain calls.
pub async fn invoke(f: &FnValue, args: Vec<Value>) -> CallResult {
    let owner = f
        .tag()
        .instance
        .and_then(|id| registry::get(&id).map(|entry| (id, entry)));
    match owner {
        Some((id, entry)) => dispatch(&id, &entry, f, args).resolve().await,
        None => f.call(args).resolve().await,
    }
}

/// Dispatch one API call through the full pipeline.
pub(crate) fn dispatch(id: &str, entry: &InstanceEntry, f: &FnValue, args: Vec<Value>) -> Outcome {
    let tag_path = f.path();
    let observed = tag_path
        .as_ref()
        .map(|p| entry.hooks.should_observe(p))
        .unwrap_or(false);

    if !observed {
        let id_owned = id.to_string();
        return match engine_call(id, entry.engine, f, args) {
            Outcome::Ready(res) => Outcome::Ready(res.map(|v| wrap::wrap_result(v, &id_owned))),
            Outcome::Pending(fut) => Outcome::Pending(Box::pin(async move {
                fut.await.map(|v| wrap::wrap_result(v, &id_owned))
            })),
        };
    }

    let path = tag_path.expect("observed implies tagged");
    let hooks = entry.hooks.clone();
    let mut args = args;

    for (_, handler) in hooks.select(HookType::Before, &path) {
        let mut event = event_for(&path, HookType::Before, &args);
        match handler(&mut event) {
            Ok(HookFlow::Continue) => {}
            Ok(HookFlow::ReplaceArgs(next)) => args = next,
            Ok(HookFlow::Replace(value)) => {
                // short-circuit: skip the target and the remaining
                // before/after hooks; always hooks still observe the value
                run_always(&hooks, &path, &args, &value);
                return Outcome::ready(value);
            }
            Err(e) => {
                let failure = Arc::new(Error::Hook {
                    phase: "before",
                    path: path.clone(),
                    message: e.to_string(),
                });
                run_error_hooks(&hooks, &path, &args, &failure, "before hook");
                return Outcome::Ready(Err(failure.as_ref().clone()));
            }
        }
    }

    let outcome = engine_call(id, entry.engine, f, args.clone());
    let id_owned = id.to_string();
    match outcome {
        Outcome::Ready(res) => Outcome::Ready(conclude(&id_owned, &hooks, &path, &args, res)),
        Outcome::Pending(fut) => Outcome::Pending(Box::pin(async move {
            let res = fut.await;
            conclude(&id_owned, &hooks, &path, &args, res)
        })),
    }
}

fn event_for(path: &str, hook_type: HookType, args: &[Value]) -> HookEvent {
    HookEvent {
        path: path.to_string(),
        hook_type,
        args: args.to_vec(),
        result: None,
        error: None,
        error_source: None,
    }
}

/// After/always processing shared by the sync and pending arms.
fn conclude(
    id: &str,
    hooks: &HookManager,
    path: &str,
    args: &[Value],
    res: CallResult,
) -> CallResult {
    match res {
        Ok(value) => {
            let mut value = wrap::wrap_result(value, id);
            for (_, handler) in hooks.select(HookType::After, path) {
                let mut event = event_for(path, HookType::After, args);
                event.result = Some(value.clone());
                match handler(&mut event) {
                    Ok(HookFlow::Replace(next)) => value = next,
                    Ok(_) => {}
                    Err(e) => {
                        let failure = Arc::new(Error::Hook {
                            phase: "after",
                            path: path.to_string(),
                            message: e.to_string(),
                        });
                        run_error_hooks(hooks, path, args, &failure, "after hook");
                        return Err(failure.as_ref().clone());
                    }
                }
            }
            run_always(hooks, path, args, &value);
            Ok(value)
        }
        Err(e) => {
            let failure = Arc::new(e);
            run_error_hooks(hooks, path, args, &failure, "call");
            Err(failure.as_ref().clone())
        }
    }
}

/// Always hooks observe the final result; their failures never interrupt.
fn run_always(hooks: &HookManager, path: &str, args: &[Value], result: &Value) {
    for (_, handler) in hooks.select(HookType::Always, path) {
        let mut event = event_for(path, HookType::Always, args);
        event.result = Some(result.clone());
        if let Err(e) = handler(&mut event) {
            eprintln!("[lazytree][warn] always hook failed for '{path}': {e}");
        }
    }
}

/// Error hooks observe each error at most once; their failures never
/// interrupt.
fn run_error_hooks(
    hooks: &HookManager,
    path: &str,
    args: &[Value],
    error: &Arc<Error>,
    source: &'static str,
) {
    if !hooks.mark_reported(error) {
        return;
    }
    for (_, handler) in hooks.select(HookType::Error, path) {
        let mut event = event_for(path, HookType::Error, args);
        event.error = Some(error.as_ref().clone());
        event.error_source = Some(source);
        if let Err(e) = handler(&mut event) {
            eprintln!("[lazytree][warn] error hook failed for '{path}': {e}");
        }
    }
}
