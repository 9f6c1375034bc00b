//! Hook pipeline laws (ordering, short-circuit) and the add/remove API
//! rollback law, exercised end-to-end through a loaded instance.

mod common;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use lazytree::hooks::{HookFlow, HookOptions, HookType};
use lazytree::ownership::AddApiOptions;
use lazytree::resolver::RegistryResolver;
use lazytree::{BoundApi, Value};

fn math_fixture() -> (tempfile::TempDir, BoundApi, Arc<AtomicUsize>) {
    let tmp = common::tree(&["math/add.rs"]);
    let registry = Arc::new(RegistryResolver::new());
    let add_runs = Arc::new(AtomicUsize::new(0));
    {
        let add_runs = add_runs.clone();
        registry.module("math/add.rs", move |m| {
            let add_runs = add_runs.clone();
            m.named_fn("add", move |args| {
                add_runs.fetch_add(1, Ordering::SeqCst);
                let a = args.first().and_then(Value::as_int).unwrap_or(0);
                let b = args.get(1).and_then(Value::as_int).unwrap_or(0);
                Ok(Value::Int(a + b))
            });
        });
    }
    let api = lazytree::load(common::options(tmp.path(), registry)).expect("load");
    (tmp, api, add_runs)
}

#[tokio::test]
async fn short_circuit_skips_chain_and_target() {
    let (_tmp, api, add_runs) = math_fixture();
    let low_ran = Arc::new(AtomicUsize::new(0));
    let always_saw = Arc::new(Mutex::new(None));

    api.hooks()
        .on_with(
            HookType::Before,
            HookOptions {
                priority: 200,
                pattern: "math.*".into(),
            },
            |_| Ok(HookFlow::Replace(Value::Str("cached".into()))),
        )
        .expect("register");
    {
        let low_ran = low_ran.clone();
        api.hooks()
            .on_with(
                HookType::Before,
                HookOptions {
                    priority: 100,
                    pattern: "math.*".into(),
                },
                move |_| {
                    low_ran.fetch_add(1, Ordering::SeqCst);
                    Ok(HookFlow::Continue)
                },
            )
            .expect("register");
    }
    {
        let always_saw = always_saw.clone();
        api.hooks().on(HookType::Always, move |event| {
            *always_saw.lock().expect("seen") = event.result.clone();
            Ok(HookFlow::Continue)
        });
    }

    let out = api
        .call("math.add", vec![Value::Int(1), Value::Int(2)])
        .await
        .expect("call");

    assert_eq!(out, Value::Str("cached".into()));
    assert_eq!(low_ran.load(Ordering::SeqCst), 0, "lower priority skipped");
    assert_eq!(add_runs.load(Ordering::SeqCst), 0, "target not invoked");
    assert_eq!(
        *always_saw.lock().expect("seen"),
        Some(Value::Str("cached".into()))
    );
}

#[tokio::test]
async fn before_ordering_is_deterministic() {
    let (_tmp, api, _) = math_fixture();
    let order = Arc::new(Mutex::new(Vec::new()));

    for (label, priority) in [("b", 500), ("a", 900), ("c", 500)] {
        let order = order.clone();
        api.hooks()
            .on_with(
                HookType::Before,
                HookOptions {
                    priority,
                    pattern: "**".into(),
                },
                move |_| {
                    order.lock().expect("order").push(label);
                    Ok(HookFlow::Continue)
                },
            )
            .expect("register");
    }

    for _ in 0..3 {
        order.lock().expect("order").clear();
        api.call("math.add", vec![Value::Int(1), Value::Int(1)])
            .await
            .expect("call");
        // priority desc, then registration order asc for the tie
        assert_eq!(*order.lock().expect("order"), vec!["a", "b", "c"]);
    }
}

#[tokio::test]
async fn replaced_arguments_flow_downstream() {
    let (_tmp, api, _) = math_fixture();
    api.hooks().on(HookType::Before, |_| {
        Ok(HookFlow::ReplaceArgs(vec![Value::Int(40), Value::Int(2)]))
    });
    let out = api
        .call("math.add", vec![Value::Int(0), Value::Int(0)])
        .await
        .expect("call");
    assert_eq!(out, Value::Int(42));
}

fn plugin_fixtures() -> (tempfile::TempDir, tempfile::TempDir, BoundApi) {
    let root = common::tree(&["plugins/x.rs"]);
    let v2 = common::tree(&["v2mod/x.rs"]);

    let registry = Arc::new(RegistryResolver::new());
    registry.module("plugins/x.rs", |m| {
        m.named_fn("x", |_| Ok(Value::Str("v1".into())));
    });
    registry.module("v2mod/x.rs", |m| {
        m.named_fn("x", |_| Ok(Value::Str("v2".into())));
    });

    let api = lazytree::load(common::options(root.path(), registry)).expect("load");
    (root, v2, api)
}

#[tokio::test]
async fn rollback_restores_prior_owner_and_external_refs() {
    let (_root, v2, api) = plugin_fixtures();

    let before = api
        .call("plugins.x", vec![Value::Null])
        .await
        .expect("initial");
    assert_eq!(before, Value::Str("v1".into()));

    api.add_api(
        "plugins.x",
        &v2.path().join("v2mod"),
        Some("m2"),
        AddApiOptions::default(),
    )
    .expect("add v2");

    let during = api
        .call("plugins.x", vec![Value::Null])
        .await
        .expect("shadowed");
    assert_eq!(during, Value::Str("v2".into()));
    assert_eq!(api.ownership_stack("plugins.x"), vec!["core", "m2"]);

    // external reference captured while v2 serves
    let external = api.get("plugins.x").expect("external ref");

    api.remove_owner("m2").expect("remove m2");

    let after = api
        .call("plugins.x", vec![Value::Null])
        .await
        .expect("rolled back");
    assert_eq!(after, Value::Str("v1".into()));
    assert_eq!(api.ownership_stack("plugins.x"), vec!["core"]);

    // the captured handle still works and now serves v1, even when invoked
    // without the bound api (dispatch resolves the owning instance from the
    // identity tag)
    let f = external.as_function().expect("function");
    let out = lazytree::runtime::invoke(f, Vec::new())
        .await
        .expect("direct call");
    assert_eq!(out, Value::Str("v1".into()));
}

#[tokio::test]
async fn removing_last_owner_deletes_and_prunes() {
    let (_root, extra, api) = plugin_fixtures();

    api.add_api(
        "plugins.fresh",
        &extra.path().join("v2mod"),
        Some("mod-f"),
        AddApiOptions::default(),
    )
    .expect("add");
    assert!(api.has("plugins.fresh"));

    api.remove_api("plugins.fresh", None).expect("remove");
    assert!(!api.has("plugins.fresh"));
    // plugins itself survives: it still holds x
    assert!(api.has("plugins.x"));

    // grafting into a brand new branch, then removing it, prunes the branch
    api.add_api(
        "extras.tools.x",
        &extra.path().join("v2mod"),
        Some("mod-t"),
        AddApiOptions::default(),
    )
    .expect("add branch");
    assert!(api.has("extras.tools.x"));
    api.remove_owner("mod-t").expect("remove branch");
    assert!(!api.has("extras.tools.x"));
    assert!(!api.has("extras"), "empty parents pruned bottom-up");
}

#[tokio::test]
async fn shadowed_owner_removal_keeps_current_state() {
    let (_root, v2, api) = plugin_fixtures();

    api.add_api(
        "plugins.x",
        &v2.path().join("v2mod"),
        Some("m2"),
        AddApiOptions::default(),
    )
    .expect("add v2");

    // evict the shadowed core owner; m2 keeps serving
    api.remove_api("plugins.x", Some("core")).expect("evict core");
    let out = api.call("plugins.x", vec![Value::Null]).await.expect("call");
    assert_eq!(out, Value::Str("v2".into()));
    assert_eq!(api.ownership_stack("plugins.x"), vec!["m2"]);
}

#[tokio::test]
async fn ownership_stays_consistent_through_add_and_remove() {
    let (_root, v2, api) = plugin_fixtures();
    let folder = v2.path().join("v2mod");

    api.add_api("plugins.x", &folder, Some("a"), AddApiOptions::default())
        .expect("add a");
    api.add_api("plugins.x", &folder, Some("b"), AddApiOptions::default())
        .expect("add b");

    assert_eq!(api.ownership_stack("plugins.x"), vec!["core", "a", "b"]);
    assert_eq!(api.owned_paths("a"), vec!["plugins.x"]);
    assert_eq!(api.owned_paths("b"), vec!["plugins.x"]);

    api.remove_api("plugins.x", Some("a")).expect("remove a");
    assert_eq!(api.ownership_stack("plugins.x"), vec!["core", "b"]);
    assert!(api.owned_paths("a").is_empty());

    let out = api.call("plugins.x", vec![Value::Null]).await.expect("call");
    assert_eq!(out, Value::Str("v2".into()), "b still serves");
}
