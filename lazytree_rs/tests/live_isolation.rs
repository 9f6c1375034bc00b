//! Live-reference locality: many instances in one process, each call
//! observing its own instance's context, across async interleaving, under
//! both engines. Plus shutdown isolation.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lazytree::config::Engine;
use lazytree::hooks::{HookFlow, HookType};
use lazytree::resolver::RegistryResolver;
use lazytree::value::Map;
use lazytree::{BoundApi, Error, Value, current};
use serial_test::serial;

fn user_registry() -> Arc<RegistryResolver> {
    let registry = Arc::new(RegistryResolver::new());
    registry.module("users/api.rs", |m| {
        m.named_async_fn("getUser", |_| async {
            // read, interleave, read again: the hosting instance must not
            // change across the await point
            let first = current::context_get("user");
            tokio::task::yield_now().await;
            let second = current::context_get("user");
            assert_eq!(first, second, "context changed across await");
            Ok(second.unwrap_or(Value::Null))
        })
        .named_fn("whoami", |_| {
            Ok(Value::Str(current::instance_id().unwrap_or_default()))
        });
    });
    registry
}

fn instance_with_user(
    tmp: &tempfile::TempDir,
    registry: Arc<RegistryResolver>,
    engine: Engine,
    user: &str,
) -> BoundApi {
    let mut opts = common::options(tmp.path(), registry);
    opts.engine = Some(engine);
    opts.context = Map::from_iter([("user".to_string(), Value::Str(user.into()))]);
    lazytree::load(opts).expect("load")
}

async fn hammer(api: BoundApi, expected: &str, rounds: usize) {
    for _ in 0..rounds {
        let out = api
            .call("users.api.getUser", Vec::new())
            .await
            .expect("getUser");
        assert_eq!(out, Value::Str(expected.into()));
        tokio::task::yield_now().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ambient_engine_isolates_interleaved_instances() {
    let tmp = common::tree(&["users/api.rs", "users/other.rs"]);
    let registry = user_registry();
    registry.module("users/other.rs", |m| {
        m.named("placeholder", Value::Null);
    });

    let i1 = instance_with_user(&tmp, registry.clone(), Engine::Ambient, "A");
    let i2 = instance_with_user(&tmp, registry.clone(), Engine::Ambient, "B");
    assert_ne!(i1.instance_id(), i2.instance_id());

    tokio::join!(
        hammer(i1.clone(), "A", 25),
        hammer(i2.clone(), "B", 25),
        hammer(i1.clone(), "A", 25),
        hammer(i2.clone(), "B", 25),
    );
}

#[tokio::test]
#[serial]
async fn identity_engine_isolates_interleaved_instances() {
    let tmp = common::tree(&["users/api.rs", "users/other.rs"]);
    let registry = user_registry();
    registry.module("users/other.rs", |m| {
        m.named("placeholder", Value::Null);
    });

    let i1 = instance_with_user(&tmp, registry.clone(), Engine::Identity, "A");
    let i2 = instance_with_user(&tmp, registry.clone(), Engine::Identity, "B");

    tokio::join!(hammer(i1.clone(), "A", 25), hammer(i2.clone(), "B", 25));
}

#[tokio::test]
async fn context_writes_propagate_into_running_calls() {
    let tmp = common::tree(&["users/api.rs"]);
    let api = instance_with_user(&tmp, user_registry(), Engine::Ambient, "initial");

    let out = api.call("users.api.getUser", Vec::new()).await.expect("call");
    assert_eq!(out, Value::Str("initial".into()));

    // external write through the live handle
    api.context().set("user", Value::Str("updated".into()));
    let out = api.call("users.api.getUser", Vec::new()).await.expect("call");
    assert_eq!(out, Value::Str("updated".into()));
}

#[tokio::test]
async fn module_code_sees_its_own_instance_id() {
    let tmp = common::tree(&["users/api.rs"]);
    let registry = user_registry();
    let i1 = instance_with_user(&tmp, registry.clone(), Engine::Ambient, "A");
    let i2 = instance_with_user(&tmp, registry, Engine::Ambient, "B");

    let id1 = i1.call("users.api.whoami", Vec::new()).await.expect("call");
    let id2 = i2.call("users.api.whoami", Vec::new()).await.expect("call");
    assert_eq!(id1, Value::Str(i1.instance_id().to_string()));
    assert_eq!(id2, Value::Str(i2.instance_id().to_string()));
}

#[tokio::test]
async fn shutdown_fully_isolates() {
    let tmp = common::tree(&["users/api.rs"]);
    let registry = user_registry();
    let i1 = instance_with_user(&tmp, registry.clone(), Engine::Ambient, "A");
    let i2 = instance_with_user(&tmp, registry, Engine::Ambient, "B");

    let i1_hook_hits = Arc::new(AtomicUsize::new(0));
    {
        let hits = i1_hook_hits.clone();
        i1.hooks().on(HookType::Before, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(HookFlow::Continue)
        });
    }

    i1.call("users.api.getUser", Vec::new()).await.expect("warm");
    assert_eq!(i1_hook_hits.load(Ordering::SeqCst), 1);

    i1.shutdown().expect("shutdown");

    // the dead instance rejects everything
    assert!(matches!(
        i1.call("users.api.getUser", Vec::new()).await,
        Err(Error::Shutdown)
    ));
    assert!(matches!(i1.get("users"), Err(Error::Shutdown)));
    assert!(i1.shutdown().is_err());

    // the survivor is untouched, and the dead instance's hooks never fire
    let out = i2.call("users.api.getUser", Vec::new()).await.expect("i2");
    assert_eq!(out, Value::Str("B".into()));
    assert_eq!(i1_hook_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reference_map_is_live_per_instance() {
    let tmp = common::tree(&["users/api.rs"]);
    let registry = user_registry();
    registry.module("users/api.rs", |m| {
        m.named_fn("readRef", |_| {
            Ok(current::reference()
                .and_then(|r| r.get("shared"))
                .unwrap_or(Value::Null))
        });
    });

    let mut opts = common::options(tmp.path(), registry);
    opts.reference = Map::from_iter([("shared".to_string(), Value::Int(1))]);
    let api = lazytree::load(opts).expect("load");

    let out = api.call("users.api.readRef", Vec::new()).await.expect("call");
    assert_eq!(out, Value::Int(1));

    api.reference().set("shared", Value::Int(2));
    let out = api.call("users.api.readRef", Vec::new()).await.expect("call");
    assert_eq!(out, Value::Int(2));
}
