//! The category/root builder: depth-first directory walk producing the API
//! tree, eager values or lazy slots per the configured mode.

use std::path::Path;
use std::sync::Arc;

use crate::analyze::{analyze_directory, analyze_module};
use crate::config::{Mode, Resolved};
use crate::error::{Error, Result};
use crate::flatten::{Decision, decide};
use crate::fs_utils::{list_dir, stem_of};
use crate::lazy::LazySlot;
use crate::sanitize::sanitize_key;
use crate::value::{FnValue, ObjectRef, Value};

/// Everything a build (initial load, lazy materialization, `add_api` graft,
/// reload) needs; shared behind an `Arc` so lazy slots can re-enter.
pub(crate) struct LoaderCtx {
    /// Owning instance id, written into every function tag.
    pub id: String,
    pub res: Resolved,
}

impl LoaderCtx {
    fn debug(&self, msg: impl AsRef<str>) {
        if self.res.debug {
            eprintln!("[lazytree] {}", msg.as_ref());
        }
    }
}

/// Build the whole tree from the configured root directory.
pub(crate) fn build_root(ctx: &Arc<LoaderCtx>) -> Result<Value> {
    let root_key = sanitize_key(&stem_of(&ctx.res.dir), &ctx.res.rules);
    let value = build_dir(ctx, &ctx.res.dir.clone(), &root_key, 0, "")?;
    Ok(value)
}

/// Build one subtree rooted at `path` for grafting under the dotted
/// `slot_path` (used by `add_api`; grafts always build eagerly so their
/// paths can be enumerated for ownership tracking).
pub(crate) fn build_graft(ctx: &Arc<LoaderCtx>, folder: &Path, slot_path: &str) -> Result<Value> {
    let segments: Vec<&str> = slot_path.split('.').collect();
    let key = segments.last().copied().unwrap_or_default();
    let depth = segments.len();
    let mut res = ctx.res.clone();
    res.mode = Mode::Eager;
    res.dir = folder.to_path_buf();
    let eager = Arc::new(LoaderCtx {
        id: ctx.id.clone(),
        res,
    });
    build_dir(&eager, folder, key, depth, slot_path)
}

/// Build one directory level. `key` is the directory's sanitized key, `depth`
/// the depth of the modules inside it, `prefix` the dotted path of this
/// directory ("" at the root).
pub(crate) fn build_dir(
    ctx: &Arc<LoaderCtx>,
    dir: &Path,
    key: &str,
    depth: usize,
    prefix: &str,
) -> Result<Value> {
    ctx.debug(format!("scanning {} (depth {depth})", dir.display()));
    let listing = list_dir(dir, ctx.res.filter.as_ref())
        .map_err(|e| Error::config(format!("failed to read {}: {e}", dir.display())))?;
    let analysis = analyze_directory(
        ctx.res.resolver.as_ref(),
        &ctx.res.rules,
        dir,
        &listing,
        ctx.res.skip_broken,
    )?;
    let summary = analysis.summary();

    let category = ObjectRef::new();
    let mut category_fn: Option<FnValue> = None;
    let mut root_fn: Option<FnValue> = None;

    for probe in analysis.probes {
        let file = probe.path.clone();
        let module = match analyze_module(probe, &ctx.res.rules) {
            Ok(module) => module,
            Err(e) if ctx.res.skip_broken => {
                eprintln!("[lazytree][warn] skipping {}: {e}", file.display());
                continue;
            }
            Err(e) => return Err(e),
        };
        let decision = decide(&module, &summary, key, depth, &ctx.res.generic_names);
        ctx.debug(format!(
            "{} -> {:?} (key {})",
            file.display(),
            decision.decision,
            decision.preferred_key.as_deref().unwrap_or(&module.key)
        ));

        match decision.decision {
            Decision::PreserveNamespace => {
                let slot_key = decision.preferred_key.unwrap_or_else(|| module.key.clone());
                category.set(slot_key, module.value);
            }
            Decision::AutoFlattenSingleNamed => {
                if let Some(value) = module.named.values().next() {
                    category.set(module.key.clone(), value.clone());
                }
            }
            Decision::FlattenToParent => {
                if let Some(export_key) = decision.preferred_key {
                    if let Some(value) = module.named.values().next() {
                        category.set(export_key, value.clone());
                    }
                } else {
                    for (name, value) in module.named {
                        category.set(name, value);
                    }
                }
            }
            Decision::FlattenToCategory => match module.value {
                Value::Function(f) => {
                    if let Some(cat_key) = decision.preferred_key {
                        f.with_tag_mut(|tag| tag.name = Some(cat_key));
                    }
                    category_fn = Some(f);
                }
                Value::Object(obj) => {
                    for (name, value) in obj.entries() {
                        category.set(name, value);
                    }
                }
                other => {
                    category.set(module.key.clone(), other);
                }
            },
            Decision::UseAsRootCallable => {
                if let Value::Function(f) = module.value {
                    root_fn = Some(f);
                }
            }
        }
    }

    if depth < ctx.res.max_depth {
        for sub in &analysis.sub_dirs {
            let sub_name = sub
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let sub_key = sanitize_key(&sub_name, &ctx.res.rules);
            match ctx.res.mode {
                Mode::Eager => {
                    let child = build_dir(
                        ctx,
                        sub,
                        &sub_key,
                        depth + 1,
                        &join_prefix(prefix, &sub_key),
                    )?;
                    let child_key = prefer_child_key(&child, &sub_key);
                    if child_key != sub_key {
                        // re-tag under the spelling the key preference chose
                        tag_tree(&child, &join_prefix(prefix, &child_key), &ctx.id);
                    }
                    category.set(child_key, child);
                }
                Mode::Lazy => {
                    let (slot_key, slot_value) =
                        lazy_subdir_slot(ctx, sub, &sub_key, depth + 1, prefix)?;
                    category.set(slot_key, slot_value);
                }
            }
        }
    }

    let assembled = if let Some(f) = root_fn.or(category_fn) {
        for (name, value) in category.entries() {
            f.props().set(name, value);
        }
        Value::Function(f)
    } else if depth > 0 && category.len() == 1 {
        // a directory whose only entry carries the directory's own key
        // resolves to that entry (math/math.rs becomes api.math, not
        // api.math.math)
        let (only_key, only_value) = category.entries().remove(0);
        if only_key.eq_ignore_ascii_case(key) {
            only_value
        } else {
            Value::Object(category)
        }
    } else {
        Value::Object(category)
    };

    tag_tree(&assembled, prefix, &ctx.id);
    Ok(assembled)
}

fn join_prefix(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Builder step: a subdirectory resolving to a single callable whose name
/// case-matches the directory key (different spelling) keys under the
/// function's own name.
fn prefer_child_key(child: &Value, sub_key: &str) -> String {
    if let Value::Function(f) = child
        && let Some(name) = f.name()
        && name != sub_key
        && name.eq_ignore_ascii_case(sub_key)
    {
        return name;
    }
    sub_key.to_string()
}

/// Create the slot for a subdirectory in lazy mode.
///
/// Single-module leaf directories build eagerly: the case-preference rule
/// needs the module's function name to pick the key, and shape equivalence
/// with eager mode is worth one cheap load. Everything else becomes a true
/// lazy slot keyed by the sanitized directory name.
fn lazy_subdir_slot(
    ctx: &Arc<LoaderCtx>,
    sub: &Path,
    sub_key: &str,
    child_depth: usize,
    prefix: &str,
) -> Result<(String, Value)> {
    let listing = list_dir(sub, ctx.res.filter.as_ref())
        .map_err(|e| Error::config(format!("failed to read {}: {e}", sub.display())))?;
    if listing.files.len() == 1 && listing.dirs.is_empty() {
        let child = build_dir(ctx, sub, sub_key, child_depth, &join_prefix(prefix, sub_key))?;
        let child_key = prefer_child_key(&child, sub_key);
        if child_key != sub_key {
            tag_tree(&child, &join_prefix(prefix, &child_key), &ctx.id);
        }
        return Ok((child_key, child));
    }

    let slot_path = join_prefix(prefix, sub_key);
    let thunk_ctx = ctx.clone();
    let thunk_dir = sub.to_path_buf();
    let thunk_key = sub_key.to_string();
    let shape_ctx = ctx.clone();
    let shape_dir = sub.to_path_buf();
    let slot = LazySlot::new(
        sub.to_path_buf(),
        sub_key.to_string(),
        Box::new(move || {
            build_dir(
                &thunk_ctx,
                &thunk_dir,
                &thunk_key,
                child_depth,
                &slot_path,
            )
        }),
        Box::new(move || shape_keys(&shape_ctx, &shape_dir)),
    );
    Ok((sub_key.to_string(), Value::Lazy(slot)))
}

/// Listing-derived child keys for an unmaterialized directory slot.
fn shape_keys(ctx: &Arc<LoaderCtx>, dir: &Path) -> Result<Vec<String>> {
    let listing = list_dir(dir, ctx.res.filter.as_ref())
        .map_err(|e| Error::config(format!("failed to read {}: {e}", dir.display())))?;
    let mut keys = Vec::new();
    for file in &listing.files {
        let key = sanitize_key(&stem_of(file), &ctx.res.rules);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    for sub in &listing.dirs {
        let name = sub
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let key = sanitize_key(&name, &ctx.res.rules);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Assign dotted-path and owning-instance tags to every function reachable
/// in `value`. Lazy slots are skipped: their thunks tag their own output.
pub(crate) fn tag_tree(value: &Value, prefix: &str, instance: &str) {
    let mut visited = std::collections::HashSet::new();
    tag_walk(value, prefix, instance, &mut visited);
}

fn tag_walk(
    value: &Value,
    path: &str,
    instance: &str,
    visited: &mut std::collections::HashSet<usize>,
) {
    match value {
        Value::Function(f) => {
            if !visited.insert(f.addr()) {
                return;
            }
            let own_path = if path.is_empty() {
                f.name().unwrap_or_else(|| "root".to_string())
            } else {
                path.to_string()
            };
            f.with_tag_mut(|tag| {
                tag.path = Some(own_path);
                tag.instance = Some(instance.to_string());
            });
            for (key, child) in f.props().entries() {
                tag_walk(&child, &join_prefix(path, &key), instance, visited);
            }
        }
        Value::Object(obj) => {
            if !visited.insert(obj.addr()) {
                return;
            }
            for (key, child) in obj.entries() {
                tag_walk(&child, &join_prefix(path, &key), instance, visited);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiOptions;
    use crate::resolver::RegistryResolver;
    use crate::value::Value;
    use std::sync::Arc;

    fn ctx_for(dir: &Path, registry: Arc<RegistryResolver>, mode: Mode) -> Arc<LoaderCtx> {
        let opts = ApiOptions {
            mode: Some(mode),
            file_filter: Some(Arc::new(crate::fs_utils::ExtensionFilter::new(["rs"]))),
            ..ApiOptions::new(dir)
        }
        .with_resolver(registry);
        Arc::new(LoaderCtx {
            id: "test-instance".to_string(),
            res: Resolved::from_options(&opts).expect("resolve"),
        })
    }

    fn touch(path: &Path) {
        std::fs::write(path, "").expect("touch");
    }

    #[test]
    fn single_file_flattening_scenario() {
        // math/math.rs exporting a lone function named math
        let tmp = tempfile::tempdir().expect("tmp dir");
        std::fs::create_dir(tmp.path().join("math")).expect("mkdir");
        touch(&tmp.path().join("math/math.rs"));

        let registry = Arc::new(RegistryResolver::new());
        registry.module("math/math.rs", |m| {
            m.named_fn("math", |args| {
                let a = args.first().and_then(Value::as_int).unwrap_or(0);
                let b = args.get(1).and_then(Value::as_int).unwrap_or(0);
                Ok(Value::Int(a + b))
            });
        });

        let ctx = ctx_for(tmp.path(), registry, Mode::Eager);
        let root = build_root(&ctx).expect("build");
        let obj = root.as_object().expect("root object");
        let math = obj.get("math").expect("math slot");
        let f = math.as_function().expect("math is a function");
        // no nested math.math
        assert!(f.props().get("math").is_none());
        assert_eq!(f.path().as_deref(), Some("math"));
    }

    #[test]
    fn multi_default_directory_keeps_namespaces() {
        let tmp = tempfile::tempdir().expect("tmp dir");
        std::fs::create_dir(tmp.path().join("devices")).expect("mkdir");
        touch(&tmp.path().join("devices/tv.rs"));
        touch(&tmp.path().join("devices/radio.rs"));

        let registry = Arc::new(RegistryResolver::new());
        registry.module("devices/tv.rs", |m| {
            m.default_fn("tvCtl", |_| Ok(Value::Str("tv-on".into())))
                .named("brand", Value::Str("acme".into()));
        });
        registry.module("devices/radio.rs", |m| {
            m.default_fn("radioCtl", |_| Ok(Value::Str("radio-on".into())));
        });

        let ctx = ctx_for(tmp.path(), registry, Mode::Eager);
        let root = build_root(&ctx).expect("build");
        let devices = root
            .as_object()
            .expect("root")
            .get("devices")
            .expect("devices");
        let devices = devices.as_object().expect("devices object");
        let tv = devices.get("tv").expect("tv");
        let tv = tv.as_function().expect("tv callable");
        assert_eq!(tv.props().get("brand"), Some(Value::Str("acme".into())));
        assert!(devices.get("radio").expect("radio").as_function().is_some());
        // brand is not merged into the devices container
        assert!(devices.get("brand").is_none());
    }

    #[test]
    fn root_callable_scenario() {
        let tmp = tempfile::tempdir().expect("tmp dir");
        touch(&tmp.path().join("greet.rs"));

        let registry = Arc::new(RegistryResolver::new());
        registry.module("greet.rs", |m| {
            m.default_fn("hello", |args| {
                let name = args
                    .first()
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_default();
                Ok(Value::Str(format!("hello {name}")))
            })
            .named("shout", Value::Str("HI".into()));
        });

        let ctx = ctx_for(tmp.path(), registry, Mode::Eager);
        let root = build_root(&ctx).expect("build");
        let f = root.as_function().expect("callable root");
        assert_eq!(f.props().get("shout"), Some(Value::Str("HI".into())));
    }

    #[test]
    fn category_flattening_merges_contents() {
        let tmp = tempfile::tempdir().expect("tmp dir");
        std::fs::create_dir(tmp.path().join("util")).expect("mkdir");
        touch(&tmp.path().join("util/util.rs"));
        touch(&tmp.path().join("util/extra.rs"));

        let registry = Arc::new(RegistryResolver::new());
        registry.module("util/util.rs", |m| {
            m.default_object(|obj| {
                obj.set("trim", Value::Str("trim".into()));
            });
        });
        registry.module("util/extra.rs", |m| {
            m.named("pad", Value::Str("pad".into()));
        });

        let ctx = ctx_for(tmp.path(), registry, Mode::Eager);
        let root = build_root(&ctx).expect("build");
        let util = root.as_object().expect("root").get("util").expect("util");
        let util = util.as_object().expect("util object");
        assert!(util.has("trim"));
        // the sibling module keeps its own namespace inside util
        assert!(util.has("extra"));
    }

    #[test]
    fn subdirectory_function_name_preference() {
        let tmp = tempfile::tempdir().expect("tmp dir");
        std::fs::create_dir(tmp.path().join("taskqueue")).expect("mkdir");
        touch(&tmp.path().join("taskqueue/taskqueue.rs"));

        let registry = Arc::new(RegistryResolver::new());
        registry.module("taskqueue/taskqueue.rs", |m| {
            m.default_fn("TaskQueue", |_| Ok(Value::Str("queued".into())));
        });

        for mode in [Mode::Eager, Mode::Lazy] {
            let ctx = ctx_for(tmp.path(), registry.clone(), mode);
            let root = build_root(&ctx).expect("build");
            let obj = root.as_object().expect("root");
            assert!(obj.has("TaskQueue"), "{mode:?}: keys {:?}", obj.keys());
            assert!(!obj.has("taskqueue"));
        }
    }

    #[test]
    fn lazy_mode_defers_subdirectories() {
        let tmp = tempfile::tempdir().expect("tmp dir");
        std::fs::create_dir(tmp.path().join("heavy")).expect("mkdir");
        touch(&tmp.path().join("heavy/one.rs"));
        touch(&tmp.path().join("heavy/two.rs"));

        let registry = Arc::new(RegistryResolver::new());
        registry.module("heavy/one.rs", |m| {
            m.named("a", Value::Int(1));
        });
        registry.module("heavy/two.rs", |m| {
            m.named("b", Value::Int(2));
        });

        let ctx = ctx_for(tmp.path(), registry, Mode::Lazy);
        let root = build_root(&ctx).expect("build");
        let heavy = root.as_object().expect("root").get("heavy").expect("heavy");
        let Value::Lazy(slot) = heavy else {
            panic!("expected lazy slot, got {heavy:?}");
        };
        assert!(!slot.is_materialized());
        assert_eq!(slot.shape_keys().expect("keys"), vec!["one", "two"]);

        let materialized = slot.force().expect("force");
        let obj = materialized.as_object().expect("heavy object");
        assert!(obj.has("one"));
        assert!(obj.has("two"));
    }

    #[test]
    fn max_depth_bounds_recursion() {
        let tmp = tempfile::tempdir().expect("tmp dir");
        std::fs::create_dir_all(tmp.path().join("a/b")).expect("mkdirs");
        touch(&tmp.path().join("a/b/deep.rs"));

        let registry = Arc::new(RegistryResolver::new());
        registry.module("deep.rs", |m| {
            m.named("x", Value::Int(1));
        });

        let opts = ApiOptions {
            max_depth: Some(1),
            file_filter: Some(Arc::new(crate::fs_utils::ExtensionFilter::new(["rs"]))),
            ..ApiOptions::new(tmp.path())
        }
        .with_resolver(registry);
        let ctx = Arc::new(LoaderCtx {
            id: "test".into(),
            res: Resolved::from_options(&opts).expect("resolve"),
        });
        let root = build_root(&ctx).expect("build");
        let a = root.as_object().expect("root").get("a").expect("a");
        let a = a.as_object().expect("a object");
        assert!(!a.has("b"), "depth cap must stop before a/b");
    }
}
