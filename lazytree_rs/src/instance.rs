//! Instances and the bound API surface callers hold.
//!
//! A [`BoundApi`] wraps the resolved tree with the runtime: navigation
//! (`get`/`has`/`keys`/`kind`), dispatching calls through the hook pipeline,
//! runtime grafting (`add_api`/`remove_api` with ownership stacks and
//! rollback), reload, and shutdown. Clones are handles to the same instance.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use uuid::Uuid;

use crate::builder::{LoaderCtx, build_graft, build_root, tag_tree};
use crate::config::{ApiOptions, Engine, Mode, Resolved};
use crate::error::{Error, Result};
use crate::hooks::HookManager;
use crate::live::{is_reserved_key, rebind_value};
use crate::metadata::{MetaMap, scrub_functions, tag_functions};
use crate::ownership::{AddApiOptions, AddApiRecord, CORE_OWNER, OwnershipRegistry, Removal};
use crate::pattern::split_path;
use crate::registry::{self, InstanceEntry};
use crate::runtime;
use crate::value::{FnValue, ObjectRef, Value, ValueKind};

pub(crate) struct InstanceInner {
    id: String,
    ctx: Arc<LoaderCtx>,
    api: RwLock<Value>,
    hooks: HookManager,
    context: ObjectRef,
    reference: ObjectRef,
    ownership: Mutex<OwnershipRegistry>,
    shut: AtomicBool,
}

/// The user-visible handle to one loaded instance.
#[derive(Clone)]
pub struct BoundApi {
    inner: Arc<InstanceInner>,
}

/// Load a directory tree into a fresh instance.
pub fn load(options: ApiOptions) -> Result<BoundApi> {
    let resolved = Resolved::from_options(&options)?;
    let id = Uuid::new_v4().to_string();
    let engine = resolved.engine;
    let debug = resolved.debug;
    let ctx = Arc::new(LoaderCtx {
        id: id.clone(),
        res: resolved,
    });

    let root = build_root(&ctx)?;

    let context = ObjectRef::new();
    for (key, value) in options.context {
        context.set(key, value);
    }
    let reference = ObjectRef::new();
    for (key, value) in options.reference {
        reference.set(key, value);
    }

    let hooks = HookManager::new();
    registry::register(
        &id,
        InstanceEntry {
            self_root: root.clone(),
            context: context.clone(),
            reference: reference.clone(),
            hooks: hooks.clone(),
            engine,
            debug,
        },
    );

    let mut ownership = OwnershipRegistry::new();
    for path in collect_paths(&root) {
        ownership.push(&path, CORE_OWNER);
    }

    Ok(BoundApi {
        inner: Arc::new(InstanceInner {
            id,
            ctx,
            api: RwLock::new(root),
            hooks,
            context,
            reference,
            ownership: Mutex::new(ownership),
            shut: AtomicBool::new(false),
        }),
    })
}

/// Where an entry lives: a plain object or a callable's props.
#[derive(Clone)]
enum Container {
    Obj(ObjectRef),
    Fun(FnValue),
}

impl Container {
    fn get(&self, key: &str) -> Option<Value> {
        match self {
            Container::Obj(o) => o.get(key),
            Container::Fun(f) => f.props().get(key),
        }
    }

    fn set(&self, key: &str, value: Value) {
        match self {
            Container::Obj(o) => o.set(key, value),
            Container::Fun(f) => f.props().set(key, value),
        }
    }

    fn remove(&self, key: &str) {
        match self {
            Container::Obj(o) => {
                o.remove(key);
            }
            Container::Fun(f) => {
                f.props().remove(key);
            }
        }
    }

    fn keys(&self) -> Vec<String> {
        match self {
            Container::Obj(o) => o.keys(),
            Container::Fun(f) => f.props().keys(),
        }
    }

    fn of(value: &Value) -> Option<Container> {
        match value {
            Value::Object(o) => Some(Container::Obj(o.clone())),
            Value::Function(f) => Some(Container::Fun(f.clone())),
            _ => None,
        }
    }
}

impl BoundApi {
    pub fn instance_id(&self) -> &str {
        &self.inner.id
    }

    pub(crate) fn ctx(&self) -> Arc<LoaderCtx> {
        self.inner.ctx.clone()
    }

    /// The instance's hook manager.
    pub fn hooks(&self) -> HookManager {
        self.inner.hooks.clone()
    }

    /// Live context handle; writes propagate into running calls.
    pub fn context(&self) -> ObjectRef {
        self.inner.context.clone()
    }

    /// Live reference handle.
    pub fn reference(&self) -> ObjectRef {
        self.inner.reference.clone()
    }

    /// The API root value (the `self` live-reference target).
    pub fn root(&self) -> Value {
        self.inner.api.read().expect("api lock").clone()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.shut.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    fn debug(&self, msg: impl AsRef<str>) {
        if self.inner.ctx.res.debug {
            eprintln!("[lazytree] {}", msg.as_ref());
        }
    }

    /// Resolve a dotted path, materializing lazy slots along the way.
    pub fn get(&self, path: &str) -> Result<Value> {
        self.ensure_live()?;
        if path.is_empty() {
            return Ok(self.root());
        }
        let segments = split_path(path)?;
        let mut current = self.root();
        for (i, seg) in segments.iter().enumerate() {
            if let Value::Lazy(slot) = current.clone() {
                current = slot.force()?;
            }
            let child = Container::of(&current)
                .and_then(|c| c.get(seg))
                .ok_or_else(|| Error::MissingPath(segments[..=i].join(".")))?;
            current = child;
        }
        if let Value::Lazy(slot) = current.clone() {
            current = slot.force()?;
        }
        Ok(current)
    }

    /// Membership without materializing the final hop.
    pub fn has(&self, path: &str) -> bool {
        self.walk_shape(path, |value, last| match value {
            Value::Lazy(slot) => slot.has_key(last).unwrap_or(false),
            other => Container::of(other)
                .map(|c| c.get(last).is_some())
                .unwrap_or(false),
        })
        .unwrap_or(false)
    }

    /// Child keys; unmaterialized lazy slots answer from their listing.
    pub fn keys(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_live()?;
        let value = if path.is_empty() {
            self.root()
        } else {
            self.get_shallow(path)?
        };
        Ok(match value {
            Value::Lazy(slot) => slot.shape_keys()?,
            other => Container::of(&other).map(|c| c.keys()).unwrap_or_default(),
        })
    }

    /// The kind of the value at `path` (materializes lazy slots: kind is a
    /// read of the value itself).
    pub fn kind(&self, path: &str) -> Result<ValueKind> {
        Ok(self.get(path)?.kind())
    }

    /// Resolve a path but keep the final slot unmaterialized.
    fn get_shallow(&self, path: &str) -> Result<Value> {
        let segments = split_path(path)?;
        let mut current = self.root();
        for (i, seg) in segments.iter().enumerate() {
            if let Value::Lazy(slot) = current.clone() {
                current = slot.force()?;
            }
            let child = Container::of(&current)
                .and_then(|c| c.get(seg))
                .ok_or_else(|| Error::MissingPath(segments[..=i].join(".")))?;
            current = child;
        }
        Ok(current)
    }

    fn walk_shape<R>(&self, path: &str, f: impl FnOnce(&Value, &str) -> R) -> Result<R> {
        self.ensure_live()?;
        let segments = split_path(path)?;
        let (last, parents) = segments.split_last().expect("split_path rejects empty");
        let mut current = self.root();
        for seg in parents {
            if let Value::Lazy(slot) = current.clone() {
                current = slot.force()?;
            }
            current = Container::of(&current)
                .and_then(|c| c.get(seg))
                .ok_or_else(|| Error::MissingPath(path.to_string()))?;
        }
        Ok(f(&current, last))
    }

    /// Call the function at `path` through the dispatch pipeline.
    pub async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value> {
        let value = self.get(path)?;
        let f = match &value {
            Value::Function(f) => f.clone(),
            other => {
                return Err(Error::NotCallable {
                    path: path.to_string(),
                    kind: other.kind().as_str(),
                });
            }
        };
        self.dispatch(&f, args).await
    }

    /// Invoke the callable root (`api(...)`).
    pub async fn call_root(&self, args: Vec<Value>) -> Result<Value> {
        let root = self.root();
        let f = match &root {
            Value::Function(f) => f.clone(),
            other => {
                return Err(Error::NotCallable {
                    path: String::new(),
                    kind: other.kind().as_str(),
                });
            }
        };
        self.dispatch(&f, args).await
    }

    async fn dispatch(&self, f: &FnValue, args: Vec<Value>) -> Result<Value> {
        self.ensure_live()?;
        let entry = registry::get(&self.inner.id).ok_or(Error::Shutdown)?;
        runtime::dispatch(&self.inner.id, &entry, f, args)
            .resolve()
            .await
    }

    /// Graft a folder's resolved subtree under `path` for `owner`.
    pub fn add_api(
        &self,
        path: &str,
        folder: &Path,
        owner: Option<&str>,
        options: AddApiOptions,
    ) -> Result<()> {
        self.ensure_live()?;
        split_path(path)?;
        if !folder.is_dir() {
            return Err(Error::config(format!(
                "add_api folder {} does not exist",
                folder.display()
            )));
        }
        let owner = owner
            .map(str::to_string)
            .unwrap_or_else(|| crate::fs_utils::stem_of(folder));
        let record = AddApiRecord {
            path: path.to_string(),
            folder: folder.to_path_buf(),
            owner: owner.clone(),
            options,
            at: Utc::now(),
        };
        self.graft(&record, true)?;
        self.inner
            .ownership
            .lock()
            .expect("ownership lock")
            .record(record);
        Ok(())
    }

    /// Install a record's subtree. `claim` controls whether ownership is
    /// pushed (true for user installs, false for rollback replays).
    fn graft(&self, record: &AddApiRecord, claim: bool) -> Result<()> {
        let subtree = build_graft(&self.inner.ctx, &record.folder, &record.path)?;
        if let Some(metadata) = &record.options.metadata {
            tag_functions(&subtree, &MetaMap::from_json(metadata), &record.folder);
        }

        let segments = split_path(&record.path)?;
        let (last, parents) = segments.split_last().expect("non-empty path");
        let parent = self.ensure_containers(parents)?;

        match parent.get(last) {
            Some(existing) if rebind_value(&existing, &subtree) => {
                self.debug(format!("graft {}: rebound in place", record.path));
            }
            Some(_) if record.options.force_overwrite => {
                parent.set(last, subtree.clone());
            }
            Some(_) => {
                return Err(Error::Path(format!(
                    "slot '{}' exists with an incompatible shape (use force_overwrite)",
                    record.path
                )));
            }
            None => {
                parent.set(last, subtree.clone());
            }
        }

        if claim {
            let installed = parent.get(last).unwrap_or(subtree);
            let mut ownership = self.inner.ownership.lock().expect("ownership lock");
            for sub_path in collect_paths_under(&installed, &record.path) {
                ownership.push(&sub_path, &record.owner);
            }
        }
        Ok(())
    }

    /// Walk to the parent container of a slot, creating missing objects.
    fn ensure_containers(&self, segments: &[String]) -> Result<Container> {
        let root = self.root();
        let mut current = Container::of(&root).ok_or_else(|| {
            Error::config("api root does not hold entries")
        })?;
        for seg in segments {
            let next = match current.get(seg) {
                Some(Value::Lazy(slot)) => slot.force()?,
                Some(value) => value,
                None => {
                    let fresh = Value::object();
                    current.set(seg, fresh.clone());
                    fresh
                }
            };
            current = Container::of(&next).ok_or_else(|| {
                Error::Path(format!("'{seg}' is a leaf, cannot graft below it"))
            })?;
        }
        Ok(current)
    }

    /// Remove by path: pop the serving owner (or evict a named owner) and
    /// roll the slot back to whoever served before.
    pub fn remove_api(&self, path: &str, owner: Option<&str>) -> Result<()> {
        self.ensure_live()?;
        split_path(path)?;
        let removal = {
            let mut ownership = self.inner.ownership.lock().expect("ownership lock");
            match owner {
                Some(owner) => ownership.remove_owner(path, owner),
                None => match ownership.pop(path) {
                    Some(_) => Removal::Top,
                    None => Removal::Absent,
                },
            }
        };
        match removal {
            Removal::Absent => Err(Error::MissingPath(path.to_string())),
            Removal::Inner => {
                self.debug(format!("remove {path}: shadowed owner evicted, slot unchanged"));
                Ok(())
            }
            Removal::Top => self.settle_slot(path),
        }
    }

    /// Remove an owner from every path it claims.
    pub fn remove_owner(&self, owner: &str) -> Result<()> {
        self.ensure_live()?;
        let paths = {
            let ownership = self.inner.ownership.lock().expect("ownership lock");
            ownership.paths_of(owner)
        };
        if paths.is_empty() {
            return Err(Error::MissingPath(format!("owner '{owner}' owns nothing")));
        }
        for path in paths {
            let removal = self
                .inner
                .ownership
                .lock()
                .expect("ownership lock")
                .remove_owner(&path, owner);
            if removal == Removal::Top {
                self.settle_slot(&path)?;
            }
        }
        Ok(())
    }

    /// After the serving owner left: delete the slot or roll back to the
    /// next owner's implementation.
    fn settle_slot(&self, path: &str) -> Result<()> {
        let (empty, next_owner) = {
            let ownership = self.inner.ownership.lock().expect("ownership lock");
            (
                ownership.is_empty_stack(path),
                ownership.current_owner(path).map(str::to_string),
            )
        };

        if empty {
            let mut ownership = self.inner.ownership.lock().expect("ownership lock");
            ownership.delete_path(path);
            let prefix = format!("{path}.");
            for descendant in ownership
                .tracked_paths()
                .into_iter()
                .filter(|p| p.starts_with(&prefix))
            {
                ownership.delete_path(&descendant);
            }
            drop(ownership);
            return self.delete_slot(path);
        }

        let next_owner = next_owner.expect("non-empty stack has a top");
        if next_owner == CORE_OWNER {
            return self.rollback_to_core(path);
        }

        let record = {
            let ownership = self.inner.ownership.lock().expect("ownership lock");
            ownership.latest_record(path, &next_owner).cloned()
        };
        match record {
            Some(mut record) => {
                record.options.force_overwrite = true;
                record.options.mutate_existing = true;
                self.debug(format!("rollback {path} to owner '{next_owner}'"));
                self.graft(&record, false)
            }
            None => {
                self.debug(format!(
                    "rollback {path}: no history for owner '{next_owner}', leaving slot"
                ));
                Ok(())
            }
        }
    }

    /// Replay the initial load for this slot from the configured root.
    fn rollback_to_core(&self, path: &str) -> Result<()> {
        let mut res = self.inner.ctx.res.clone();
        res.mode = Mode::Eager;
        let fresh_ctx = Arc::new(LoaderCtx {
            id: self.inner.id.clone(),
            res,
        });
        let fresh_root = build_root(&fresh_ctx)?;

        let segments = split_path(path)?;
        let mut current = fresh_root;
        for seg in &segments {
            if let Value::Lazy(slot) = current.clone() {
                current = slot.force()?;
            }
            current = Container::of(&current)
                .and_then(|c| c.get(seg))
                .ok_or_else(|| Error::MissingPath(path.to_string()))?;
        }
        tag_tree(&current, path, &self.inner.id);

        let (last, parents) = segments.split_last().expect("non-empty path");
        let parent = self.ensure_containers(parents)?;
        match parent.get(last) {
            Some(existing) if rebind_value(&existing, &current) => {}
            _ => parent.set(last, current),
        }
        self.debug(format!("rollback {path} to core"));
        Ok(())
    }

    /// Physically delete a slot and prune empty parent containers.
    fn delete_slot(&self, path: &str) -> Result<()> {
        let segments = split_path(path)?;
        let (last, parents) = segments.split_last().expect("non-empty path");
        let parent = self.container_at(parents)?;
        parent.remove(last);

        // prune empty object containers bottom-up, never the root
        for cut in (1..=parents.len()).rev() {
            let (dir, above) = (&segments[..cut], &segments[..cut - 1]);
            let container = self.container_at(above)?;
            let key = &dir[dir.len() - 1];
            match container.get(key) {
                Some(Value::Object(obj)) if obj.is_empty() => container.remove(key),
                _ => break,
            }
        }
        self.debug(format!("deleted slot {path}"));
        Ok(())
    }

    fn container_at(&self, segments: &[String]) -> Result<Container> {
        let root = self.root();
        let mut current =
            Container::of(&root).ok_or_else(|| Error::config("api root does not hold entries"))?;
        for seg in segments {
            let next = match current.get(seg) {
                Some(Value::Lazy(slot)) => slot.force()?,
                Some(value) => value,
                None => return Err(Error::MissingPath(segments.join("."))),
            };
            current = Container::of(&next)
                .ok_or_else(|| Error::MissingPath(segments.join(".")))?;
        }
        Ok(current)
    }

    /// Rescan the root directory and rewrite the tree in place; externally
    /// held references keep working. With `hot_reload`, recorded grafts are
    /// replayed on top.
    pub fn reload(&self) -> Result<()> {
        self.ensure_live()?;
        let old_root = self.root();
        scrub_functions(&old_root);

        let fresh_root = build_root(&self.inner.ctx)?;
        let root_value = if rebind_value(&old_root, &fresh_root) {
            old_root
        } else {
            let mut api = self.inner.api.write().expect("api lock");
            *api = fresh_root.clone();
            fresh_root
        };
        registry::update(&self.inner.id, |entry| {
            entry.self_root = root_value.clone();
        });

        let history: Vec<AddApiRecord> = {
            let mut ownership = self.inner.ownership.lock().expect("ownership lock");
            ownership.clear();
            for path in collect_paths(&root_value) {
                ownership.push(&path, CORE_OWNER);
            }
            if self.inner.ctx.res.hot_reload {
                ownership.history().to_vec()
            } else {
                ownership.clear_history();
                Vec::new()
            }
        };
        for record in &history {
            self.graft(record, true)?;
        }
        self.debug("reload complete");
        Ok(())
    }

    /// Structural snapshot of the API tree.
    pub fn describe(&self) -> serde_json::Value {
        let root = self.root();
        serde_json::json!({
            "instance_id": self.inner.id,
            "engine": match self.inner.ctx.res.engine {
                Engine::Ambient => "ambient",
                Engine::Identity => "identity",
            },
            "mode": match self.inner.ctx.res.mode {
                Mode::Eager => "eager",
                Mode::Lazy => "lazy",
            },
            "api": describe_value(&root),
        })
    }

    /// Tear the instance down: registry entry gone, hooks cleared, every
    /// further operation fails with [`Error::Shutdown`].
    pub fn shutdown(&self) -> Result<()> {
        self.ensure_live()?;
        self.inner.shut.store(true, Ordering::SeqCst);
        self.inner.hooks.shutdown();
        registry::cleanup(&self.inner.id);
        self.inner
            .ownership
            .lock()
            .expect("ownership lock")
            .clear();
        Ok(())
    }

    /// Current ownership stack of a path (top last), for diagnostics.
    pub fn ownership_stack(&self, path: &str) -> Vec<String> {
        self.inner
            .ownership
            .lock()
            .expect("ownership lock")
            .stack_of(path)
    }

    /// Paths currently claimed by an owner.
    pub fn owned_paths(&self, owner: &str) -> Vec<String> {
        self.inner
            .ownership
            .lock()
            .expect("ownership lock")
            .paths_of(owner)
    }
}

fn describe_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Object(obj) => {
            let mut entries = serde_json::Map::new();
            for (key, child) in obj.entries() {
                entries.insert(key, describe_value(&child));
            }
            serde_json::json!({"kind": "object", "entries": entries})
        }
        Value::Function(f) => {
            let mut props = serde_json::Map::new();
            for (key, child) in f.props().entries() {
                props.insert(key, describe_value(&child));
            }
            serde_json::json!({
                "kind": "function",
                "name": f.name(),
                "path": f.path(),
                "props": props,
            })
        }
        Value::Lazy(slot) => serde_json::json!({
            "kind": "lazy",
            "source": slot.describe_source(),
            "keys": slot.shape_keys().unwrap_or_default(),
        }),
        other => serde_json::json!({"kind": other.kind().as_str()}),
    }
}

/// Dotted paths of every slot in a tree (reserved keys skipped, lazy slots
/// counted as leaves).
fn collect_paths(root: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_walk(root, "", &mut out);
    out
}

fn collect_paths_under(value: &Value, base: &str) -> Vec<String> {
    let mut out = vec![base.to_string()];
    collect_walk(value, base, &mut out);
    out
}

fn collect_walk(value: &Value, base: &str, out: &mut Vec<String>) {
    let children = match value {
        Value::Object(obj) => obj.entries(),
        Value::Function(f) => f.props().entries(),
        _ => return,
    };
    for (key, child) in children {
        if is_reserved_key(&key) {
            continue;
        }
        let path = if base.is_empty() {
            key.clone()
        } else {
            format!("{base}.{key}")
        };
        out.push(path.clone());
        collect_walk(&child, &path, out);
    }
}
