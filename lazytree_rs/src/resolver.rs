//! Module resolution: the "dynamic import" collaborator.
//!
//! A [`ModuleResolver`] turns a module file into its raw export surface.
//! Two shapes exist in the wild and both are accepted:
//!
//! - **dual** - default and named exports side by side;
//! - **wrapped** - everything under a single `default` object that must be
//!   unwrapped once before analysis.
//!
//! Shipped resolvers: [`RegistryResolver`] (programmatic export maps keyed by
//! relative path - the way Rust callers attach functions to files),
//! [`DataResolver`] (`.json`/`.toml` files as object exports), and
//! [`ChainResolver`] (first-match composition).

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::value::{CallResult, FnValue, Map, ObjectRef, Value};

/// Which of the two module-system shapes a resolver produced.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ExportShape {
    #[default]
    Dual,
    Wrapped,
}

/// A module file's export surface, before normalization.
#[derive(Clone, Debug, Default)]
pub struct RawExports {
    pub shape: ExportShape,
    pub default: Option<Value>,
    pub named: Map,
}

impl RawExports {
    pub fn builder() -> ExportsBuilder {
        ExportsBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.named.is_empty()
    }
}

/// Fluent construction of a [`RawExports`].
#[derive(Default)]
pub struct ExportsBuilder {
    shape: ExportShape,
    default: Option<Value>,
    named: Map,
}

impl ExportsBuilder {
    /// Mark the surface as the wrapped module-system shape.
    pub fn wrapped(&mut self) -> &mut Self {
        self.shape = ExportShape::Wrapped;
        self
    }

    pub fn named(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.named.insert(key.into(), value);
        self
    }

    pub fn named_fn<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> CallResult + Send + Sync + 'static,
    {
        self.named(name, Value::Function(FnValue::sync(name, f)))
    }

    pub fn named_async_fn<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CallResult> + Send + 'static,
    {
        self.named(name, Value::Function(FnValue::asynch(name, f)))
    }

    pub fn default_value(&mut self, value: Value) -> &mut Self {
        self.default = Some(value);
        self
    }

    pub fn default_fn<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> CallResult + Send + Sync + 'static,
    {
        self.default_value(Value::Function(FnValue::sync(name, f)))
    }

    /// A default function with no name of its own (decider rule: renamed to
    /// its category on flattening).
    pub fn default_fn_anon<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> CallResult + Send + Sync + 'static,
    {
        self.default_value(Value::Function(FnValue::new(
            None,
            Arc::new(move |args| crate::value::Outcome::Ready(f(args))),
        )))
    }

    pub fn default_async_fn<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CallResult> + Send + 'static,
    {
        self.default_value(Value::Function(FnValue::asynch(name, f)))
    }

    /// A default object assembled by the given closure.
    pub fn default_object<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&ObjectRef),
    {
        let obj = ObjectRef::new();
        build(&obj);
        self.default_value(Value::Object(obj))
    }

    pub fn build(&mut self) -> RawExports {
        RawExports {
            shape: self.shape,
            default: self.default.take(),
            named: std::mem::take(&mut self.named),
        }
    }
}

/// Loads one module file's export surface.
pub trait ModuleResolver: Send + Sync {
    fn load(&self, path: &Path) -> Result<RawExports>;

    /// Whether this resolver recognizes the file at all. Composition and
    /// diagnostics use this; `load` may still fail for recognized files.
    fn handles(&self, _path: &Path) -> bool {
        true
    }
}

type ExportsFactory = Arc<dyn Fn() -> RawExports + Send + Sync>;

/// Programmatic module registry. Modules register under a root-relative
/// path; lookup matches the registered path as a suffix of the absolute
/// file path, so one registry serves any scan root. Later registrations for
/// the same path win, which is what hot reload wants.
#[derive(Default)]
pub struct RegistryResolver {
    entries: RwLock<Vec<(PathBuf, ExportsFactory)>>,
}

impl RegistryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module whose exports are rebuilt on every load.
    pub fn module<F>(&self, rel_path: impl Into<PathBuf>, build: F)
    where
        F: Fn(&mut ExportsBuilder) + Send + Sync + 'static,
    {
        let factory: ExportsFactory = Arc::new(move || {
            let mut builder = ExportsBuilder::default();
            build(&mut builder);
            builder.build()
        });
        self.entries
            .write()
            .expect("registry lock")
            .push((rel_path.into(), factory));
    }

    /// Register a fixed export surface (cloned per load; function values
    /// keep their identity across loads).
    pub fn module_exports(&self, rel_path: impl Into<PathBuf>, exports: RawExports) {
        let fixed = exports;
        let factory: ExportsFactory = {
            let fixed = fixed.clone();
            Arc::new(move || fixed.clone())
        };
        self.entries
            .write()
            .expect("registry lock")
            .push((rel_path.into(), factory));
    }

    fn lookup(&self, path: &Path) -> Option<ExportsFactory> {
        let entries = self.entries.read().expect("registry lock");
        entries
            .iter()
            .rev()
            .find(|(key, _)| path.ends_with(key))
            .map(|(_, factory)| factory.clone())
    }
}

impl ModuleResolver for RegistryResolver {
    fn load(&self, path: &Path) -> Result<RawExports> {
        match self.lookup(path) {
            Some(factory) => Ok(factory()),
            None => Err(Error::module_load(
                path.display().to_string(),
                "no module registered for this path",
            )),
        }
    }

    fn handles(&self, path: &Path) -> bool {
        self.lookup(path).is_some()
    }
}

/// Data modules: `.json` and `.toml` files load as object exports. A
/// top-level table becomes named exports (a `default` key, when present,
/// becomes the default export); any other top level becomes the default.
#[derive(Default)]
pub struct DataResolver;

impl DataResolver {
    pub fn new() -> Self {
        DataResolver
    }

    fn parse(&self, path: &Path) -> Result<serde_json::Value> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::module_load(path.display().to_string(), e.to_string()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)
                .map_err(|e| Error::module_load(path.display().to_string(), e.to_string())),
            Some("toml") => {
                let value: toml::Value = toml::from_str(&text)
                    .map_err(|e| Error::module_load(path.display().to_string(), e.to_string()))?;
                serde_json::to_value(value)
                    .map_err(|e| Error::module_load(path.display().to_string(), e.to_string()))
            }
            other => Err(Error::module_load(
                path.display().to_string(),
                format!("unsupported extension {other:?}"),
            )),
        }
    }
}

impl ModuleResolver for DataResolver {
    fn load(&self, path: &Path) -> Result<RawExports> {
        let json = self.parse(path)?;
        let mut builder = RawExports::builder();
        match &json {
            serde_json::Value::Object(map) => {
                for (key, value) in map {
                    if key == "default" {
                        builder.default_value(Value::from_json(value));
                    } else {
                        builder.named(key.clone(), Value::from_json(value));
                    }
                }
            }
            other => {
                builder.default_value(Value::from_json(other));
            }
        }
        Ok(builder.build())
    }

    fn handles(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json") | Some("toml")
        )
    }
}

/// First-match composition of resolvers.
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn ModuleResolver>>,
}

impl ChainResolver {
    pub fn new(resolvers: Vec<Arc<dyn ModuleResolver>>) -> Self {
        ChainResolver { resolvers }
    }
}

impl ModuleResolver for ChainResolver {
    fn load(&self, path: &Path) -> Result<RawExports> {
        for resolver in &self.resolvers {
            if resolver.handles(path) {
                return resolver.load(path);
            }
        }
        Err(Error::module_load(
            path.display().to_string(),
            "no resolver handles this file",
        ))
    }

    fn handles(&self, path: &Path) -> bool {
        self.resolvers.iter().any(|r| r.handles(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_matches_by_path_suffix() {
        let registry = RegistryResolver::new();
        registry.module("math/math.rs", |m| {
            m.named_fn("add", |args| {
                let a = args.first().and_then(Value::as_int).unwrap_or(0);
                let b = args.get(1).and_then(Value::as_int).unwrap_or(0);
                Ok(Value::Int(a + b))
            });
        });

        let abs = Path::new("/project/api/math/math.rs");
        assert!(registry.handles(abs));
        let exports = registry.load(abs).expect("load");
        assert_eq!(exports.named.len(), 1);
        assert!(exports.default.is_none());

        assert!(!registry.handles(Path::new("/project/api/other.rs")));
    }

    #[test]
    fn later_registration_wins() {
        let registry = RegistryResolver::new();
        registry.module("x.rs", |m| {
            m.named("v", Value::Int(1));
        });
        registry.module("x.rs", |m| {
            m.named("v", Value::Int(2));
        });
        let exports = registry.load(Path::new("/r/x.rs")).expect("load");
        assert_eq!(exports.named.get("v"), Some(&Value::Int(2)));
    }

    #[test]
    fn json_file_becomes_named_exports() {
        let tmp = tempfile::tempdir().expect("tmp dir");
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, r#"{"retries": 3, "default": {"kind": "cfg"}}"#).expect("write");

        let exports = DataResolver::new().load(&path).expect("load");
        assert_eq!(exports.named.get("retries"), Some(&Value::Int(3)));
        let default = exports.default.expect("default export");
        assert_eq!(
            default.as_object().expect("object").get("kind"),
            Some(Value::Str("cfg".into()))
        );
    }

    #[test]
    fn toml_file_loads_as_table() {
        let tmp = tempfile::tempdir().expect("tmp dir");
        let path = tmp.path().join("limits.toml");
        std::fs::write(&path, "max = 10\n[nested]\non = true\n").expect("write");

        let exports = DataResolver::new().load(&path).expect("load");
        assert_eq!(exports.named.get("max"), Some(&Value::Int(10)));
        assert!(exports.named.contains_key("nested"));
    }

    #[test]
    fn chain_takes_first_handler() {
        let registry = Arc::new(RegistryResolver::new());
        registry.module("special.json", |m| {
            m.named("from", Value::Str("registry".into()));
        });
        let chain = ChainResolver::new(vec![registry, Arc::new(DataResolver::new())]);

        let tmp = tempfile::tempdir().expect("tmp dir");
        let special = tmp.path().join("special.json");
        std::fs::write(&special, r#"{"from": "disk"}"#).expect("write");
        let plain = tmp.path().join("plain.json");
        std::fs::write(&plain, r#"{"from": "disk"}"#).expect("write");

        let exports = chain.load(&special).expect("load special");
        assert_eq!(exports.named.get("from"), Some(&Value::Str("registry".into())));
        let exports = chain.load(&plain).expect("load plain");
        assert_eq!(exports.named.get("from"), Some(&Value::Str("disk".into())));
    }
}
