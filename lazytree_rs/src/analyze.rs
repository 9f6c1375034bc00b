//! Per-directory and per-module export analysis.
//!
//! The directory pass loads every candidate file once and classifies it:
//! default-export count and self-referential naming feed the flattening
//! decider. The module pass normalizes the raw export surface into a single
//! [`ModuleAnalysis`] value ready for placement in the API tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::fs_utils::{DirListing, stem_of};
use crate::resolver::{ExportShape, ModuleResolver, RawExports};
use crate::value::FnValue;
use crate::sanitize::{CompiledRules, sanitize_key};
use crate::value::{Map, ObjectRef, Value};

/// One loaded module file, classified.
pub struct FileProbe {
    pub path: PathBuf,
    /// Sanitized basename key.
    pub key: String,
    /// Normalized (dual-shape) exports, instantiated for this load.
    pub exports: RawExports,
    pub has_default: bool,
    pub is_self_referential: bool,
}

/// Directory-wide classification consumed by the decider.
pub struct DirectoryAnalysis {
    pub dir: PathBuf,
    pub probes: Vec<FileProbe>,
    pub sub_dirs: Vec<PathBuf>,
    pub total_default_exports: usize,
    pub self_referential_files: HashSet<String>,
}

/// The counts the decider needs after the probes have been consumed.
#[derive(Clone, Copy, Debug)]
pub struct DirSummary {
    pub total_default_exports: usize,
    pub module_count: usize,
    /// Modules whose default export is a function (root-callable rule).
    pub default_fn_count: usize,
}

impl DirectoryAnalysis {
    pub fn has_multiple_default_exports(&self) -> bool {
        self.total_default_exports >= 2
    }

    pub fn summary(&self) -> DirSummary {
        DirSummary {
            total_default_exports: self.total_default_exports,
            module_count: self.probes.len(),
            default_fn_count: self
                .probes
                .iter()
                .filter(|p| matches!(p.exports.default, Some(Value::Function(_))))
                .count(),
        }
    }
}

/// Collapse the wrapped module shape into the dual shape.
fn normalize(raw: RawExports) -> RawExports {
    if raw.shape != ExportShape::Wrapped {
        return raw;
    }
    match raw.default {
        Some(Value::Object(wrapper)) => {
            let mut named: Map = IndexMap::new();
            let mut default = None;
            for (key, value) in wrapper.entries() {
                if key == "default" {
                    default = Some(value);
                } else {
                    named.insert(key, value);
                }
            }
            // named exports alongside the wrapper are unusual but harmless
            for (key, value) in raw.named {
                named.entry(key).or_insert(value);
            }
            RawExports {
                shape: ExportShape::Dual,
                default,
                named,
            }
        }
        _ => RawExports {
            shape: ExportShape::Dual,
            ..raw
        },
    }
}

/// Load and classify one module file.
pub fn probe_file(
    resolver: &dyn ModuleResolver,
    rules: &CompiledRules,
    path: &Path,
) -> Result<FileProbe> {
    let raw = resolver.load(path)?;
    let raw = normalize(raw);
    let key = sanitize_key(&stem_of(path), rules);

    let default = raw.default.map(|v| v.instantiate());
    let mut named: Map = IndexMap::new();
    for (name, value) in raw.named {
        named.insert(name, value.instantiate());
    }

    let is_self_referential = named.keys().any(|name| sanitize_key(name, rules) == key);
    let has_default = default.is_some();
    Ok(FileProbe {
        path: path.to_path_buf(),
        key,
        exports: RawExports {
            shape: ExportShape::Dual,
            default,
            named,
        },
        has_default,
        is_self_referential,
    })
}

/// Load every candidate file in a directory and classify the directory.
pub fn analyze_directory(
    resolver: &dyn ModuleResolver,
    rules: &CompiledRules,
    dir: &Path,
    listing: &DirListing,
    skip_broken: bool,
) -> Result<DirectoryAnalysis> {
    let mut probes = Vec::new();
    for file in &listing.files {
        match probe_file(resolver, rules, file) {
            Ok(probe) => probes.push(probe),
            Err(e) if skip_broken => {
                eprintln!("[lazytree][warn] skipping {}: {e}", file.display());
            }
            Err(e) => return Err(e),
        }
    }

    let total_default_exports = probes.iter().filter(|p| p.has_default).count();
    let self_referential_files = probes
        .iter()
        .filter(|p| p.is_self_referential)
        .map(|p| p.key.clone())
        .collect();

    Ok(DirectoryAnalysis {
        dir: dir.to_path_buf(),
        probes,
        sub_dirs: listing.dirs.clone(),
        total_default_exports,
        self_referential_files,
    })
}

/// What a module's default slot held.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DefaultKind {
    Function,
    Object,
    None,
}

/// Normalized single-module record; immutable once produced.
pub struct ModuleAnalysis {
    pub key: String,
    pub file: PathBuf,
    pub has_default: bool,
    pub default_kind: DefaultKind,
    /// Named exports under sanitized keys (default excluded).
    pub named: Map,
    pub is_callable_object: bool,
    pub is_self_referential: bool,
    /// The module's assembled value, ready for placement.
    pub value: Value,
}

/// Produce the [`ModuleAnalysis`] for one probed file.
pub fn analyze_module(probe: FileProbe, rules: &CompiledRules) -> Result<ModuleAnalysis> {
    let FileProbe {
        path,
        key,
        exports,
        has_default,
        is_self_referential,
    } = probe;

    if exports.is_empty() {
        return Err(Error::NoExports(path.display().to_string()));
    }

    let mut named: Map = IndexMap::new();
    for (name, value) in exports.named {
        named.insert(sanitize_key(&name, rules), value);
    }

    match exports.default {
        Some(Value::Function(f)) => {
            // default-slot marker consumed by the decider downstream
            f.with_tag_mut(|tag| tag.from_default = true);
            for (name, value) in &named {
                f.props().set(name.clone(), value.clone());
            }
            Ok(ModuleAnalysis {
                key,
                file: path,
                has_default,
                default_kind: DefaultKind::Function,
                named,
                is_callable_object: false,
                is_self_referential,
                value: Value::Function(f),
            })
        }
        Some(Value::Object(obj)) => {
            if let Some(Value::Function(target)) = obj.get("default") {
                // callable object: invocation forwards to the inner default
                // function; the remaining members become methods. The facade
                // deliberately drops the `default` member so the resolved
                // tree stays cycle-free.
                let facade = target.instantiate();
                for (name, value) in obj.entries() {
                    if name != "default" {
                        facade.props().set(sanitize_key(&name, rules), value);
                    }
                }
                for (name, value) in &named {
                    facade.props().set(name.clone(), value.clone());
                }
                Ok(ModuleAnalysis {
                    key,
                    file: path,
                    has_default,
                    default_kind: DefaultKind::Object,
                    named,
                    is_callable_object: true,
                    is_self_referential,
                    value: Value::Function(facade),
                })
            } else {
                for (name, value) in &named {
                    obj.set(name.clone(), value.clone());
                }
                Ok(ModuleAnalysis {
                    key,
                    file: path,
                    has_default,
                    default_kind: DefaultKind::Object,
                    named,
                    is_callable_object: false,
                    is_self_referential,
                    value: Value::Object(obj),
                })
            }
        }
        Some(other) => {
            // scalar default (data modules): the value itself fills the slot
            Ok(ModuleAnalysis {
                key,
                file: path,
                has_default,
                default_kind: DefaultKind::None,
                named,
                is_callable_object: false,
                is_self_referential,
                value: other,
            })
        }
        None => {
            let obj = ObjectRef::from_map(named.clone());
            Ok(ModuleAnalysis {
                key,
                file: path,
                has_default: false,
                default_kind: DefaultKind::None,
                named,
                is_callable_object: false,
                is_self_referential,
                value: Value::Object(obj),
            })
        }
    }
}

/// The module value's own function, when the module resolves to one.
pub fn module_function(analysis: &ModuleAnalysis) -> Option<&FnValue> {
    analysis.value.as_function()
}
