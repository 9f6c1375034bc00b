//! Loader options and the optional `lazytree.toml` config file.
//!
//! Option resolution is three-layered: programmatic values win over file
//! values, file values win over built-in defaults. Unset programmatic fields
//! are `None`, so "the caller didn't say" and "the caller chose the default"
//! stay distinguishable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::fs_utils::{ExtensionFilter, FileFilter};
use crate::resolver::{DataResolver, ModuleResolver};
use crate::sanitize::{CompiledRules, NameRules};
use crate::value::Map;

/// Default traversal depth cap.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Filenames the decider treats as meaningless namespaces (rule set is
/// configurable; this is the default).
pub const DEFAULT_GENERIC_NAMES: &[&str] =
    &["singlefile", "index", "main", "default", "mod", "lib"];

/// Materialization strategy.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Materialize the whole tree at load time.
    #[default]
    Eager,
    /// Materialize directory slots on first access.
    Lazy,
}

/// Live-reference propagation strategy.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Ambient task-scoped propagation. Composes with async continuations;
    /// the recommended engine.
    #[default]
    Ambient,
    /// Identity-tagged dispatch through a process-global "currently active"
    /// slot, save/restored around every call. Strictly cooperative.
    Identity,
}

/// Options accepted by [`crate::load`].
#[derive(Clone, Default)]
pub struct ApiOptions {
    /// Root directory to scan.
    pub dir: PathBuf,
    pub mode: Option<Mode>,
    pub engine: Option<Engine>,
    pub max_depth: Option<usize>,
    pub debug: Option<bool>,
    /// Track ownership and keep replay history for reload/rollback.
    pub hot_reload: bool,
    /// Skip module files whose resolver fails instead of aborting the load.
    pub skip_broken: bool,
    /// Initial per-instance context entries.
    pub context: Map,
    /// Initial per-instance reference entries.
    pub reference: Map,
    pub api_name_rules: Option<NameRules>,
    /// Decider rule-6 filename list override.
    pub generic_names: Option<Vec<String>>,
    pub resolver: Option<Arc<dyn ModuleResolver>>,
    pub file_filter: Option<Arc<dyn FileFilter>>,
    /// Read `lazytree.toml` from the root directory (on by default).
    pub skip_config_file: bool,
}

impl ApiOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ApiOptions {
            dir: dir.into(),
            ..ApiOptions::default()
        }
    }

    pub fn lazy(mut self) -> Self {
        self.mode = Some(Mode::Lazy);
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn FileFilter>) -> Self {
        self.file_filter = Some(filter);
        self
    }
}

/// `[include]` table of the config file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct IncludeConfig {
    /// File extensions to load.
    pub extensions: Vec<String>,
    /// Glob patterns excluded from loading (matched against file names).
    pub exclude: Vec<String>,
}

/// Optional `lazytree.toml` at the scanned root.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub mode: Option<Mode>,
    pub engine: Option<Engine>,
    pub max_depth: Option<usize>,
    pub debug: Option<bool>,
    pub generic_names: Option<Vec<String>>,
    pub naming: Option<NameRules>,
    pub include: IncludeConfig,
}

impl FileConfig {
    /// Load from `<root>/lazytree.toml`. Missing or unreadable files fall
    /// back to defaults; parse failures warn and fall back.
    pub fn load(root: &Path) -> Self {
        let path = root.join("lazytree.toml");
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("[lazytree][warn] failed to parse {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[lazytree][warn] failed to read {}: {e}", path.display());
                Self::default()
            }
        }
    }
}

/// Fully resolved configuration handed to the builder and runtime.
#[derive(Clone)]
pub(crate) struct Resolved {
    pub dir: PathBuf,
    pub mode: Mode,
    pub engine: Engine,
    pub max_depth: usize,
    pub debug: bool,
    pub hot_reload: bool,
    pub skip_broken: bool,
    pub rules: CompiledRules,
    pub generic_names: Vec<String>,
    pub resolver: Arc<dyn ModuleResolver>,
    pub filter: Arc<dyn FileFilter>,
}

impl Resolved {
    pub fn from_options(opts: &ApiOptions) -> Result<Resolved> {
        if opts.dir.as_os_str().is_empty() {
            return Err(Error::config("no root directory given"));
        }
        if !opts.dir.is_dir() {
            return Err(Error::config(format!(
                "root directory {} does not exist",
                opts.dir.display()
            )));
        }

        let file = if opts.skip_config_file {
            FileConfig::default()
        } else {
            FileConfig::load(&opts.dir)
        };

        let naming = opts
            .api_name_rules
            .clone()
            .or(file.naming)
            .unwrap_or_else(NameRules::camel);
        let generic_names = opts
            .generic_names
            .clone()
            .or(file.generic_names)
            .unwrap_or_else(|| DEFAULT_GENERIC_NAMES.iter().map(|s| s.to_string()).collect());

        let filter: Arc<dyn FileFilter> = match &opts.file_filter {
            Some(f) => f.clone(),
            None if !file.include.extensions.is_empty() || !file.include.exclude.is_empty() => {
                Arc::new(ExtensionFilter::from_config(&file.include)?)
            }
            None => Arc::new(ExtensionFilter::data()),
        };

        Ok(Resolved {
            dir: opts.dir.clone(),
            mode: opts.mode.or(file.mode).unwrap_or_default(),
            engine: opts.engine.or(file.engine).unwrap_or_default(),
            max_depth: opts
                .max_depth
                .or(file.max_depth)
                .unwrap_or(DEFAULT_MAX_DEPTH),
            debug: opts.debug.or(file.debug).unwrap_or(false),
            hot_reload: opts.hot_reload,
            skip_broken: opts.skip_broken,
            rules: naming.compile(),
            generic_names,
            resolver: opts
                .resolver
                .clone()
                .unwrap_or_else(|| Arc::new(DataResolver::new())),
            filter,
        })
    }
}
