//! # lazytree
//!
//! **Filesystem-to-callable-API loader** - scan a directory tree of module
//! files once and call it as a single navigable (optionally callable) API
//! whose shape mirrors the tree.
//!
//! Three subsystems do the heavy lifting:
//!
//! - **Structural resolver** - per-directory, per-module decisions about how
//!   exports collapse into API paths (flattening, auto-merge, multi-default
//!   disambiguation, self-reference, name preference).
//! - **Lazy/eager materializer** - the same resolved shape either built up
//!   front or behind slots that materialize on first access.
//! - **Per-instance runtime** - live `self`/`context`/`reference` access for
//!   module code under two interchangeable propagation engines, plus a
//!   priority-ordered, pattern-matched hook layer around every API call.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lazytree::{ApiOptions, Value};
//! use lazytree::resolver::RegistryResolver;
//!
//! # async fn demo() -> lazytree::Result<()> {
//! // attach export surfaces to the files of a directory tree
//! let registry = Arc::new(RegistryResolver::new());
//! registry.module("math/math.rs", |m| {
//!     m.named_fn("math", |args| {
//!         let a = args.first().and_then(Value::as_int).unwrap_or(0);
//!         let b = args.get(1).and_then(Value::as_int).unwrap_or(0);
//!         Ok(Value::Int(a + b))
//!     });
//! });
//!
//! let api = lazytree::load(
//!     ApiOptions::new("./api").with_resolver(registry),
//! )?;
//! let sum = api.call("math", vec![Value::Int(2), Value::Int(3)]).await?;
//! assert_eq!(sum, Value::Int(5));
//! # Ok(())
//! # }
//! ```
//!
//! Data directories work with no registration at all: `.json` and `.toml`
//! files load as object exports through the default resolver.
//!
//! ## Live references
//!
//! Module code reads its hosting instance through [`current`]: the values
//! resolve per call, per instance, across await points, under either engine.
//!
//! ## Hooks
//!
//! ```rust,no_run
//! use lazytree::hooks::{HookFlow, HookOptions, HookType};
//! # fn demo(api: &lazytree::BoundApi) {
//! api.hooks().on_with(
//!     HookType::Before,
//!     HookOptions { priority: 200, pattern: "math.*".into() },
//!     |event| {
//!         // short-circuit every math call
//!         let _ = &event.args;
//!         Ok(HookFlow::Replace(lazytree::Value::Str("cached".into())))
//!     },
//! ).unwrap();
//! # }
//! ```

// ============================================================================
// Core Modules
// ============================================================================

/// Per-directory and per-module export classification.
pub mod analyze;

/// Tree construction: the depth-first category/root builder.
mod builder;

/// Loader options, `lazytree.toml` support, option resolution.
pub mod config;

/// Error taxonomy.
pub mod error;

/// The flattening decider.
pub mod flatten;

/// Directory listing and the "should include file" contract.
pub mod fs_utils;

/// Priority-ordered, pattern-matched call interceptors.
pub mod hooks;

/// The bound API surface: navigation, dispatch, grafting, reload.
pub mod instance;

/// Lazy directory slots.
pub mod lazy;

/// In-place live-binding mutation.
pub mod live;

/// Immutable-but-extensible function metadata.
pub mod metadata;

/// Ownership stacks and `add_api` history.
pub mod ownership;

/// The dotted path language and its glob patterns.
pub mod pattern;

/// Process-wide instance registry.
mod registry;

/// Module resolution: registry, data files, chains.
pub mod resolver;

/// The dispatcher, the two propagation engines, result wrapping.
pub mod runtime;

/// File/folder name sanitization into dotted-identifier keys.
pub mod sanitize;

/// The dynamic value model.
pub mod value;

/// Hot-reload transport (filesystem watching).
pub mod watch;

// ============================================================================
// Re-exports for convenience
// ============================================================================

/// Loader options.
pub use config::{ApiOptions, Engine, Mode};

/// Crate error and result types.
pub use error::{Error, Result};

/// The user-visible instance handle.
pub use instance::BoundApi;

/// Live references for module code (`self`/`context`/`reference`).
pub use runtime::current;

/// The dynamic value model.
pub use value::{FnValue, ObjectRef, Value, ValueKind};

/// Graft options and the synthetic core owner.
pub use ownership::{AddApiOptions, CORE_OWNER};

/// Load a directory tree into a fresh instance.
pub fn load(options: ApiOptions) -> Result<BoundApi> {
    instance::load(options)
}
