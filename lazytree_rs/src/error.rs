//! Error taxonomy for loader, dispatch, and path operations.
//!
//! Every variant is cheap to clone: failures cross hook boundaries (error
//! hooks observe them) and lazy slots re-raise them on each access, so the
//! underlying causes are captured as rendered strings at the point of failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Bad options or a missing root directory. Fatal to the loader call.
    #[error("configuration error: {0}")]
    Config(String),

    /// A resolver failed to produce exports for a module file.
    #[error("failed to load module {path}: {message}")]
    ModuleLoad { path: String, message: String },

    /// A module resolved to an empty export surface.
    #[error("module {0} has no exports")]
    NoExports(String),

    /// Empty segment or non-identifier input in a dotted API path.
    #[error("invalid api path '{0}'")]
    Path(String),

    /// No slot exists at the requested path.
    #[error("no api slot at path '{0}'")]
    MissingPath(String),

    /// Addressed slot exists but cannot satisfy the operation
    /// (e.g. calling a non-function).
    #[error("slot at '{path}' is {kind}, not callable")]
    NotCallable { path: String, kind: &'static str },

    /// Malformed hook pattern (bad syntax or brace nesting past the bound).
    #[error("invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// A before/after hook failed; carries the phase it came from.
    #[error("{phase} hook failed for '{path}': {message}")]
    Hook {
        phase: &'static str,
        path: String,
        message: String,
    },

    /// A user module function reported a failure.
    #[error("{0}")]
    Call(String),

    /// Operation attempted against an instance after `shutdown()`.
    #[error("instance has been shut down")]
    Shutdown,
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn call(msg: impl Into<String>) -> Self {
        Error::Call(msg.into())
    }

    pub fn module_load(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ModuleLoad {
            path: path.into(),
            message: message.into(),
        }
    }
}
