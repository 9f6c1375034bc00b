//! Directory listing and the "should include file" contract.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::config::IncludeConfig;
use crate::error::{Error, Result};

/// Injected predicate deciding which directory entries participate in
/// loading. Hidden entries are excluded by the listing itself.
pub trait FileFilter: Send + Sync {
    fn include_file(&self, path: &Path) -> bool;

    fn include_dir(&self, _path: &Path) -> bool {
        true
    }
}

/// Default filter: include by extension set, minus excluded glob matches.
pub struct ExtensionFilter {
    extensions: HashSet<String>,
    exclude: Option<GlobSet>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExtensionFilter {
            extensions: extensions
                .into_iter()
                .map(|s| s.into().to_lowercase())
                .collect(),
            exclude: None,
        }
    }

    /// The data-module filter: what [`crate::resolver::DataResolver`] reads.
    pub fn data() -> Self {
        Self::new(["json", "toml"])
    }

    pub fn with_exclude(mut self, patterns: &[String]) -> Result<Self> {
        self.exclude = opt_globset(patterns)?;
        Ok(self)
    }

    pub(crate) fn from_config(include: &IncludeConfig) -> Result<Self> {
        let base = if include.extensions.is_empty() {
            Self::data()
        } else {
            Self::new(include.extensions.iter().cloned())
        };
        base.with_exclude(&include.exclude)
    }
}

impl FileFilter for ExtensionFilter {
    fn include_file(&self, path: &Path) -> bool {
        let by_ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false);
        if !by_ext {
            return false;
        }
        match (&self.exclude, path.file_name().and_then(|n| n.to_str())) {
            (Some(set), Some(name)) => !set.is_match(name),
            _ => true,
        }
    }
}

/// Build a glob set from patterns, `None` when the list is empty.
pub fn opt_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()
            .map_err(|e| Error::config(format!("invalid glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| Error::config(format!("invalid glob set: {e}")))
}

/// One directory level, already filtered and name-sorted.
pub struct DirListing {
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
}

/// Read one directory level. Hidden entries are skipped; files pass through
/// the filter; both lists sort case-insensitively by name so the resolved
/// API shape is stable across platforms.
pub fn list_dir(dir: &Path, filter: &dyn FileFilter) -> io::Result<DirListing> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for entry in std::fs::read_dir(dir)?.filter_map(io::Result::ok) {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if file_type.is_dir() {
            if filter.include_dir(&path) {
                dirs.push(path);
            }
        } else if file_type.is_file() && filter.include_file(&path) {
            files.push(path);
        }
    }

    let by_name = |p: &PathBuf| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    };
    files.sort_by_key(by_name);
    dirs.sort_by_key(by_name);

    Ok(DirListing { files, dirs })
}

/// File stem used as the module's basename key (before sanitization).
pub fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}
