//! Shared fixtures: on-disk directory trees plus a module registry that
//! attaches export surfaces to their files.

use std::path::Path;
use std::sync::Arc;

use lazytree::config::ApiOptions;
use lazytree::fs_utils::ExtensionFilter;
use lazytree::resolver::RegistryResolver;
use tempfile::TempDir;

/// Create a directory tree; entries ending in `/` are directories, the rest
/// are empty module files.
pub fn tree(entries: &[&str]) -> TempDir {
    let tmp = tempfile::tempdir().expect("tmp dir");
    for entry in entries {
        let path = tmp.path().join(entry.trim_end_matches('/'));
        if entry.ends_with('/') {
            std::fs::create_dir_all(&path).expect("mkdir");
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("mkdir parent");
            }
            std::fs::write(&path, "").expect("touch");
        }
    }
    tmp
}

/// Options wired to a registry resolver over `.rs` fixture files.
pub fn options(dir: &Path, registry: Arc<RegistryResolver>) -> ApiOptions {
    ApiOptions {
        file_filter: Some(Arc::new(ExtensionFilter::new(["rs"]))),
        ..ApiOptions::new(dir)
    }
    .with_resolver(registry)
}
