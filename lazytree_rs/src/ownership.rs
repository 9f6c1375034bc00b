//! Per-path ownership stacks and the `add_api` replay history.
//!
//! Invariant maintained here: a path appears in an owner's path set exactly
//! when that owner appears somewhere on the path's stack. The top of a stack
//! is the owner currently serving the slot; popping the last owner deletes
//! the path.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// The synthetic owner of everything the initial load installed.
pub const CORE_OWNER: &str = "core";

/// Options accepted by `add_api`.
#[derive(Clone, Debug, Default)]
pub struct AddApiOptions {
    /// Replace a slot even when its shape is incompatible with an in-place
    /// rewrite (set on rollback replays).
    pub force_overwrite: bool,
    /// Recorded replay intent: the slot should resume its previous target in
    /// place so externally held references keep working.
    pub mutate_existing: bool,
    /// Metadata attached to every function in the grafted subtree.
    pub metadata: Option<serde_json::Value>,
}

/// One recorded `add_api` invocation, for rollback replay.
#[derive(Clone, Debug)]
pub struct AddApiRecord {
    pub path: String,
    pub folder: PathBuf,
    pub owner: String,
    pub options: AddApiOptions,
    pub at: DateTime<Utc>,
}

/// Where a removed owner sat on the stack.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Removal {
    /// The owner was serving the slot; a rollback (or deletion) follows.
    Top,
    /// The owner sat below the top; current state is unchanged.
    Inner,
    /// The owner was not on this path's stack.
    Absent,
}

#[derive(Default)]
pub struct OwnershipRegistry {
    stacks: HashMap<String, Vec<String>>,
    by_owner: HashMap<String, BTreeSet<String>>,
    history: Vec<AddApiRecord>,
}

impl OwnershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: &str, owner: &str) {
        self.stacks
            .entry(path.to_string())
            .or_default()
            .push(owner.to_string());
        self.by_owner
            .entry(owner.to_string())
            .or_default()
            .insert(path.to_string());
    }

    pub fn current_owner(&self, path: &str) -> Option<&str> {
        self.stacks
            .get(path)
            .and_then(|stack| stack.last())
            .map(String::as_str)
    }

    pub fn stack_of(&self, path: &str) -> Vec<String> {
        self.stacks.get(path).cloned().unwrap_or_default()
    }

    pub fn paths_of(&self, owner: &str) -> Vec<String> {
        self.by_owner
            .get(owner)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tracked_paths(&self) -> Vec<String> {
        self.stacks.keys().cloned().collect()
    }

    /// Pop the top owner of a path's stack.
    pub fn pop(&mut self, path: &str) -> Option<String> {
        let stack = self.stacks.get_mut(path)?;
        let owner = stack.pop()?;
        self.after_removal(path, &owner);
        Some(owner)
    }

    /// Remove `owner` from the path's stack wherever it appears.
    pub fn remove_owner(&mut self, path: &str, owner: &str) -> Removal {
        let Some(stack) = self.stacks.get_mut(path) else {
            return Removal::Absent;
        };
        if !stack.iter().any(|o| o == owner) {
            return Removal::Absent;
        }
        let was_top = stack.last().map(|o| o == owner).unwrap_or(false);
        stack.retain(|o| o != owner);
        self.after_removal(path, owner);
        if was_top { Removal::Top } else { Removal::Inner }
    }

    /// An empty stack means the path is gone.
    pub fn is_empty_stack(&self, path: &str) -> bool {
        self.stacks.get(path).map(Vec::is_empty).unwrap_or(true)
    }

    /// Drop a path and every owner's claim to it.
    pub fn delete_path(&mut self, path: &str) {
        if let Some(stack) = self.stacks.remove(path) {
            for owner in stack {
                self.unlink(path, &owner);
            }
        }
        // removal via pop may have emptied the stack already
        for set in self.by_owner.values_mut() {
            set.remove(path);
        }
        self.by_owner.retain(|_, set| !set.is_empty());
    }

    pub fn clear(&mut self) {
        self.stacks.clear();
        self.by_owner.clear();
    }

    pub fn record(&mut self, record: AddApiRecord) {
        self.history.push(record);
    }

    /// Latest history entry for this owner at this path.
    pub fn latest_record(&self, path: &str, owner: &str) -> Option<&AddApiRecord> {
        self.history
            .iter()
            .rev()
            .find(|r| r.path == path && r.owner == owner)
    }

    pub fn history(&self) -> &[AddApiRecord] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn after_removal(&mut self, path: &str, owner: &str) {
        let still_present = self
            .stacks
            .get(path)
            .map(|stack| stack.iter().any(|o| o == owner))
            .unwrap_or(false);
        if !still_present {
            self.unlink(path, owner);
        }
    }

    fn unlink(&mut self, path: &str, owner: &str) {
        if let Some(set) = self.by_owner.get_mut(owner) {
            set.remove(path);
            if set.is_empty() {
                self.by_owner.remove(owner);
            }
        }
    }

    /// Test aid: the stack/path-set agreement invariant.
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        for (path, stack) in &self.stacks {
            for owner in stack {
                let linked = self
                    .by_owner
                    .get(owner)
                    .map(|set| set.contains(path))
                    .unwrap_or(false);
                if !linked {
                    return false;
                }
            }
        }
        for (owner, paths) in &self.by_owner {
            for path in paths {
                let on_stack = self
                    .stacks
                    .get(path)
                    .map(|stack| stack.iter().any(|o| o == owner))
                    .unwrap_or(false);
                if !on_stack {
                    return false;
                }
            }
        }
        true
    }
}
