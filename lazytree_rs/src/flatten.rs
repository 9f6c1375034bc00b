//! The flattening decider: given one module's analysis and its directory
//! context, choose how the module collapses into the API tree.
//!
//! Rules are ordered; the first match wins. Category-level flattening never
//! fires at the root, and the root-callable rule fires only there.

use crate::analyze::{DefaultKind, DirSummary, ModuleAnalysis};

/// The five mutually exclusive placements.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Decision {
    /// The module occupies its own key.
    PreserveNamespace,
    /// The module's slot is replaced by its single named export's value.
    AutoFlattenSingleNamed,
    /// The module's named exports merge directly into the parent container.
    FlattenToParent,
    /// The module's value becomes (or merges into) the directory itself.
    FlattenToCategory,
    /// The API root itself becomes this module's default function.
    UseAsRootCallable,
}

/// A placement plus an optional key override (case-preference rules).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatteningDecision {
    pub decision: Decision,
    pub preferred_key: Option<String>,
}

impl FlatteningDecision {
    fn plain(decision: Decision) -> Self {
        FlatteningDecision {
            decision,
            preferred_key: None,
        }
    }

    fn keyed(decision: Decision, key: impl Into<String>) -> Self {
        FlatteningDecision {
            decision,
            preferred_key: Some(key.into()),
        }
    }
}

/// Decide the placement of one module.
///
/// `category_key` is the sanitized key of the containing directory; `depth`
/// is the module's depth (root files are depth 0).
pub fn decide(
    analysis: &ModuleAnalysis,
    dir: &DirSummary,
    category_key: &str,
    depth: usize,
    generic_names: &[String],
) -> FlatteningDecision {
    let key = analysis.key.as_str();
    let fn_name = analysis.value.as_function().and_then(|f| f.name());
    let is_function = analysis.value.as_function().is_some();

    // 1. self-referential modules keep their namespace
    if analysis.is_self_referential {
        return FlatteningDecision::plain(Decision::PreserveNamespace);
    }

    // 2. multi-default directories: defaults keep namespaces, the rest
    //    merge into the parent
    if dir.total_default_exports >= 2 {
        return if analysis.has_default {
            FlatteningDecision::plain(Decision::PreserveNamespace)
        } else {
            FlatteningDecision::plain(Decision::FlattenToParent)
        };
    }

    // 3. a lone named export matching the filename replaces the slot
    if !analysis.has_default && analysis.named.len() == 1 {
        if let Some(name) = analysis.named.keys().next()
            && name == key
        {
            return FlatteningDecision::plain(Decision::AutoFlattenSingleNamed);
        }
    }

    // 4./5. module named like its directory collapses into the directory
    if depth > 0 && key == category_key {
        if is_function {
            return FlatteningDecision::plain(Decision::FlattenToCategory);
        }
        if analysis.default_kind == DefaultKind::Object {
            return FlatteningDecision::plain(Decision::FlattenToCategory);
        }
    }

    // 6. generic filenames alone in a folder promote their single export
    if depth > 0
        && generic_names.iter().any(|g| g == key)
        && dir.module_count == 1
        && !analysis.has_default
        && analysis.named.len() == 1
    {
        let export_name = analysis.named.keys().next().cloned().unwrap_or_default();
        return FlatteningDecision::keyed(Decision::FlattenToParent, export_name);
    }

    // 7. function name that case-matches the filename key wins the spelling
    if let Some(name) = &fn_name
        && name != key
        && name.eq_ignore_ascii_case(key)
    {
        return FlatteningDecision::keyed(Decision::PreserveNamespace, name.clone());
    }

    // 8. anonymous default functions adopt the category
    if depth > 0
        && analysis.default_kind == DefaultKind::Function
        && fn_name.as_deref().map(|n| n == "default").unwrap_or(true)
    {
        return FlatteningDecision::keyed(Decision::FlattenToCategory, category_key);
    }

    // 9. a single root default function makes the API root callable
    if depth == 0 && analysis.default_kind == DefaultKind::Function && dir.default_fn_count == 1 {
        return FlatteningDecision::plain(Decision::UseAsRootCallable);
    }

    FlatteningDecision::plain(Decision::PreserveNamespace)
}
