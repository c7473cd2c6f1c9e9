//! Change descriptions
//!
//! `InitialChanges` is what the change detector hands the invalidator at
//! the start of a run; `ApiChange` is the classified difference between
//! two analyzed APIs of one class, recomputed after every cycle.

use crate::config::IncOptions;
use flint_core::{AnalyzedClass, ClassName, LibraryId, Name, ProductId, SourceId, UseScope};
use rustc_hash::FxHashSet;

/// Partition of the current and previous source sets.
#[derive(Debug, Clone, Default)]
pub struct SourceChanges {
    pub added: FxHashSet<SourceId>,
    pub removed: FxHashSet<SourceId>,
    /// Present in both, stamp no longer equivalent.
    pub changed: FxHashSet<SourceId>,
    pub unmodified: FxHashSet<SourceId>,
}

impl SourceChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Sources that must enter the first cycle: new and modified ones.
    /// Removed sources are pruned, not recompiled.
    pub fn to_recompile(&self) -> impl Iterator<Item = &SourceId> + '_ {
        self.added.iter().chain(self.changed.iter())
    }
}

/// Everything the change detector found before the first cycle.
#[derive(Debug, Default)]
pub struct InitialChanges {
    pub source_changes: SourceChanges,
    /// Previous products whose stamp differs or that are gone.
    pub removed_products: FxHashSet<ProductId>,
    /// Libraries considered changed under the three-clause rule.
    pub library_deps: FxHashSet<LibraryId>,
    pub external_api_changes: Vec<ApiChange>,
}

impl InitialChanges {
    pub fn is_empty(&self) -> bool {
        self.source_changes.is_empty()
            && self.removed_products.is_empty()
            && self.library_deps.is_empty()
            && self.external_api_changes.is_empty()
    }
}

/// Classified API change of one class, driving the invalidation rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiChange {
    /// Either side defines a macro and macro-definition recompilation is
    /// on. Pre-empts the name-hash diff.
    MacroDefinition(ClassName),
    /// The trait's extra hash changed but its API hash did not: only
    /// private trait members moved.
    TraitPrivateMembersModified(ClassName),
    /// The symmetric difference of the per-name hash tuples.
    NamesChange {
        class: ClassName,
        modified_names: FxHashSet<(Name, UseScope)>,
    },
}

impl ApiChange {
    pub fn class(&self) -> &ClassName {
        match self {
            ApiChange::MacroDefinition(c) => c,
            ApiChange::TraitPrivateMembersModified(c) => c,
            ApiChange::NamesChange { class, .. } => class,
        }
    }
}

/// Classify the difference between two analyzed APIs of the same class.
/// Returns `None` when nothing observable changed.
pub fn diff_analyzed(
    old: &AnalyzedClass,
    new: &AnalyzedClass,
    options: &IncOptions,
) -> Option<ApiChange> {
    let hashes_equal = old.api_hash == new.api_hash && old.extra_hash == new.extra_hash;
    if hashes_equal {
        return None;
    }

    if options.recompile_on_macro_def && (old.has_macro || new.has_macro) {
        return Some(ApiChange::MacroDefinition(new.name.clone()));
    }

    if old.api_hash == new.api_hash && (old.is_trait() || new.is_trait()) {
        return Some(ApiChange::TraitPrivateMembersModified(new.name.clone()));
    }

    let old_hashes: FxHashSet<_> = old
        .name_hashes
        .iter()
        .map(|nh| (nh.name.clone(), nh.scope, nh.hash))
        .collect();
    let new_hashes: FxHashSet<_> = new
        .name_hashes
        .iter()
        .map(|nh| (nh.name.clone(), nh.scope, nh.hash))
        .collect();

    let modified_names = old_hashes
        .symmetric_difference(&new_hashes)
        .map(|(name, scope, _)| (name.clone(), *scope))
        .collect();

    Some(ApiChange::NamesChange {
        class: new.name.clone(),
        modified_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_core::hashing::analyze;
    use flint_core::{ClassApi, DefinitionType, MemberDef, MemberKind, Visibility};

    fn analyzed(api: ClassApi) -> AnalyzedClass {
        analyze(0, Some(api), None, false, None)
    }

    fn member(name: &str, sig: &str) -> MemberDef {
        MemberDef::new(name, MemberKind::Def, Visibility::Public, sig)
    }

    #[test]
    fn test_unchanged_api_yields_no_change() {
        let a = analyzed(ClassApi::new("p.A", DefinitionType::Class).with_members([member("foo", "(): Int")]));
        assert_eq!(diff_analyzed(&a, &a, &IncOptions::default()), None);
    }

    #[test]
    fn test_names_change_carries_symmetric_difference() {
        let old = analyzed(
            ClassApi::new("p.C", DefinitionType::Class)
                .with_members([member("foo", "(): Int"), member("bar", "(): Int")]),
        );
        let new = analyzed(
            ClassApi::new("p.C", DefinitionType::Class).with_members([
                member("foo", "(x: Int): Int"),
                member("bar", "(): Int"),
            ]),
        );

        match diff_analyzed(&old, &new, &IncOptions::default()).unwrap() {
            ApiChange::NamesChange { modified_names, .. } => {
                assert!(modified_names.contains(&(Name::from("foo"), UseScope::Default)));
                assert!(!modified_names
                    .iter()
                    .any(|(name, _)| name.as_str() == "bar"));
            }
            other => panic!("expected NamesChange, got {other:?}"),
        }
    }

    #[test]
    fn test_macro_change_preempts_names() {
        let old = analyzed(ClassApi::new("p.M", DefinitionType::Module).with_members([
            MemberDef::new("expand", MemberKind::MacroDef, Visibility::Public, "(): Tree"),
        ]));
        let new = analyzed(ClassApi::new("p.M", DefinitionType::Module).with_members([
            MemberDef::new("expand", MemberKind::MacroDef, Visibility::Public, "(t: Tree): Tree"),
        ]));

        assert_eq!(
            diff_analyzed(&old, &new, &IncOptions::default()),
            Some(ApiChange::MacroDefinition(ClassName::from("p.M")))
        );

        let no_macro_opt = IncOptions {
            recompile_on_macro_def: false,
            ..IncOptions::default()
        };
        assert!(matches!(
            diff_analyzed(&old, &new, &no_macro_opt),
            Some(ApiChange::NamesChange { .. })
        ));
    }

    #[test]
    fn test_trait_private_members_modified() {
        let private = |sig: &str, name: &str| {
            MemberDef::new(name, MemberKind::Def, Visibility::Private, sig)
        };
        let old = analyzed(
            ClassApi::new("p.T", DefinitionType::Trait)
                .with_members([member("draw", "(): Unit"), private("(): Int", "helper")]),
        );
        let new = analyzed(
            ClassApi::new("p.T", DefinitionType::Trait)
                .with_members([member("draw", "(): Unit"), private("(): Int", "helperRenamed")]),
        );

        assert_eq!(
            diff_analyzed(&old, &new, &IncOptions::default()),
            Some(ApiChange::TraitPrivateMembersModified(ClassName::from("p.T")))
        );
    }

    #[test]
    fn test_diff_against_empty_reports_all_names() {
        let new = analyzed(
            ClassApi::new("p.C", DefinitionType::Class).with_members([member("foo", "(): Int")]),
        );
        let empty = AnalyzedClass::empty(ClassName::from("p.C"));

        match diff_analyzed(&empty, &new, &IncOptions::default()).unwrap() {
            ApiChange::NamesChange { modified_names, .. } => {
                assert!(modified_names.contains(&(Name::from("foo"), UseScope::Default)));
                assert!(modified_names.contains(&(Name::from("C"), UseScope::Default)));
            }
            other => panic!("expected NamesChange, got {other:?}"),
        }
    }
}
