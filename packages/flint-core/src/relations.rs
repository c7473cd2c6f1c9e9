//! The relational dependency store of one analysis
//!
//! Twelve named relations over sources, products, libraries and class
//! names. All updates go through [`Relations::add_source`] and
//! [`Relations::remove_sources`] so that cross-relation invariants hold:
//! inheritance edges are always mirrored into the member-reference
//! relation, and removing a source removes every edge where the source or
//! any of its declared classes is an endpoint.

use crate::api::UsedName;
use crate::error::{CoreError, Result};
use crate::ids::{BinaryClassName, ClassName, LibraryId, ProductId, SourceId};
use crate::relation::Relation;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// How one class depends on another, as reported by the compiler.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DependencyContext {
    /// "from mentions on" somewhere in its body or signatures.
    MemberRef,
    /// "from has on in a parent position".
    Inheritance,
    /// Inheritance originating inside a local (non-top-level) scope.
    LocalInheritance,
}

/// One class-to-class dependency edge.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ClassDependency {
    /// The class being depended on.
    pub on: ClassName,
    /// The class declaring the dependency.
    pub from: ClassName,
    pub context: DependencyContext,
}

impl ClassDependency {
    pub fn new(on: impl Into<ClassName>, from: impl Into<ClassName>, context: DependencyContext) -> Self {
        Self {
            on: on.into(),
            from: from.into(),
            context,
        }
    }
}

/// One class file emitted for a top-level (non-local) class.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NonLocalProduct {
    pub product: ProductId,
    pub binary_name: BinaryClassName,
    pub class_name: ClassName,
}

/// Internal/external split of one class-level dependency relation.
/// Edges run from → on; `reverse` answers "who depends on this".
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClassDependencies {
    pub internal: Relation<ClassName, ClassName>,
    pub external: Relation<ClassName, ClassName>,
}

impl ClassDependencies {
    fn merge(&mut self, other: &ClassDependencies) {
        self.internal.merge(&other.internal);
        self.external.merge(&other.external);
    }

    /// Drop the edges declared by the given classes. Edges of surviving
    /// classes that point at removed ones stay: the next invalidation
    /// round finds the users of a pruned class through exactly those
    /// reverse entries.
    fn remove_classes(&mut self, classes: &FxHashSet<ClassName>) {
        self.internal.remove_all(classes.iter());
        self.external.remove_all(classes.iter());
    }
}

/// Facts dropped by [`Relations::remove_sources`], so the surrounding
/// analysis can prune the matching stamps, APIs and infos.
#[derive(Debug, Default)]
pub struct RemovedFacts {
    pub products: FxHashSet<ProductId>,
    pub classes: FxHashSet<ClassName>,
    pub libraries: FxHashSet<LibraryId>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Relations {
    /// Which products came from which source.
    pub src_prod: Relation<SourceId, ProductId>,
    /// Binary (non-source-tracked) dependencies per source.
    pub library_dep: Relation<SourceId, LibraryId>,
    /// Names each library supplies.
    pub library_class_name: Relation<LibraryId, BinaryClassName>,
    /// Non-local classes generated per source.
    pub classes: Relation<SourceId, ClassName>,
    /// Source-level to binary name pairs.
    pub product_class_name: Relation<ClassName, BinaryClassName>,
    /// "A refers to B".
    pub member_ref: ClassDependencies,
    /// "A has B in a parent position".
    pub inheritance: ClassDependencies,
    /// Inheritance originating inside a local scope.
    pub local_inheritance: ClassDependencies,
    /// Unqualified identifiers referenced per class, tagged by scope.
    pub used_names: Relation<ClassName, UsedName>,
    /// Classes declared per source.
    pub declared_classes: Relation<SourceId, ClassName>,
}

impl Relations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every relational fact of one compiled source.
    #[allow(clippy::too_many_arguments)]
    pub fn add_source(
        &mut self,
        source: &SourceId,
        non_local_products: &[NonLocalProduct],
        local_products: &[ProductId],
        declared: &[ClassName],
        internal_deps: &[ClassDependency],
        external_deps: &[ClassDependency],
        library_deps: &[(LibraryId, BinaryClassName)],
        used_names: &[(ClassName, UsedName)],
    ) {
        for p in non_local_products {
            self.src_prod.add_pair(source.clone(), p.product.clone());
            self.classes.add_pair(source.clone(), p.class_name.clone());
            self.product_class_name
                .add_pair(p.class_name.clone(), p.binary_name.clone());
        }
        for p in local_products {
            self.src_prod.add_pair(source.clone(), p.clone());
        }
        self.declared_classes
            .add(source.clone(), declared.iter().cloned());

        for dep in internal_deps {
            self.add_class_dependency(dep, true);
        }
        for dep in external_deps {
            self.add_class_dependency(dep, false);
        }

        for (library, binary_name) in library_deps {
            self.library_dep.add_pair(source.clone(), library.clone());
            self.library_class_name
                .add_pair(library.clone(), binary_name.clone());
        }

        for (class, used) in used_names {
            self.used_names.add_pair(class.clone(), used.clone());
        }
    }

    fn add_class_dependency(&mut self, dep: &ClassDependency, internal: bool) {
        fn side(deps: &mut ClassDependencies, internal: bool) -> &mut Relation<ClassName, ClassName> {
            if internal {
                &mut deps.internal
            } else {
                &mut deps.external
            }
        }

        // To inherit a type you must reference it: every inheritance
        // edge is mirrored into member_ref.
        match dep.context {
            DependencyContext::MemberRef => {}
            DependencyContext::Inheritance => {
                side(&mut self.inheritance, internal).add_pair(dep.from.clone(), dep.on.clone());
            }
            DependencyContext::LocalInheritance => {
                side(&mut self.local_inheritance, internal)
                    .add_pair(dep.from.clone(), dep.on.clone());
            }
        }
        side(&mut self.member_ref, internal).add_pair(dep.from.clone(), dep.on.clone());
    }

    /// Remove all facts keyed on the given sources, including every
    /// edge their declared classes declare.
    pub fn remove_sources(&mut self, sources: &FxHashSet<SourceId>) -> RemovedFacts {
        let mut removed = RemovedFacts::default();

        for source in sources {
            removed
                .products
                .extend(self.src_prod.forward(source).cloned());
            removed.classes.extend(self.classes.forward(source).cloned());
            removed
                .classes
                .extend(self.declared_classes.forward(source).cloned());
        }

        self.src_prod.remove_all(sources.iter());
        self.library_dep.remove_all(sources.iter());
        self.classes.remove_all(sources.iter());
        self.declared_classes.remove_all(sources.iter());

        self.product_class_name.remove_all(removed.classes.iter());
        self.member_ref.remove_classes(&removed.classes);
        self.inheritance.remove_classes(&removed.classes);
        self.local_inheritance.remove_classes(&removed.classes);
        self.used_names.remove_all(removed.classes.iter());

        // Libraries no source depends on anymore drop out entirely.
        let orphaned: Vec<LibraryId> = self
            .library_class_name
            .keys()
            .filter(|lib| !self.library_dep.has_value(lib))
            .cloned()
            .collect();
        self.library_class_name.remove_all(orphaned.iter());
        removed.libraries.extend(orphaned);

        removed
    }

    /// Union every constituent relation of `other` into `self`.
    pub fn merge(&mut self, other: &Relations) {
        self.src_prod.merge(&other.src_prod);
        self.library_dep.merge(&other.library_dep);
        self.library_class_name.merge(&other.library_class_name);
        self.classes.merge(&other.classes);
        self.product_class_name.merge(&other.product_class_name);
        self.member_ref.merge(&other.member_ref);
        self.inheritance.merge(&other.inheritance);
        self.local_inheritance.merge(&other.local_inheritance);
        self.used_names.merge(&other.used_names);
        self.declared_classes.merge(&other.declared_classes);
    }

    /// Sources defining the given class.
    pub fn defines_class<'a>(&'a self, class: &ClassName) -> impl Iterator<Item = &'a SourceId> + 'a {
        self.classes.reverse(class)
    }

    /// Products claimed by more than one source. Well-formed inputs have
    /// none; the invalidator recompiles all claimants when they do.
    pub fn contested_products(&self) -> impl Iterator<Item = &ProductId> + '_ {
        self.src_prod
            .values()
            .filter(|p| self.src_prod.reverse(p).take(2).count() > 1)
    }

    /// Verify cross-relation invariants. Run under `strict_mode`.
    pub fn check_invariants(&self) -> Result<()> {
        for (from, on) in self.inheritance.internal.all() {
            if !self.member_ref.internal.contains(from, on) {
                return Err(CoreError::contract(format!(
                    "inheritance edge {from} -> {on} missing from member_ref.internal"
                )));
            }
        }
        for (from, on) in self.inheritance.external.all() {
            if !self.member_ref.external.contains(from, on) {
                return Err(CoreError::contract(format!(
                    "inheritance edge {from} -> {on} missing from member_ref.external"
                )));
            }
        }
        Ok(())
    }
}
