//! The analysis snapshot
//!
//! One `Analysis` is the immutable record of one compilation outcome:
//! relations + APIs + stamps + per-source metadata + the compilations
//! log. It is created empty, populated source by source by the analysis
//! callback, merged with a pruned previous analysis at cycle end, and
//! either returned or fed into the next cycle.

use crate::api::{AnalyzedClass, UsedName};
use crate::error::{CoreError, Result};
use crate::ids::{BinaryClassName, ClassName, LibraryId, ProductId, SourceId};
use crate::info::{Compilation, SourceInfo};
use crate::relations::{ClassDependency, NonLocalProduct, Relations};
use crate::stamp::{Stamp, Stamps};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Analyzed APIs, split by where the definition lives: `internal` for
/// classes compiled in this project, `external` for classes looked up
/// from other analyses or the classpath.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Apis {
    pub internal: FxHashMap<ClassName, AnalyzedClass>,
    pub external: FxHashMap<ClassName, AnalyzedClass>,
}

impl Apis {
    pub fn merge(&mut self, other: &Apis) {
        for (name, api) in &other.internal {
            self.internal.insert(name.clone(), api.clone());
        }
        for (name, api) in &other.external {
            self.external.insert(name.clone(), api.clone());
        }
    }
}

/// Everything one compiled source contributes to an analysis, applied
/// atomically by [`Analysis::add_source`].
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub source: SourceId,
    pub stamp: Stamp,
    pub info: SourceInfo,
    /// One record per top-level name (companions already merged).
    pub analyzed_classes: Vec<AnalyzedClass>,
    pub declared: Vec<ClassName>,
    pub non_local_products: Vec<NonLocalProduct>,
    pub local_products: Vec<ProductId>,
    pub internal_deps: Vec<ClassDependency>,
    pub external_deps: Vec<ClassDependency>,
    pub library_deps: Vec<(LibraryId, BinaryClassName, Stamp)>,
    pub used_names: Vec<(ClassName, UsedName)>,
    pub product_stamps: Vec<(ProductId, Stamp)>,
}

impl Default for SourceEntry {
    fn default() -> Self {
        Self {
            source: SourceId::new(""),
            stamp: Stamp::Missing,
            info: SourceInfo::default(),
            analyzed_classes: Vec::new(),
            declared: Vec::new(),
            non_local_products: Vec::new(),
            local_products: Vec::new(),
            internal_deps: Vec::new(),
            external_deps: Vec::new(),
            library_deps: Vec::new(),
            used_names: Vec::new(),
            product_stamps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub relations: Relations,
    pub apis: Apis,
    pub stamps: Stamps,
    pub infos: FxHashMap<SourceId, SourceInfo>,
    pub compilations: Vec<Compilation>,
}

impl Analysis {
    pub fn empty() -> Self {
        Self::default()
    }

    /// All sources this analysis has facts for.
    pub fn source_set(&self) -> FxHashSet<SourceId> {
        self.stamps.sources.keys().cloned().collect()
    }

    /// Record one compiled source: updates every relevant relation, the
    /// API map, stamps and infos in one shot.
    pub fn add_source(&mut self, entry: SourceEntry) {
        self.relations.add_source(
            &entry.source,
            &entry.non_local_products,
            &entry.local_products,
            &entry.declared,
            &entry.internal_deps,
            &entry.external_deps,
            &entry
                .library_deps
                .iter()
                .map(|(lib, bin, _)| (lib.clone(), bin.clone()))
                .collect::<Vec<_>>(),
            &entry.used_names,
        );

        for analyzed in entry.analyzed_classes {
            self.apis.internal.insert(analyzed.name.clone(), analyzed);
        }

        self.stamps.sources.insert(entry.source.clone(), entry.stamp);
        for (product, stamp) in entry.product_stamps {
            self.stamps.products.insert(product, stamp);
        }
        for (library, _, stamp) in entry.library_deps {
            self.stamps.libraries.insert(library, stamp);
        }

        self.infos.insert(entry.source, entry.info);
    }

    /// Record the API of an external class discovered during dependency
    /// classification.
    pub fn add_external_api(&mut self, analyzed: AnalyzedClass) {
        self.apis.external.insert(analyzed.name.clone(), analyzed);
    }

    /// `--`: a new analysis without any fact keyed on the given sources,
    /// including their declared classes in dependency relations.
    pub fn without_sources(&self, sources: &FxHashSet<SourceId>) -> Analysis {
        let mut result = self.clone();
        let removed = result.relations.remove_sources(sources);

        for class in &removed.classes {
            result.apis.internal.remove(class);
        }
        for source in sources {
            result.stamps.sources.remove(source);
            result.infos.remove(source);
        }
        for product in &removed.products {
            result.stamps.products.remove(product);
        }
        for library in &removed.libraries {
            result.stamps.libraries.remove(library);
        }

        result
    }

    /// `++`: a new analysis unioning every constituent. On conflicting
    /// API entries the right-hand (fresher) side wins.
    pub fn merged(&self, other: &Analysis) -> Analysis {
        let mut result = self.clone();
        result.relations.merge(&other.relations);
        result.apis.merge(&other.apis);
        result.stamps.merge(&other.stamps);
        for (source, info) in &other.infos {
            result.infos.insert(source.clone(), info.clone());
        }
        result.compilations.extend(other.compilations.iter().cloned());
        result
    }

    /// The recorded API of an internal class. Every name present in
    /// `relations.classes` must have one; a miss is a programming bug.
    pub fn internal_api(&self, class: &ClassName) -> Result<&AnalyzedClass> {
        let canonical = class.as_class();
        self.apis
            .internal
            .get(&canonical)
            .ok_or_else(|| CoreError::contract(format!("no analyzed API for class {canonical}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ClassApi, DefinitionType};
    use crate::hashing;
    use crate::relations::DependencyContext;

    fn entry(src: &str, class: &str) -> SourceEntry {
        let api = ClassApi::new(class, DefinitionType::Class);
        SourceEntry {
            source: SourceId::from(src),
            stamp: Stamp::LastModified(1),
            analyzed_classes: vec![hashing::analyze(1, Some(api), None, false, None)],
            declared: vec![ClassName::from(class)],
            non_local_products: vec![NonLocalProduct {
                product: ProductId::from(format!("{class}.class")),
                binary_name: BinaryClassName::from(class),
                class_name: ClassName::from(class),
            }],
            product_stamps: vec![(ProductId::from(format!("{class}.class")), Stamp::LastModified(2))],
            ..SourceEntry::default()
        }
    }

    #[test]
    fn test_add_then_remove_is_identity() {
        let mut base = Analysis::empty();
        base.add_source(entry("A.flint", "p.A"));

        let mut grown = base.clone();
        let mut b = entry("B.flint", "p.B");
        b.internal_deps = vec![ClassDependency::new(
            "p.A",
            "p.B",
            DependencyContext::MemberRef,
        )];
        grown.add_source(b);

        let shrunk = grown.without_sources(&FxHashSet::from_iter([SourceId::from("B.flint")]));
        assert_eq!(shrunk, base);
    }

    #[test]
    fn test_merge_after_remove_restores_content() {
        let mut analysis = Analysis::empty();
        analysis.add_source(entry("A.flint", "p.A"));
        analysis.add_source(entry("B.flint", "p.B"));

        let removed_set = FxHashSet::from_iter([SourceId::from("B.flint")]);
        let pruned = analysis.without_sources(&removed_set);

        let mut fresh = Analysis::empty();
        fresh.add_source(entry("B.flint", "p.B"));

        assert_eq!(pruned.merged(&fresh), analysis);
    }

    #[test]
    fn test_merge_prefers_fresh_apis() {
        let mut old = Analysis::empty();
        old.add_source(entry("A.flint", "p.A"));

        let mut fresh = Analysis::empty();
        let changed_api = ClassApi::new("p.A", DefinitionType::Class).sealed();
        let mut e = entry("A.flint", "p.A");
        e.analyzed_classes = vec![hashing::analyze(2, Some(changed_api), None, false, None)];
        fresh.add_source(e);

        let merged = old.merged(&fresh);
        assert_eq!(
            merged.apis.internal[&ClassName::from("p.A")].compilation_timestamp,
            2
        );
    }

    #[test]
    fn test_internal_api_contract_violation_names_class() {
        let analysis = Analysis::empty();
        let err = analysis
            .internal_api(&ClassName::from("p.Missing"))
            .unwrap_err();
        assert!(err.to_string().contains("p.Missing"));
    }

    #[test]
    fn test_internal_api_normalizes_module_form() {
        let mut analysis = Analysis::empty();
        analysis.add_source(entry("A.flint", "p.A"));
        assert!(analysis.internal_api(&ClassName::from("p.A$")).is_ok());
    }
}
