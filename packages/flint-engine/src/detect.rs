//! Change detection
//!
//! Compares the previous analysis against the current world (source
//! stamps, product stamps, the classpath, external APIs) and produces
//! the [`InitialChanges`] the first invalidation round works from.

use crate::changes::{diff_analyzed, ApiChange, InitialChanges, SourceChanges};
use crate::config::IncOptions;
use crate::lookup::ExternalLookup;
use flint_core::{Analysis, AnalyzedClass, ClassName, LibraryId, SourceId, StampReader};
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

pub struct ChangeDetector<'a> {
    stamper: &'a dyn StampReader,
    lookup: &'a dyn ExternalLookup,
    options: &'a IncOptions,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(
        stamper: &'a dyn StampReader,
        lookup: &'a dyn ExternalLookup,
        options: &'a IncOptions,
    ) -> Self {
        Self {
            stamper,
            lookup,
            options,
        }
    }

    pub fn detect(&self, sources: &FxHashSet<SourceId>, previous: &Analysis) -> InitialChanges {
        let source_changes = self
            .lookup
            .changed_sources(previous)
            .unwrap_or_else(|| self.source_changes(sources, previous));

        let changes = InitialChanges {
            source_changes,
            removed_products: self.removed_products(previous),
            library_deps: self.changed_libraries(previous),
            external_api_changes: self.external_api_changes(previous),
        };

        debug!(
            "initial changes: +{} -{} ~{} sources, {} removed products, {} libraries, {} external APIs",
            changes.source_changes.added.len(),
            changes.source_changes.removed.len(),
            changes.source_changes.changed.len(),
            changes.removed_products.len(),
            changes.library_deps.len(),
            changes.external_api_changes.len()
        );
        changes
    }

    fn source_changes(
        &self,
        sources: &FxHashSet<SourceId>,
        previous: &Analysis,
    ) -> SourceChanges {
        let previous_sources = previous.source_set();
        let mut changes = SourceChanges::default();

        for source in sources {
            match previous.stamps.sources.get(source) {
                None => {
                    changes.added.insert(source.clone());
                }
                Some(recorded) => {
                    if self.stamper.source(source).equivalent(recorded) {
                        changes.unmodified.insert(source.clone());
                    } else {
                        changes.changed.insert(source.clone());
                    }
                }
            }
        }
        for source in previous_sources.difference(sources) {
            changes.removed.insert(source.clone());
        }

        changes
    }

    fn removed_products(&self, previous: &Analysis) -> FxHashSet<flint_core::ProductId> {
        previous
            .stamps
            .products
            .iter()
            .filter(|(product, recorded)| !self.stamper.product(product).equivalent(recorded))
            .map(|(product, _)| product.clone())
            .collect()
    }

    /// The three-clause library rule: a previously recorded library is
    /// changed iff (i) the classpath hash moved and a name it supplied
    /// is gone or supplied by a different entry, (ii) its own stamp
    /// differs, or (iii) a name it supplied is now produced by an
    /// in-project source (shadowing). `skip_classpath_lookup` reduces
    /// this to (ii).
    fn changed_libraries(&self, previous: &Analysis) -> FxHashSet<LibraryId> {
        let mut changed = FxHashSet::default();

        for (library, recorded) in &previous.stamps.libraries {
            if !self.stamper.library(library).equivalent(recorded) {
                changed.insert(library.clone());
                continue;
            }
            if self.options.skip_classpath_lookup {
                continue;
            }

            let supplied: Vec<_> = previous
                .relations
                .library_class_name
                .forward(library)
                .collect();

            if self.lookup.changed_classpath_hash() {
                let moved = supplied.iter().any(|binary| {
                    match self.lookup.lookup_on_classpath(binary) {
                        None => true,
                        Some(entry) => entry != *library,
                    }
                });
                if moved {
                    changed.insert(library.clone());
                    continue;
                }
            }

            let shadowed = supplied
                .iter()
                .any(|binary| previous.relations.product_class_name.has_value(binary));
            if shadowed {
                changed.insert(library.clone());
            }
        }

        changed
    }

    /// Diff every previously recorded external API against what the
    /// lookup answers now (an empty API when it answers nothing).
    fn external_api_changes(&self, previous: &Analysis) -> Vec<ApiChange> {
        let mut changes = Vec::new();
        for (name, old) in &previous.apis.external {
            let current = self
                .lookup
                .lookup_analyzed_class(name)
                .unwrap_or_else(|| AnalyzedClass::empty(name.clone()));
            if old.api_hash != current.api_hash || old.extra_hash != current.extra_hash {
                if let Some(change) = diff_analyzed(old, &current, self.options) {
                    changes.push(change);
                }
            }
        }

        if !changes.is_empty() {
            let names: FxHashSet<ClassName> =
                changes.iter().map(|c| c.class().clone()).collect();
            if !self
                .lookup
                .should_do_incremental_compilation(&names, previous)
            {
                warn!(
                    "external lookup vetoed incremental handling of {} changed external APIs",
                    changes.len()
                );
                changes.clear();
            }
        }

        changes
    }
}
