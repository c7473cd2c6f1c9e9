//! Two-phase invalidation
//!
//! Turns change descriptions into the set of classes that must be
//! recompiled. Member-reference dependencies break only at the immediate
//! user, so they propagate one step, filtered by per-name hashes;
//! inheritance changes propagate structurally, so they close
//! transitively. Macros, package modules, cross-language dependencies
//! and product collisions each get their own widening rule.

use crate::changes::{ApiChange, InitialChanges};
use crate::config::IncOptions;
use flint_core::{
    Analysis, ClassName, LanguageFamily, Name, Relation, SourceId, UseScope,
};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Transitive closure over the reverse direction of a class relation.
///
/// Cycle-safe BFS. Seeds are starting points, not results: a seed ends
/// up in the returned set only when some edge reaches back to it (i.e.
/// it sits on a dependency cycle with an invalidated node).
fn transitive_reverse(
    relation: &Relation<ClassName, ClassName>,
    seeds: &FxHashSet<ClassName>,
) -> FxHashSet<ClassName> {
    let mut visited = seeds.clone();
    let mut result = FxHashSet::default();
    let mut queue: VecDeque<ClassName> = seeds.iter().cloned().collect();

    while let Some(current) = queue.pop_front() {
        for dependent in relation.reverse(&current) {
            result.insert(dependent.clone());
            if visited.insert(dependent.clone()) {
                queue.push_back(dependent.clone());
            }
        }
    }

    result
}

/// What the first cycle starts from.
#[derive(Debug, Default)]
pub struct InitialInvalidation {
    pub classes: FxHashSet<ClassName>,
    pub sources: FxHashSet<SourceId>,
}

impl InitialInvalidation {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.sources.is_empty()
    }
}

pub struct Invalidator<'a> {
    options: &'a IncOptions,
}

impl<'a> Invalidator<'a> {
    pub fn new(options: &'a IncOptions) -> Self {
        Self { options }
    }

    /// Phase one: initial changes to invalidated classes and sources.
    pub fn invalidate_initial(
        &self,
        changes: &InitialChanges,
        previous: &Analysis,
    ) -> InitialInvalidation {
        let mut result = InitialInvalidation::default();

        result
            .sources
            .extend(changes.source_changes.to_recompile().cloned());

        // Whoever owned a removed product must regenerate it.
        for product in &changes.removed_products {
            result
                .sources
                .extend(previous.relations.src_prod.reverse(product).cloned());
        }

        // Sources depending on a changed library recompile wholesale.
        for library in &changes.library_deps {
            result
                .sources
                .extend(previous.relations.library_dep.reverse(library).cloned());
        }

        // Classes of removed sources vanish; their internal users break.
        for source in &changes.source_changes.removed {
            for class in previous.relations.declared_classes.forward(source) {
                result.classes.extend(
                    previous
                        .relations
                        .member_ref
                        .internal
                        .reverse(class)
                        .cloned(),
                );
            }
        }

        for change in &changes.external_api_changes {
            result
                .classes
                .extend(self.invalidate_class_externally(change, previous));
        }

        debug!(
            "initial invalidation: {} classes, {} sources",
            result.classes.len(),
            result.sources.len()
        );
        result
    }

    /// Phase two: API changes observed after a compile cycle to the next
    /// round of invalidated classes.
    ///
    /// Classes just recompiled were compiled against the new APIs
    /// already and are not re-invalidated, except through a product
    /// collision whose claimants have not all been recompiled together.
    pub fn invalidate_after(
        &self,
        api_changes: &[ApiChange],
        analysis: &Analysis,
        recompiled_classes: &FxHashSet<ClassName>,
        recompiled_sources: &FxHashSet<SourceId>,
        cycle: u32,
    ) -> FxHashSet<ClassName> {
        let mut invalidated = FxHashSet::default();

        if cycle > self.options.transitive_step {
            // Saturation safety net: brute-force member-reference
            // closure for whatever is still changing.
            info!(
                "cycle {} exceeded transitive step {}; saturating over member references",
                cycle, self.options.transitive_step
            );
            let seeds: FxHashSet<ClassName> = api_changes
                .iter()
                .map(|change| change.class().clone())
                .collect();
            invalidated.extend(transitive_reverse(
                &analysis.relations.member_ref.internal,
                &seeds,
            ));
        } else {
            for change in api_changes {
                invalidated.extend(self.invalidate_class_internally(change, analysis));
            }
        }

        invalidated.retain(|class| !recompiled_classes.contains(class));
        invalidated.extend(self.collision_classes(analysis, recompiled_sources));

        debug!(
            "cycle {}: {} classes invalidated by {} API changes",
            cycle,
            invalidated.len(),
            api_changes.len()
        );
        invalidated
    }

    /// Internal invalidation for one API change: transitive inheritance
    /// closure of the changed class, one-step local-inheritance users,
    /// and name-filtered member-reference users of every class in the
    /// closure.
    fn invalidate_class_internally(
        &self,
        change: &ApiChange,
        analysis: &Analysis,
    ) -> FxHashSet<ClassName> {
        let relations = &analysis.relations;
        let changed = change.class().clone();

        let seeds = FxHashSet::from_iter([changed.clone()]);
        let closure = transitive_reverse(&relations.inheritance.internal, &seeds);

        let mut base = closure.clone();
        base.insert(changed);

        let mut result = closure;
        for class in &base {
            result.extend(
                relations
                    .local_inheritance
                    .internal
                    .reverse(class)
                    .cloned(),
            );
        }
        result.extend(self.member_ref_users(change, &base, analysis));
        result
    }

    /// External invalidation: like the internal rule, but seeded with
    /// the internal classes that directly inherit the changed external
    /// class (those are invalid outright).
    fn invalidate_class_externally(
        &self,
        change: &ApiChange,
        analysis: &Analysis,
    ) -> FxHashSet<ClassName> {
        let relations = &analysis.relations;
        let changed = change.class();

        let direct_inheritors: FxHashSet<ClassName> = relations
            .inheritance
            .external
            .reverse(changed)
            .cloned()
            .collect();

        let mut result = direct_inheritors.clone();
        result.extend(transitive_reverse(
            &relations.inheritance.internal,
            &direct_inheritors,
        ));
        result.extend(
            relations
                .local_inheritance
                .external
                .reverse(changed)
                .cloned(),
        );
        for class in result.clone() {
            result.extend(
                relations
                    .local_inheritance
                    .internal
                    .reverse(&class)
                    .cloned(),
            );
        }

        // Member-reference users of the external name itself...
        let external_users: Vec<ClassName> = relations
            .member_ref
            .external
            .reverse(changed)
            .filter(|user| self.affected_by(change, user, analysis))
            .cloned()
            .collect();
        result.extend(external_users);

        // ...and of everything the inheritance closure dragged in.
        let base = result.clone();
        result.extend(self.member_ref_users(change, &base, analysis));
        result
    }

    /// Member-reference users of every class in `base`, filtered by the
    /// change kind.
    fn member_ref_users(
        &self,
        change: &ApiChange,
        base: &FxHashSet<ClassName>,
        analysis: &Analysis,
    ) -> FxHashSet<ClassName> {
        if let ApiChange::MacroDefinition(_) = change {
            return self.macro_users(base, analysis);
        }

        let mut users = FxHashSet::default();
        for class in base {
            users.extend(
                analysis
                    .relations
                    .member_ref
                    .internal
                    .reverse(class)
                    .filter(|user| self.affected_by(change, user, analysis))
                    .cloned(),
            );
        }
        users
    }

    /// Macro invalidation: every member-reference user, expanding
    /// transitively through users that themselves define macros (their
    /// expansions can embed the changed definition).
    fn macro_users(
        &self,
        seeds: &FxHashSet<ClassName>,
        analysis: &Analysis,
    ) -> FxHashSet<ClassName> {
        let mut result = FxHashSet::default();
        let mut visited = seeds.clone();
        let mut queue: VecDeque<ClassName> = seeds.iter().cloned().collect();

        while let Some(current) = queue.pop_front() {
            for user in analysis.relations.member_ref.internal.reverse(&current) {
                result.insert(user.clone());
                if !visited.insert(user.clone()) {
                    continue;
                }
                let defines_macro = analysis
                    .apis
                    .internal
                    .get(&user.as_class())
                    .is_some_and(|api| api.has_macro);
                if defines_macro {
                    queue.push_back(user.clone());
                }
            }
        }

        result
    }

    /// Whether a dependent class is affected by the change, under the
    /// per-name hash filter.
    fn affected_by(&self, change: &ApiChange, dependent: &ClassName, analysis: &Analysis) -> bool {
        // A dependency from outside the Flint family cannot be filtered
        // by name hashes; treat it as affected.
        if !self.is_flint_class(dependent, analysis) {
            return true;
        }

        let modified_names = match change {
            ApiChange::MacroDefinition(_) => return true,
            ApiChange::TraitPrivateMembersModified(_) => return true,
            ApiChange::NamesChange { modified_names, .. } => modified_names,
        };

        self.uses_modified_name(dependent, modified_names, analysis)
    }

    fn uses_modified_name(
        &self,
        dependent: &ClassName,
        modified_names: &FxHashSet<(Name, UseScope)>,
        analysis: &Analysis,
    ) -> bool {
        for used in analysis.relations.used_names.forward(dependent) {
            for (name, scope) in modified_names {
                if used.name != *name {
                    continue;
                }
                match scope {
                    // Sealed-hierarchy changes surface as PatternTarget
                    // entries; only the optimization narrows them to
                    // pattern-match users.
                    UseScope::PatternTarget if !self.options.use_optimized_sealed => return true,
                    scope if used.scopes.contains(*scope) => return true,
                    _ => {}
                }
            }
        }
        false
    }

    fn is_flint_class(&self, class: &ClassName, analysis: &Analysis) -> bool {
        let source = analysis
            .relations
            .declared_classes
            .reverse(class)
            .next()
            .or_else(|| analysis.relations.classes.reverse(class).next());
        match source {
            Some(source) => analysis
                .infos
                .get(source)
                .map(|info| info.language == LanguageFamily::Flint)
                // No recorded info: no grounds for filtering.
                .unwrap_or(false),
            None => false,
        }
    }

    /// Second-order invalidation: classes of every source claiming a
    /// contested product. Skipped for collisions whose claimants were
    /// all recompiled together this cycle: recompiling them again
    /// cannot change the outcome (the compiler has reported the
    /// duplicate).
    fn collision_classes(
        &self,
        analysis: &Analysis,
        recompiled_sources: &FxHashSet<SourceId>,
    ) -> FxHashSet<ClassName> {
        let relations = &analysis.relations;
        let mut result = FxHashSet::default();

        for product in relations.contested_products() {
            let claimants: Vec<&SourceId> = relations.src_prod.reverse(product).collect();
            if claimants
                .iter()
                .all(|source| recompiled_sources.contains(*source))
            {
                continue;
            }
            info!(
                "product {product} claimed by {} sources; invalidating all claimants",
                claimants.len()
            );
            for source in claimants {
                result.extend(relations.classes.forward(source).cloned());
                result.extend(relations.declared_classes.forward(source).cloned());
            }
        }

        result
    }

    /// Package-module expansion: every package module that inherits,
    /// directly or transitively, from an invalidated class must
    /// recompile with it, or downstream packages lose members.
    pub fn expand_package_objects(
        &self,
        analysis: &Analysis,
        invalidated: &FxHashSet<ClassName>,
    ) -> FxHashSet<ClassName> {
        if invalidated.is_empty() {
            return FxHashSet::default();
        }
        let inheritors = transitive_reverse(&analysis.relations.inheritance.internal, invalidated);

        analysis
            .apis
            .internal
            .values()
            .filter(|api| api.is_package_module())
            .filter(|api| inheritors.contains(&api.name) || invalidated.contains(&api.name))
            .map(|api| api.name.clone())
            .collect()
    }

    /// Map invalidated classes to the sources defining them.
    pub fn map_to_sources(
        &self,
        analysis: &Analysis,
        classes: &FxHashSet<ClassName>,
    ) -> FxHashSet<SourceId> {
        let mut sources = FxHashSet::default();
        for class in classes {
            sources.extend(analysis.relations.defines_class(class).cloned());
            sources.extend(analysis.relations.declared_classes.reverse(class).cloned());
        }
        sources
    }

    /// The all-sources fraction: when the invalidated sources exceed
    /// `recompile_all_fraction` of all sources, recompile everything.
    pub fn widen(
        &self,
        sources: FxHashSet<SourceId>,
        all_sources: &FxHashSet<SourceId>,
    ) -> FxHashSet<SourceId> {
        let threshold = self.options.recompile_all_fraction * all_sources.len() as f64;
        if !sources.is_empty() && sources.len() as f64 > threshold {
            info!(
                "{} invalidated sources exceed {:.0}% of {}; recompiling all",
                sources.len(),
                self.options.recompile_all_fraction * 100.0,
                all_sources.len()
            );
            all_sources.clone()
        } else {
            sources
        }
    }
}
