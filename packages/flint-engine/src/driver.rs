//! The cycle driver
//!
//! Iterates invalidate → map to sources → prune → compile → merge →
//! detect API changes until a fixed point: no further invalidations, a
//! full recompile, or an external veto. The driver is single-threaded
//! and owns the analysis value; the callback it hands the compile
//! function is the only concurrent surface.

use crate::callback::AnalysisCallback;
use crate::changes::{diff_analyzed, ApiChange, InitialChanges};
use crate::classfiles::ClassFileManager;
use crate::config::IncOptions;
use crate::detect::ChangeDetector;
use crate::error::{CompileFailure, EngineError, Result};
use crate::invalidate::{InitialInvalidation, Invalidator};
use crate::lookup::ExternalLookup;
use flint_core::{Analysis, AnalyzedClass, ClassName, ProductId, SourceId, StampReader};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Outcome of one driver run.
#[derive(Debug)]
pub struct CompileResult {
    pub analysis: Analysis,
    /// False when nothing needed compiling, or on cancellation.
    pub compiled: bool,
    /// Number of compile cycles that ran.
    pub cycles: u32,
}

/// State of the invalidate-compile-merge loop.
enum CycleState {
    Running {
        invalidated_classes: FxHashSet<ClassName>,
        changed_sources: FxHashSet<SourceId>,
    },
    Done,
}

/// The compile function the embedding supplies: compile the given
/// sources, reporting every fact through the callback.
pub trait CompileFn {
    fn compile(
        &mut self,
        sources: &FxHashSet<SourceId>,
        callback: &AnalysisCallback<'_>,
    ) -> std::result::Result<(), CompileFailure>;
}

impl<F> CompileFn for F
where
    F: FnMut(&FxHashSet<SourceId>, &AnalysisCallback<'_>) -> std::result::Result<(), CompileFailure>,
{
    fn compile(
        &mut self,
        sources: &FxHashSet<SourceId>,
        callback: &AnalysisCallback<'_>,
    ) -> std::result::Result<(), CompileFailure> {
        self(sources, callback)
    }
}

pub struct CycleDriver<'a> {
    sources: &'a FxHashSet<SourceId>,
    stamper: &'a dyn StampReader,
    lookup: &'a dyn ExternalLookup,
    options: &'a IncOptions,
    output_jar: Option<Arc<str>>,
}

impl<'a> CycleDriver<'a> {
    pub fn new(
        sources: &'a FxHashSet<SourceId>,
        stamper: &'a dyn StampReader,
        lookup: &'a dyn ExternalLookup,
        options: &'a IncOptions,
    ) -> Self {
        Self {
            sources,
            stamper,
            lookup,
            options,
            output_jar: None,
        }
    }

    #[must_use]
    pub fn with_output_jar(mut self, output_jar: impl Into<Arc<str>>) -> Self {
        self.output_jar = Some(output_jar.into());
        self
    }

    /// Run the engine over the current inputs against the previous
    /// analysis.
    ///
    /// The class-file manager is scoped to this call: committed on
    /// normal termination, rolled back on cancellation or failure.
    /// Cancellation returns the previous analysis with `compiled =
    /// false`; any other compiler failure rolls back and propagates.
    pub fn apply(
        &self,
        previous: &Analysis,
        manager: &mut dyn ClassFileManager,
        compile_fn: &mut dyn CompileFn,
    ) -> Result<CompileResult> {
        let detector = ChangeDetector::new(self.stamper, self.lookup, self.options);
        let changes = detector.detect(self.sources, previous);

        let invalidator = Invalidator::new(self.options);
        let initial = invalidator.invalidate_initial(&changes, previous);

        if initial.is_empty() && changes.source_changes.removed.is_empty() {
            debug!("analysis is at a fixed point; nothing to compile");
            manager.complete(true);
            return Ok(CompileResult {
                analysis: previous.clone(),
                compiled: false,
                cycles: 0,
            });
        }

        match self.run_cycles(previous, &changes, initial, &invalidator, manager, compile_fn) {
            Ok((analysis, cycles)) => {
                manager.complete(true);
                Ok(CompileResult {
                    analysis,
                    compiled: cycles > 0,
                    cycles,
                })
            }
            Err(EngineError::Cancelled) => {
                warn!("compilation cancelled; rolling back to previous analysis");
                manager.complete(false);
                Ok(CompileResult {
                    analysis: previous.clone(),
                    compiled: false,
                    cycles: 0,
                })
            }
            Err(e) => {
                manager.complete(false);
                Err(e)
            }
        }
    }

    fn run_cycles(
        &self,
        previous: &Analysis,
        changes: &InitialChanges,
        initial: InitialInvalidation,
        invalidator: &Invalidator<'_>,
        manager: &mut dyn ClassFileManager,
        compile_fn: &mut dyn CompileFn,
    ) -> Result<(Analysis, u32)> {
        // Removed sources are pruned up front, their class files deleted.
        let removed = &changes.source_changes.removed;
        let mut current = if removed.is_empty() {
            previous.clone()
        } else {
            let products: Vec<ProductId> = removed
                .iter()
                .flat_map(|s| previous.relations.src_prod.forward(s).cloned())
                .collect();
            manager.delete(&products);
            previous.without_sources(removed)
        };
        if !changes.removed_products.is_empty() {
            let stale: Vec<ProductId> = changes.removed_products.iter().cloned().collect();
            manager.delete(&stale);
        }

        let mut state = CycleState::Running {
            invalidated_classes: initial.classes,
            changed_sources: initial.sources,
        };
        let mut cycle = 0u32;

        loop {
            let (invalidated_classes, changed_sources) =
                match std::mem::replace(&mut state, CycleState::Done) {
                    CycleState::Running {
                        invalidated_classes,
                        changed_sources,
                    } => (invalidated_classes, changed_sources),
                    CycleState::Done => break,
                };

            let mut classes_to_recompile = invalidated_classes.clone();
            classes_to_recompile
                .extend(invalidator.expand_package_objects(&current, &invalidated_classes));

            let mut invalidated_sources =
                invalidator.map_to_sources(&current, &classes_to_recompile);
            invalidated_sources.extend(changed_sources.iter().cloned());
            invalidated_sources.retain(|s| self.sources.contains(s));
            let invalidated_sources = invalidator.widen(invalidated_sources, self.sources);

            if invalidated_sources.is_empty() {
                break;
            }
            cycle += 1;
            info!(
                "cycle {}: recompiling {} of {} sources ({} invalidated classes)",
                cycle,
                invalidated_sources.len(),
                self.sources.len(),
                classes_to_recompile.len()
            );

            // Prune the sources being recompiled and drop their class
            // files before the compiler regenerates them.
            let pruned_products: Vec<ProductId> = invalidated_sources
                .iter()
                .flat_map(|s| current.relations.src_prod.forward(s).cloned())
                .collect();
            manager.delete(&pruned_products);
            let pruned = current.without_sources(&invalidated_sources);

            let callback = AnalysisCallback::new(
                &pruned,
                self.stamper,
                self.lookup,
                self.options,
                now_ms(),
                self.output_jar.clone(),
            );
            compile_fn
                .compile(&invalidated_sources, &callback)
                .map_err(EngineError::from)?;
            let fresh = callback.get_once()?;

            let generated: Vec<ProductId> = fresh
                .relations
                .src_prod
                .all()
                .map(|(_, product)| product.clone())
                .collect();
            manager.generated(&generated);

            let merged = pruned.merged(&fresh);
            if self.options.strict_mode {
                merged.relations.check_invariants()?;
            }
            if self.options.relations_debug {
                debug!(
                    "cycle {} relations: {} products, {} member refs, {} inheritance edges",
                    cycle,
                    merged.relations.src_prod.pair_count(),
                    merged.relations.member_ref.internal.pair_count(),
                    merged.relations.inheritance.internal.pair_count()
                );
            }

            if invalidated_sources == *self.sources {
                debug!("all sources recompiled; terminating");
                current = merged;
                break;
            }

            let recompiled_classes =
                recompiled_class_set(&classes_to_recompile, &invalidated_sources, &current, &merged);
            let api_changes = self.api_changes(&recompiled_classes, &current, &merged);

            let next = invalidator.invalidate_after(
                &api_changes,
                &merged,
                &recompiled_classes,
                &invalidated_sources,
                cycle,
            );

            if !next.is_empty()
                && !self.lookup.should_do_incremental_compilation(&next, &merged)
            {
                warn!("external lookup vetoed further incremental cycles");
                current = merged;
                break;
            }

            current = merged;
            if !next.is_empty() {
                state = CycleState::Running {
                    invalidated_classes: next,
                    changed_sources: FxHashSet::default(),
                };
            }
        }

        Ok((current, cycle))
    }

    /// Diff the APIs of the recompiled classes between the previous and
    /// the merged analysis.
    fn api_changes(
        &self,
        recompiled_classes: &FxHashSet<ClassName>,
        old: &Analysis,
        new: &Analysis,
    ) -> Vec<ApiChange> {
        let canonical: FxHashSet<ClassName> =
            recompiled_classes.iter().map(|c| c.as_class()).collect();

        let mut changes = Vec::new();
        for class in canonical {
            let before = old.apis.internal.get(&class);
            let after = new.apis.internal.get(&class);
            let change = match (before, after) {
                (None, None) => None,
                (Some(b), None) => {
                    diff_analyzed(b, &AnalyzedClass::empty(class.clone()), self.options)
                }
                (None, Some(a)) => {
                    diff_analyzed(&AnalyzedClass::empty(class.clone()), a, self.options)
                }
                (Some(b), Some(a)) => diff_analyzed(b, a, self.options),
            };
            if let Some(change) = change {
                debug!("API change detected: {:?}", change.class());
                changes.push(change);
            }
        }
        changes
    }
}

/// The classes whose APIs may have moved this cycle: the invalidation
/// targets plus every class the recompiled sources declared before or
/// declare now.
fn recompiled_class_set(
    classes_to_recompile: &FxHashSet<ClassName>,
    recompiled_sources: &FxHashSet<SourceId>,
    old: &Analysis,
    new: &Analysis,
) -> FxHashSet<ClassName> {
    let mut result = classes_to_recompile.clone();
    for source in recompiled_sources {
        for analysis in [old, new] {
            result.extend(analysis.relations.classes.forward(source).cloned());
            result.extend(analysis.relations.declared_classes.forward(source).cloned());
        }
    }
    result
}
