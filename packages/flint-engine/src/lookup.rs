//! External lookup hooks
//!
//! The build tool embedding the engine answers questions the engine
//! cannot: what else is on the classpath, which other projects' analyses
//! exist, and whether an incremental round is still worth running.

use flint_core::{Analysis, AnalyzedClass, BinaryClassName, ClassName, LibraryId, SourceId};
use crate::changes::SourceChanges;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Hook points supplied by the surrounding build tool. Every method has
/// a conservative default, so a bare embedding works out of the box.
///
/// Lookups are consulted from compiler threads during dependency
/// classification, hence the `Send + Sync` bound.
pub trait ExternalLookup: Send + Sync {
    /// Precomputed source-change partition, honored over stamp
    /// comparison when present (e.g. a watch service already knows).
    fn changed_sources(&self, previous: &Analysis) -> Option<SourceChanges> {
        let _ = previous;
        None
    }

    /// The analyzed API of an external class, when some other project's
    /// analysis has it.
    fn lookup_analyzed_class(&self, name: &ClassName) -> Option<AnalyzedClass> {
        let _ = name;
        None
    }

    /// Which classpath entry currently provides a binary class name.
    fn lookup_on_classpath(&self, binary: &BinaryClassName) -> Option<LibraryId> {
        let _ = binary;
        None
    }

    /// The analysis of the project providing a binary class name.
    fn lookup_analysis(&self, binary: &BinaryClassName) -> Option<Arc<Analysis>> {
        let _ = binary;
        None
    }

    /// Whether the overall classpath hash moved since the previous run.
    fn changed_classpath_hash(&self) -> bool {
        false
    }

    /// Veto hook: returning false stops incremental rounds (the caller
    /// typically falls back to a full build).
    fn should_do_incremental_compilation(
        &self,
        invalidated: &FxHashSet<ClassName>,
        analysis: &Analysis,
    ) -> bool {
        let _ = (invalidated, analysis);
        true
    }
}

/// The no-op lookup: nothing external, never vetoes.
#[derive(Debug, Default)]
pub struct DefaultExternalLookup;

impl ExternalLookup for DefaultExternalLookup {}

/// Guess the language family of a source from its file name. Sources
/// the Flint front end does not own are treated conservatively by the
/// invalidator.
pub fn language_of(source: &SourceId) -> flint_core::LanguageFamily {
    if source.as_str().ends_with(".java") {
        flint_core::LanguageFamily::Java
    } else {
        flint_core::LanguageFamily::Flint
    }
}
