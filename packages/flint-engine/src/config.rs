//! Engine configuration

use serde::{Deserialize, Serialize};

/// The recognized incremental-compilation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncOptions {
    /// When the invalidated sources exceed this fraction of all sources,
    /// widen to a full recompile.
    pub recompile_all_fraction: f64,

    /// After this many cycles, fall back to brute-force transitive
    /// member-reference closure. Termination safety net.
    pub transitive_step: u32,

    /// Treat any API change of a macro-defining class as a macro
    /// definition change (conservative invalidation of all users).
    pub recompile_on_macro_def: bool,

    /// Restrict sealed-hierarchy changes to pattern-match users instead
    /// of every user of the name.
    pub use_optimized_sealed: bool,

    /// Dump relations after every merge.
    pub relations_debug: bool,

    /// Store full (non-minimized) APIs for diff diagnostics.
    pub api_debug: bool,

    /// Verify cross-relation invariants after every merge.
    pub strict_mode: bool,

    /// Context lines in API diff diagnostics. Diagnostic only.
    pub api_diff_context_size: u32,

    /// Reduce library change detection to stamp comparison only.
    pub skip_classpath_lookup: bool,
}

impl Default for IncOptions {
    fn default() -> Self {
        Self {
            recompile_all_fraction: 0.5,
            transitive_step: 3,
            recompile_on_macro_def: true,
            use_optimized_sealed: false,
            relations_debug: false,
            api_debug: false,
            strict_mode: false,
            api_diff_context_size: 5,
            skip_classpath_lookup: false,
        }
    }
}
