//! Per-source compilation metadata

use crate::ids::ClassName;
use serde::{Deserialize, Serialize};

/// Which compiler front end owns a source. Drives the conservative
/// cross-language invalidation rule: name-hash filtering only applies
/// between sources of the [`LanguageFamily::Flint`] family.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LanguageFamily {
    Flint,
    Java,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Position of a reported problem within its source.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Path of the source the problem was reported against, when known.
    pub source_path: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// One diagnostic reported by the compiler. The engine only records
/// these; rendering them to the user is the caller's business.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub category: String,
    pub position: Position,
    pub message: String,
    pub severity: Severity,
}

/// What one source contributed beyond relations: diagnostics, discovered
/// entry points, and its language family.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Problems shown to the user during the compile.
    pub reported_problems: Vec<Problem>,
    /// Problems recorded but suppressed (e.g. from earlier cycles).
    pub unreported_problems: Vec<Problem>,
    pub main_classes: Vec<ClassName>,
    pub language: LanguageFamily,
}

impl SourceInfo {
    pub fn new(language: LanguageFamily) -> Self {
        Self {
            reported_problems: Vec::new(),
            unreported_problems: Vec::new(),
            main_classes: Vec::new(),
            language,
        }
    }
}

impl Default for SourceInfo {
    fn default() -> Self {
        Self::new(LanguageFamily::Flint)
    }
}

/// One entry of the compilations log: a cycle that ran to completion.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Compilation {
    /// Start of the compile, epoch milliseconds.
    pub start_time_ms: u64,
    /// Output directory or jar, when the driver knows it.
    pub output: Option<String>,
}

impl Compilation {
    pub fn new(start_time_ms: u64) -> Self {
        Self {
            start_time_ms,
            output: None,
        }
    }
}
