/*
 * Flint Core - Analysis Store for Incremental Compilation
 *
 * The data layer of the Flint incremental compiler:
 * - Binary relations with forward/reverse indices
 * - Immutable analysis snapshots (relations + APIs + stamps + metadata)
 * - Deterministic API hashing (whole-API, extra, per-name)
 * - Change-detection stamps
 * - Persisted analysis format
 */

pub mod analysis;
pub mod api;
pub mod error;
pub mod fingerprint;
pub mod hashing;
pub mod ids;
pub mod info;
pub mod persist;
pub mod relation;
pub mod relations;
pub mod stamp;

pub use analysis::{Analysis, Apis, SourceEntry};
pub use api::{
    AnalyzedClass, ClassApi, Companions, DefinitionType, MemberDef, MemberKind, NameHash,
    UseScope, UseScopeSet, UsedName, Visibility,
};
pub use error::{CoreError, Result};
pub use fingerprint::{CanonicalHasher, Fingerprint};
pub use ids::{BinaryClassName, ClassName, LibraryId, Name, ProductId, SourceId, MODULE_SUFFIX};
pub use info::{Compilation, LanguageFamily, Position, Problem, Severity, SourceInfo};
pub use relation::Relation;
pub use relations::{
    ClassDependencies, ClassDependency, DependencyContext, NonLocalProduct, RemovedFacts,
    Relations,
};
pub use stamp::{HashStamper, Stamp, StampReader, Stamps, TimestampStamper};
