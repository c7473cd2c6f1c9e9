//! Persisted analysis format
//!
//! A bincode envelope: header (format version + name-hashing flag), then
//! exactly thirteen named relation slots in the legacy order, then the
//! extension block for the relations the legacy layout never carried,
//! then APIs, stamps, infos and the compilations log.
//!
//! The thirteen-slot block exists for older readers that walk relations
//! positionally; slots 3-6 persist as empty relations because this
//! engine tracks dependencies at class-name level only. Readers refuse
//! any file whose slot count differs from thirteen.

use crate::analysis::{Analysis, Apis};
use crate::api::UsedName;
use crate::error::{CoreError, Result};
use crate::ids::{BinaryClassName, ClassName, LibraryId, ProductId, SourceId};
use crate::info::{Compilation, SourceInfo};
use crate::relation::Relation;
use crate::relations::{ClassDependencies, Relations};
use crate::stamp::Stamps;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

pub const FORMAT_VERSION: u32 = 5;
pub const LEGACY_RELATION_COUNT: usize = 13;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    version: u32,
    /// Whether per-name hashing was in force when this analysis was
    /// written. This engine only produces and accepts name-hashed
    /// analyses.
    name_hashing: bool,
}

/// One positional slot of the legacy relation block.
#[derive(Debug, Serialize, Deserialize)]
enum RelationSlot {
    Products(Relation<SourceId, ProductId>),
    LibraryDeps(Relation<SourceId, LibraryId>),
    /// Source-level dependency tracking, retired. Always empty.
    Legacy(Relation<SourceId, SourceId>),
    ClassDeps(Relation<ClassName, ClassName>),
    ClassNames(Relation<SourceId, ClassName>),
    UsedNames(Relation<ClassName, UsedName>),
}

/// Relations the legacy block has no slot for.
#[derive(Debug, Serialize, Deserialize)]
struct Extensions {
    product_class_name: Relation<ClassName, BinaryClassName>,
    library_class_name: Relation<LibraryId, BinaryClassName>,
    local_inheritance_internal: Relation<ClassName, ClassName>,
    local_inheritance_external: Relation<ClassName, ClassName>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnalysisFile {
    header: Header,
    legacy_relations: Vec<RelationSlot>,
    extensions: Extensions,
    apis: Apis,
    stamps: Stamps,
    infos: FxHashMap<SourceId, SourceInfo>,
    compilations: Vec<Compilation>,
}

fn to_file(analysis: &Analysis) -> AnalysisFile {
    let r = &analysis.relations;
    let legacy_relations = vec![
        RelationSlot::Products(r.src_prod.clone()),
        RelationSlot::LibraryDeps(r.library_dep.clone()),
        RelationSlot::Legacy(Relation::new()),
        RelationSlot::Legacy(Relation::new()),
        RelationSlot::Legacy(Relation::new()),
        RelationSlot::Legacy(Relation::new()),
        RelationSlot::ClassDeps(r.member_ref.internal.clone()),
        RelationSlot::ClassDeps(r.member_ref.external.clone()),
        RelationSlot::ClassDeps(r.inheritance.internal.clone()),
        RelationSlot::ClassDeps(r.inheritance.external.clone()),
        RelationSlot::ClassNames(r.classes.clone()),
        RelationSlot::UsedNames(r.used_names.clone()),
        RelationSlot::ClassNames(r.declared_classes.clone()),
    ];

    AnalysisFile {
        header: Header {
            version: FORMAT_VERSION,
            name_hashing: true,
        },
        legacy_relations,
        extensions: Extensions {
            product_class_name: r.product_class_name.clone(),
            library_class_name: r.library_class_name.clone(),
            local_inheritance_internal: r.local_inheritance.internal.clone(),
            local_inheritance_external: r.local_inheritance.external.clone(),
        },
        apis: analysis.apis.clone(),
        stamps: analysis.stamps.clone(),
        infos: analysis.infos.clone(),
        compilations: analysis.compilations.clone(),
    }
}

fn from_file(file: AnalysisFile) -> Result<Analysis> {
    if file.header.version != FORMAT_VERSION {
        return Err(CoreError::format(format!(
            "unsupported analysis format version {} (expected {})",
            file.header.version, FORMAT_VERSION
        )));
    }
    if !file.header.name_hashing {
        return Err(CoreError::format(
            "analysis was written without name hashing".to_string(),
        ));
    }
    if file.legacy_relations.len() != LEGACY_RELATION_COUNT {
        return Err(CoreError::format(format!(
            "expected {} relations, found {}",
            LEGACY_RELATION_COUNT,
            file.legacy_relations.len()
        )));
    }

    fn slot_name(slot: &RelationSlot) -> &'static str {
        match slot {
            RelationSlot::Products(_) => "products",
            RelationSlot::LibraryDeps(_) => "library dependencies",
            RelationSlot::Legacy(_) => "legacy source dependencies",
            RelationSlot::ClassDeps(_) => "class dependencies",
            RelationSlot::ClassNames(_) => "class names",
            RelationSlot::UsedNames(_) => "used names",
        }
    }

    let mut slots = file.legacy_relations.into_iter();
    let mut next = move || slots.next().expect("slot count checked above");

    macro_rules! take {
        ($variant:ident, $what:expr) => {
            match next() {
                RelationSlot::$variant(r) => r,
                other => {
                    return Err(CoreError::format(format!(
                        "relation slot for {} holds {}",
                        $what,
                        slot_name(&other)
                    )))
                }
            }
        };
    }

    let src_prod = take!(Products, "products");
    let library_dep = take!(LibraryDeps, "library dependencies");
    for legacy in 0..4 {
        let slot = take!(Legacy, "legacy source dependencies");
        if !slot.is_empty() {
            return Err(CoreError::format(format!(
                "legacy relation slot {} is not empty",
                legacy + 3
            )));
        }
    }
    let member_ref_internal = take!(ClassDeps, "internal member references");
    let member_ref_external = take!(ClassDeps, "external member references");
    let inheritance_internal = take!(ClassDeps, "internal inheritance");
    let inheritance_external = take!(ClassDeps, "external inheritance");
    let classes = take!(ClassNames, "class names");
    let used_names = take!(UsedNames, "used names");
    let declared_classes = take!(ClassNames, "declared classes");

    let relations = Relations {
        src_prod,
        library_dep,
        library_class_name: file.extensions.library_class_name,
        classes,
        product_class_name: file.extensions.product_class_name,
        member_ref: ClassDependencies {
            internal: member_ref_internal,
            external: member_ref_external,
        },
        inheritance: ClassDependencies {
            internal: inheritance_internal,
            external: inheritance_external,
        },
        local_inheritance: ClassDependencies {
            internal: file.extensions.local_inheritance_internal,
            external: file.extensions.local_inheritance_external,
        },
        used_names,
        declared_classes,
    };

    Ok(Analysis {
        relations,
        apis: file.apis,
        stamps: file.stamps,
        infos: file.infos,
        compilations: file.compilations,
    })
}

/// Write an analysis to any sink.
pub fn write_analysis(analysis: &Analysis, writer: impl Write) -> Result<()> {
    bincode::serialize_into(writer, &to_file(analysis))
        .map_err(|e| CoreError::format(format!("failed to encode analysis: {e}")))
}

/// Read an analysis from any source. Any shape mismatch, including a
/// relation count other than thirteen, is a format error; callers treat
/// that as "no previous analysis".
pub fn read_analysis(reader: impl Read) -> Result<Analysis> {
    let file: AnalysisFile = bincode::deserialize_from(reader)
        .map_err(|e| CoreError::format(format!("failed to decode analysis: {e}")))?;
    from_file(file)
}

pub fn store(analysis: &Analysis, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_analysis(analysis, BufWriter::new(file))?;
    debug!(
        "stored analysis to {}: {} sources, {} classes",
        path.as_ref().display(),
        analysis.stamps.sources.len(),
        analysis.apis.internal.len()
    );
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<Analysis> {
    let file = File::open(path.as_ref())?;
    let analysis = read_analysis(BufReader::new(file))?;
    debug!(
        "loaded analysis from {}: {} sources",
        path.as_ref().display(),
        analysis.stamps.sources.len()
    );
    Ok(analysis)
}
