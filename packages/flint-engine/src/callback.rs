//! The analysis callback
//!
//! The compiler reports facts here from any number of threads: class
//! dependencies, generated products, discovered APIs, used names,
//! library dependencies, diagnostics. The stores are concurrent maps of
//! sets and every insert is idempotent; there is no ordering guarantee
//! between concurrent inserts and no global lock.
//!
//! `get_once` freezes the stores into an immutable [`Analysis`]. It must
//! be called exactly once, by the driver, after the compile function has
//! returned; the driver being single-threaded gives the happens-before
//! between compiler completion and the snapshot.

use crate::config::IncOptions;
use crate::lookup::{language_of, ExternalLookup};
use dashmap::{DashMap, DashSet};
use flint_core::hashing;
use flint_core::{
    Analysis, AnalyzedClass, BinaryClassName, ClassApi, ClassDependency, ClassName, Compilation,
    CoreError, DefinitionType, DependencyContext, LibraryId, Name, NonLocalProduct, Position,
    Problem, ProductId, Severity, SourceEntry, SourceId, SourceInfo, StampReader, UseScopeSet,
    UsedName,
};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The class-like and module-like definitions reported for one name.
#[derive(Default)]
struct ApiPair {
    class_api: Option<ClassApi>,
    module_api: Option<ClassApi>,
}

pub struct AnalysisCallback<'a> {
    /// The pruned previous analysis, used to classify binary
    /// dependencies on classes compiled in earlier cycles.
    previous: &'a Analysis,
    stamper: &'a dyn StampReader,
    lookup: &'a dyn ExternalLookup,
    options: &'a IncOptions,
    start_time_ms: u64,
    output_jar: Option<Arc<str>>,

    started: DashSet<SourceId>,
    class_to_source: DashMap<ClassName, SourceId>,
    internal_deps: DashMap<ClassName, FxHashSet<(ClassName, DependencyContext)>>,
    external_deps: DashMap<ClassName, FxHashSet<(ClassName, DependencyContext)>>,
    binary_to_class: DashMap<BinaryClassName, ClassName>,
    non_local_products: DashMap<SourceId, FxHashSet<NonLocalProduct>>,
    local_products: DashMap<SourceId, FxHashSet<ProductId>>,
    apis: DashMap<ClassName, ApiPair>,
    declared: DashMap<SourceId, FxHashSet<ClassName>>,
    used_names: DashMap<ClassName, FxHashSet<UsedName>>,
    library_deps: DashMap<SourceId, FxHashSet<(LibraryId, BinaryClassName)>>,
    external_apis: DashMap<ClassName, AnalyzedClass>,
    main_classes: DashMap<SourceId, FxHashSet<ClassName>>,
    problems: Mutex<Vec<(Problem, bool)>>,
    dependency_phase_done_ms: AtomicU64,
    api_phase_done_ms: AtomicU64,
    finalized: AtomicBool,
}

impl<'a> AnalysisCallback<'a> {
    pub fn new(
        previous: &'a Analysis,
        stamper: &'a dyn StampReader,
        lookup: &'a dyn ExternalLookup,
        options: &'a IncOptions,
        start_time_ms: u64,
        output_jar: Option<Arc<str>>,
    ) -> Self {
        Self {
            previous,
            stamper,
            lookup,
            options,
            start_time_ms,
            output_jar,
            started: DashSet::new(),
            class_to_source: DashMap::new(),
            internal_deps: DashMap::new(),
            external_deps: DashMap::new(),
            binary_to_class: DashMap::new(),
            non_local_products: DashMap::new(),
            local_products: DashMap::new(),
            apis: DashMap::new(),
            declared: DashMap::new(),
            used_names: DashMap::new(),
            library_deps: DashMap::new(),
            external_apis: DashMap::new(),
            main_classes: DashMap::new(),
            problems: Mutex::new(Vec::new()),
            dependency_phase_done_ms: AtomicU64::new(0),
            api_phase_done_ms: AtomicU64::new(0),
            finalized: AtomicBool::new(false),
        }
    }

    /// Called once per compiled source, before any fact about it.
    pub fn start_source(&self, source: &SourceId) {
        self.started.insert(source.clone());
    }

    /// A source-level dependency between two classes of this compile.
    pub fn class_dependency(
        &self,
        on_class: &ClassName,
        from_class: &ClassName,
        context: DependencyContext,
    ) {
        if on_class.as_class() == from_class.as_class() {
            return;
        }
        self.internal_deps
            .entry(from_class.clone())
            .or_default()
            .insert((on_class.clone(), context));
    }

    /// A dependency on a class file. Classified as internal (same cycle
    /// or an earlier cycle of this project), external (another project's
    /// analysis knows it) or a plain library dependency.
    pub fn binary_dependency(
        &self,
        class_file_path: &str,
        on_binary: &BinaryClassName,
        from_class: &ClassName,
        from_source: &SourceId,
        context: DependencyContext,
    ) {
        // Generated by this very cycle.
        if let Some(class) = self.binary_to_class.get(on_binary) {
            self.class_dependency(&class.clone(), from_class, context);
            return;
        }

        // Compiled earlier by this project (possibly by the other
        // language's compiler).
        if let Some(class) = self
            .previous
            .relations
            .product_class_name
            .reverse(on_binary)
            .next()
        {
            self.class_dependency(&class.clone(), from_class, context);
            return;
        }

        // Another project on the build path.
        if let Some(analysis) = self.lookup.lookup_analysis(on_binary) {
            if let Some(class) = analysis
                .relations
                .product_class_name
                .reverse(on_binary)
                .next()
            {
                if let Some(api) = analysis.apis.internal.get(&class.as_class()) {
                    self.external_apis
                        .insert(api.name.clone(), api.clone());
                }
                self.add_external_dependency(class.clone(), from_class, context);
                return;
            }
        }

        // A class with a recorded external API.
        let source_name = ClassName::new(on_binary.as_str()).as_class();
        if let Some(api) = self.lookup.lookup_analyzed_class(&source_name) {
            let name = api.name.clone();
            self.external_apis.insert(name.clone(), api);
            self.add_external_dependency(name, from_class, context);
            return;
        }

        // Plain library dependency.
        let library = self
            .lookup
            .lookup_on_classpath(on_binary)
            .unwrap_or_else(|| LibraryId::from(class_file_path));
        self.library_deps
            .entry(from_source.clone())
            .or_default()
            .insert((library, on_binary.clone()));
    }

    fn add_external_dependency(
        &self,
        on_class: ClassName,
        from_class: &ClassName,
        context: DependencyContext,
    ) {
        self.external_deps
            .entry(from_class.clone())
            .or_default()
            .insert((on_class, context));
    }

    pub fn generated_non_local_class(
        &self,
        source: &SourceId,
        class_file_path: &str,
        binary_name: &BinaryClassName,
        src_name: &ClassName,
    ) {
        self.non_local_products
            .entry(source.clone())
            .or_default()
            .insert(NonLocalProduct {
                product: ProductId::from(class_file_path),
                binary_name: binary_name.clone(),
                class_name: src_name.clone(),
            });
        self.binary_to_class
            .insert(binary_name.clone(), src_name.clone());
        self.class_to_source.insert(src_name.clone(), source.clone());
        self.class_to_source
            .insert(src_name.as_class(), source.clone());
    }

    pub fn generated_local_class(&self, source: &SourceId, class_file_path: &str) {
        self.local_products
            .entry(source.clone())
            .or_default()
            .insert(ProductId::from(class_file_path));
    }

    /// Called once per top-level class or module definition.
    pub fn api(&self, source: &SourceId, class_like: ClassApi) {
        let reported = class_like.name.clone();
        let canonical = reported.as_class();

        self.class_to_source.insert(reported, source.clone());
        self.class_to_source.insert(canonical.clone(), source.clone());
        self.declared
            .entry(source.clone())
            .or_default()
            .insert(canonical.clone());

        let mut pair = self.apis.entry(canonical).or_default();
        match class_like.definition_type {
            DefinitionType::Module => pair.module_api = Some(class_like),
            _ => pair.class_api = Some(class_like),
        }
    }

    pub fn used_name(&self, class: &ClassName, name: impl Into<Name>, scopes: UseScopeSet) {
        self.used_names
            .entry(class.clone())
            .or_default()
            .insert(UsedName::new(name.into(), scopes));
    }

    pub fn main_class(&self, source: &SourceId, class: &ClassName) {
        self.main_classes
            .entry(source.clone())
            .or_default()
            .insert(class.clone());
    }

    pub fn problem(
        &self,
        category: &str,
        position: Position,
        message: &str,
        severity: Severity,
        reported: bool,
    ) {
        self.problems.lock().push((
            Problem {
                category: category.to_string(),
                position,
                message: message.to_string(),
                severity,
            },
            reported,
        ));
    }

    pub fn dependency_phase_completed(&self) {
        self.dependency_phase_done_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn api_phase_completed(&self) {
        self.api_phase_done_ms.store(now_ms(), Ordering::Relaxed);
    }

    /// Binary names generated into the output jar by this cycle.
    pub fn classes_in_output_jar(&self) -> FxHashSet<BinaryClassName> {
        self.binary_to_class
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn owner_of(&self, class: &ClassName) -> flint_core::Result<SourceId> {
        self.class_to_source
            .get(class)
            .or_else(|| self.class_to_source.get(&class.as_class()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::contract(format!("no source recorded for class {class}")))
    }

    /// Freeze the stores and materialize the analysis of this cycle.
    /// Must be called exactly once, after the compile function returned.
    pub fn get_once(&self) -> flint_core::Result<Analysis> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Err(CoreError::contract(
                "get_once called twice on one analysis callback",
            ));
        }

        let mut sources: FxHashSet<SourceId> =
            self.started.iter().map(|s| s.key().clone()).collect();
        sources.extend(self.declared.iter().map(|e| e.key().clone()));
        sources.extend(self.non_local_products.iter().map(|e| e.key().clone()));
        sources.extend(self.local_products.iter().map(|e| e.key().clone()));

        let mut entries: FxHashMap<SourceId, SourceEntry> = sources
            .iter()
            .map(|source| {
                let mut entry = SourceEntry {
                    source: source.clone(),
                    stamp: self.stamper.source(source),
                    info: SourceInfo::new(language_of(source)),
                    ..SourceEntry::default()
                };
                if let Some(declared) = self.declared.get(source) {
                    entry.declared = declared.iter().cloned().collect();
                }
                if let Some(products) = self.non_local_products.get(source) {
                    entry.non_local_products = products.iter().cloned().collect();
                }
                if let Some(products) = self.local_products.get(source) {
                    entry.local_products = products.iter().cloned().collect();
                }
                if let Some(libraries) = self.library_deps.get(source) {
                    entry.library_deps = libraries
                        .iter()
                        .map(|(lib, bin)| (lib.clone(), bin.clone(), self.stamper.library(lib)))
                        .collect();
                }
                if let Some(mains) = self.main_classes.get(source) {
                    entry.info.main_classes = mains.iter().cloned().collect();
                }
                for product in entry
                    .non_local_products
                    .iter()
                    .map(|p| p.product.clone())
                    .chain(entry.local_products.iter().cloned())
                {
                    let stamp = self.stamper.product(&product);
                    entry.product_stamps.push((product, stamp));
                }
                (source.clone(), entry)
            })
            .collect();

        // Analyzed APIs, companions merged per top-level name.
        for item in self.apis.iter() {
            let (name, pair) = (item.key(), item.value());
            let owner = self.owner_of(name)?;
            let analyzed = hashing::analyze(
                self.start_time_ms,
                pair.class_api.clone(),
                pair.module_api.clone(),
                self.options.api_debug,
                self.output_jar.clone(),
            );
            if let Some(entry) = entries.get_mut(&owner) {
                entry.analyzed_classes.push(analyzed);
            }
        }

        // Dependency edges, attributed to the source declaring `from`.
        for item in self.internal_deps.iter() {
            let (from, edges) = (item.key(), item.value());
            let owner = self.owner_of(from)?;
            if let Some(entry) = entries.get_mut(&owner) {
                for (on, context) in edges.iter() {
                    entry
                        .internal_deps
                        .push(ClassDependency::new(on.clone(), from.clone(), *context));
                }
            }
        }
        for item in self.external_deps.iter() {
            let (from, edges) = (item.key(), item.value());
            let owner = self.owner_of(from)?;
            if let Some(entry) = entries.get_mut(&owner) {
                for (on, context) in edges.iter() {
                    entry
                        .external_deps
                        .push(ClassDependency::new(on.clone(), from.clone(), *context));
                }
            }
        }

        for item in self.used_names.iter() {
            let (class, names) = (item.key(), item.value());
            let owner = self.owner_of(class)?;
            if let Some(entry) = entries.get_mut(&owner) {
                for used in names.iter() {
                    entry.used_names.push((class.clone(), used.clone()));
                }
            }
        }

        for (problem, reported) in self.problems.lock().drain(..) {
            let Some(path) = problem.position.source_path.as_deref() else {
                continue;
            };
            let source = SourceId::from(path);
            if let Some(entry) = entries.get_mut(&source) {
                if reported {
                    entry.info.reported_problems.push(problem);
                } else {
                    entry.info.unreported_problems.push(problem);
                }
            }
        }

        let mut analysis = Analysis::empty();
        for (_, entry) in entries {
            analysis.add_source(entry);
        }
        for item in self.external_apis.iter() {
            analysis.add_external_api(item.value().clone());
        }
        analysis.compilations.push(Compilation {
            start_time_ms: self.start_time_ms,
            output: self.output_jar.as_ref().map(|s| s.to_string()),
        });

        debug!(
            "callback finalized: {} sources, {} classes, {} external APIs",
            analysis.stamps.sources.len(),
            analysis.apis.internal.len(),
            analysis.apis.external.len()
        );

        Ok(analysis)
    }
}
