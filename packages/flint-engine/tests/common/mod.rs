#![allow(dead_code)]
//! In-memory model compiler for driving the engine end to end
//!
//! A `Project` maps sources to class definitions; its compile function
//! replays those definitions into the analysis callback the way a real
//! compiler would: APIs, generated class files, dependency edges and
//! used names. Stamps are version counters bumped on every `set`.

use flint_core::{
    BinaryClassName, ClassApi, ClassName, DependencyContext, LibraryId, ProductId, SourceId,
    Stamp, StampReader, UseScopeSet,
};
use flint_engine::{AnalysisCallback, ClassFileManager, CompileFailure};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;

/// One class-like definition of the model project.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub api: ClassApi,
    pub module: Option<ClassApi>,
    /// (on, context) edges this class declares.
    pub deps: Vec<(ClassName, DependencyContext)>,
    /// (binary name, context) class-file dependencies; classified by
    /// the callback against the external lookup.
    pub binary_deps: Vec<(BinaryClassName, DependencyContext)>,
    /// Extra unqualified names this class references.
    pub used: Vec<(String, UseScopeSet)>,
    /// Overrides the derived class-file path (for collision scenarios).
    pub product_path: Option<String>,
}

impl ClassDef {
    pub fn new(api: ClassApi) -> Self {
        Self {
            api,
            module: None,
            deps: Vec::new(),
            binary_deps: Vec::new(),
            used: Vec::new(),
            product_path: None,
        }
    }

    pub fn with_module(mut self, module: ClassApi) -> Self {
        self.module = Some(module);
        self
    }

    pub fn depends_on(mut self, on: &str, context: DependencyContext) -> Self {
        self.deps.push((ClassName::from(on), context));
        self
    }

    pub fn depends_on_binary(mut self, binary: &str, context: DependencyContext) -> Self {
        self.binary_deps.push((BinaryClassName::from(binary), context));
        self
    }

    pub fn uses(mut self, name: &str, scopes: UseScopeSet) -> Self {
        self.used.push((name.to_string(), scopes));
        self
    }

    pub fn with_product_path(mut self, path: &str) -> Self {
        self.product_path = Some(path.to_string());
        self
    }

    fn name(&self) -> &ClassName {
        &self.api.name
    }

    fn product(&self) -> ProductId {
        match &self.product_path {
            Some(path) => ProductId::from(path.as_str()),
            None => ProductId::from(format!("out/{}.class", self.name())),
        }
    }
}

/// The model project: sources, their definitions, and version stamps.
#[derive(Debug, Default)]
pub struct Project {
    pub defs: FxHashMap<SourceId, Vec<ClassDef>>,
    pub versions: FxHashMap<SourceId, u64>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: &str, defs: Vec<ClassDef>) {
        let source = SourceId::from(path);
        let version = self.versions.get(&source).copied().unwrap_or(0);
        self.versions.insert(source.clone(), version + 1);
        self.defs.insert(source, defs);
    }

    pub fn remove(&mut self, path: &str) {
        let source = SourceId::from(path);
        self.defs.remove(&source);
        self.versions.remove(&source);
    }

    pub fn source_set(&self) -> FxHashSet<SourceId> {
        self.defs.keys().cloned().collect()
    }

    pub fn stamper(&self) -> ProjectStamper<'_> {
        ProjectStamper { project: self }
    }

    /// Replay one source's definitions into the callback.
    fn report(&self, source: &SourceId, callback: &AnalysisCallback<'_>) {
        callback.start_source(source);
        let Some(defs) = self.defs.get(source) else {
            return;
        };
        for def in defs {
            callback.api(source, def.api.clone());
            if let Some(module) = &def.module {
                callback.api(source, module.clone());
            }
            callback.generated_non_local_class(
                source,
                def.product().as_str(),
                &BinaryClassName::from(def.name().as_str()),
                def.name(),
            );
            for (on, context) in &def.deps {
                callback.class_dependency(on, def.name(), *context);
                // Referencing a class uses its name.
                callback.used_name(
                    def.name(),
                    on.simple_name(),
                    UseScopeSet::DEFAULT,
                );
            }
            for (binary, context) in &def.binary_deps {
                callback.binary_dependency(
                    &format!("lib/{binary}.class"),
                    binary,
                    def.name(),
                    source,
                    *context,
                );
                callback.used_name(
                    def.name(),
                    ClassName::from(binary.as_str()).simple_name(),
                    UseScopeSet::DEFAULT,
                );
            }
            for (name, scopes) in &def.used {
                callback.used_name(def.name(), name.as_str(), *scopes);
            }
        }
    }
}

pub struct ProjectStamper<'a> {
    project: &'a Project,
}

impl StampReader for ProjectStamper<'_> {
    fn source(&self, source: &SourceId) -> Stamp {
        match self.project.versions.get(source) {
            Some(version) => Stamp::LastModified(*version),
            None => Stamp::Missing,
        }
    }

    fn product(&self, _product: &ProductId) -> Stamp {
        Stamp::LastModified(1)
    }

    fn library(&self, _library: &LibraryId) -> Stamp {
        Stamp::LastModified(1)
    }
}

/// Compile function over a project, logging which sources each cycle
/// compiled; can be armed to cancel or fail on a given cycle.
pub struct ModelCompiler<'a> {
    pub project: &'a Project,
    pub compiled: RefCell<Vec<FxHashSet<SourceId>>>,
    pub cancel_on_cycle: Option<usize>,
}

impl<'a> ModelCompiler<'a> {
    pub fn new(project: &'a Project) -> Self {
        Self {
            project,
            compiled: RefCell::new(Vec::new()),
            cancel_on_cycle: None,
        }
    }

    pub fn cancelling_on(project: &'a Project, cycle: usize) -> Self {
        Self {
            cancel_on_cycle: Some(cycle),
            ..Self::new(project)
        }
    }

    pub fn cycles_run(&self) -> usize {
        self.compiled.borrow().len()
    }

    pub fn compiled_in_cycle(&self, cycle: usize) -> FxHashSet<SourceId> {
        self.compiled.borrow()[cycle - 1].clone()
    }

    pub fn compile_fn(
        &self,
    ) -> impl FnMut(
        &FxHashSet<SourceId>,
        &AnalysisCallback<'_>,
    ) -> Result<(), CompileFailure>
           + '_ {
        move |sources, callback| {
            self.compiled.borrow_mut().push(sources.clone());
            if self.cancel_on_cycle == Some(self.compiled.borrow().len()) {
                return Err(CompileFailure::Cancelled);
            }
            for source in sources {
                self.project.report(source, callback);
            }
            Ok(())
        }
    }
}

/// Class-file manager recording every call, for asserting the
/// commit/rollback protocol.
#[derive(Debug, Default)]
pub struct RecordingManager {
    pub deleted: Vec<ProductId>,
    pub generated: Vec<ProductId>,
    pub completions: Vec<bool>,
}

impl ClassFileManager for RecordingManager {
    fn delete(&mut self, products: &[ProductId]) {
        self.deleted.extend(products.iter().cloned());
    }

    fn generated(&mut self, products: &[ProductId]) {
        self.generated.extend(products.iter().cloned());
    }

    fn complete(&mut self, success: bool) {
        self.completions.push(success);
    }
}
