//! Invalidation semantics: trait privates, macros, sealed hierarchies,
//! package modules, cross-language dependencies, external APIs,
//! saturation.

mod common;

use common::{ClassDef, ModelCompiler, Project, RecordingManager};
use flint_core::{
    hashing, Analysis, AnalyzedClass, ClassApi, ClassName, DefinitionType, DependencyContext,
    MemberDef, MemberKind, Name, SourceId, UseScope, UseScopeSet, Visibility,
};
use flint_engine::{
    ApiChange, CycleDriver, DefaultExternalLookup, ExternalLookup, IncOptions, Invalidator,
};
use rustc_hash::FxHashSet;

fn member(name: &str, sig: &str) -> MemberDef {
    MemberDef::new(name, MemberKind::Def, Visibility::Public, sig)
}

fn private(name: &str, sig: &str) -> MemberDef {
    MemberDef::new(name, MemberKind::Def, Visibility::Private, sig)
}

fn build(project: &Project, options: &IncOptions) -> Analysis {
    let sources = project.source_set();
    let stamper = project.stamper();
    let lookup = DefaultExternalLookup;
    let driver = CycleDriver::new(&sources, &stamper, &lookup, options);

    let compiler = ModelCompiler::new(project);
    let mut compile = compiler.compile_fn();
    let mut manager = RecordingManager::default();
    driver
        .apply(&Analysis::empty(), &mut manager, &mut compile)
        .expect("full build")
        .analysis
}

fn run_incremental(
    project: &Project,
    previous: &Analysis,
    options: &IncOptions,
) -> (flint_engine::CompileResult, Vec<FxHashSet<SourceId>>) {
    let sources = project.source_set();
    let stamper = project.stamper();
    let lookup = DefaultExternalLookup;
    let driver = CycleDriver::new(&sources, &stamper, &lookup, options);

    let compiler = ModelCompiler::new(project);
    let mut manager = RecordingManager::default();
    let result = {
        let mut compile = compiler.compile_fn();
        driver
            .apply(previous, &mut manager, &mut compile)
            .expect("incremental build")
    };
    let log = compiler.compiled.borrow().clone();
    (result, log)
}

fn names(set: &FxHashSet<ClassName>) -> FxHashSet<String> {
    set.iter().map(|c| c.to_string()).collect()
}

// ---------------------------------------------------------------------
// Trait private members
// ---------------------------------------------------------------------

fn trait_project(helper_name: &str) -> Vec<ClassDef> {
    vec![ClassDef::new(
        ClassApi::new("p.T", DefinitionType::Trait)
            .with_members([member("draw", "(): Unit"), private(helper_name, "(): Int")]),
    )]
}

#[test]
fn test_trait_private_rename_invalidates_member_ref_users_only() {
    let mut project = Project::new();
    project.set("T.flint", trait_project("helper"));
    project.set(
        "U.flint",
        vec![ClassDef::new(
            ClassApi::new("p.U", DefinitionType::Class).with_members([member("go", "(): Unit")]),
        )
        .depends_on("p.T", DependencyContext::MemberRef)],
    );
    // Z inherits U but never touches T.
    project.set(
        "Z.flint",
        vec![ClassDef::new(
            ClassApi::new("p.Z", DefinitionType::Class)
                .with_parents([ClassName::from("p.U")]),
        )
        .depends_on("p.U", DependencyContext::Inheritance)],
    );

    let options = IncOptions {
        recompile_all_fraction: 1.0,
        ..IncOptions::default()
    };
    let analysis = build(&project, &options);

    project.set("T.flint", trait_project("helperRenamed"));
    let (result, log) = run_incremental(&project, &analysis, &options);

    assert_eq!(result.cycles, 2);
    assert_eq!(log[0], FxHashSet::from_iter([SourceId::from("T.flint")]));
    // U refers to T; Z does not, and the inheritance pass must not
    // reach past T's direct users.
    assert_eq!(log[1], FxHashSet::from_iter([SourceId::from("U.flint")]));
}

// ---------------------------------------------------------------------
// Macro definitions
// ---------------------------------------------------------------------

#[test]
fn test_macro_change_propagates_through_macro_defining_users() {
    let mut project = Project::new();
    let macro_member =
        |name: &str, sig: &str| MemberDef::new(name, MemberKind::MacroDef, Visibility::Public, sig);

    project.set(
        "M.flint",
        vec![ClassDef::new(
            ClassApi::new("p.M", DefinitionType::Module)
                .with_members([macro_member("expand", "(): Tree")]),
        )],
    );
    // A uses M directly, defines no macro.
    project.set(
        "A.flint",
        vec![ClassDef::new(
            ClassApi::new("p.A", DefinitionType::Class).with_members([member("go", "(): Unit")]),
        )
        .depends_on("p.M", DependencyContext::MemberRef)],
    );
    // P uses M and defines a macro of its own; Q uses P.
    project.set(
        "P.flint",
        vec![ClassDef::new(
            ClassApi::new("p.P", DefinitionType::Module)
                .with_members([macro_member("derive", "(): Tree")]),
        )
        .depends_on("p.M", DependencyContext::MemberRef)],
    );
    project.set(
        "Q.flint",
        vec![ClassDef::new(
            ClassApi::new("p.Q", DefinitionType::Class).with_members([member("use", "(): Unit")]),
        )
        .depends_on("p.P", DependencyContext::MemberRef)],
    );
    // R uses A (a plain class): must not be dragged in.
    project.set(
        "R.flint",
        vec![ClassDef::new(
            ClassApi::new("p.R", DefinitionType::Class).with_members([member("r", "(): Unit")]),
        )
        .depends_on("p.A", DependencyContext::MemberRef)],
    );

    let options = IncOptions::default();
    let analysis = build(&project, &options);

    let invalidator = Invalidator::new(&options);
    let invalidated = invalidator.invalidate_after(
        &[ApiChange::MacroDefinition(ClassName::from("p.M"))],
        &analysis,
        &FxHashSet::from_iter([ClassName::from("p.M")]),
        &FxHashSet::from_iter([SourceId::from("M.flint")]),
        1,
    );

    assert_eq!(
        names(&invalidated),
        FxHashSet::from_iter(["p.A".to_string(), "p.P".to_string(), "p.Q".to_string()])
    );
}

// ---------------------------------------------------------------------
// Sealed hierarchies
// ---------------------------------------------------------------------

#[test]
fn test_optimized_sealed_restricts_to_pattern_target_users() {
    let mut project = Project::new();
    project.set(
        "S.flint",
        vec![ClassDef::new(
            ClassApi::new("p.Shape", DefinitionType::Trait).sealed(),
        )],
    );
    // Matcher pattern-matches on Shape; Holder only names the type.
    project.set(
        "Matcher.flint",
        vec![ClassDef::new(
            ClassApi::new("p.Matcher", DefinitionType::Class)
                .with_members([member("classify", "(s: Shape): Int")]),
        )
        .depends_on("p.Shape", DependencyContext::MemberRef)
        .uses(
            "Shape",
            UseScopeSet::of([UseScope::Default, UseScope::PatternTarget]),
        )],
    );
    project.set(
        "Holder.flint",
        vec![ClassDef::new(
            ClassApi::new("p.Holder", DefinitionType::Class)
                .with_members([member("hold", "(s: Shape): Unit")]),
        )
        .depends_on("p.Shape", DependencyContext::MemberRef)],
    );

    let options = IncOptions::default();
    let analysis = build(&project, &options);

    let change = ApiChange::NamesChange {
        class: ClassName::from("p.Shape"),
        modified_names: FxHashSet::from_iter([(Name::from("Shape"), UseScope::PatternTarget)]),
    };
    let recompiled_classes = FxHashSet::from_iter([ClassName::from("p.Shape")]);
    let recompiled_sources = FxHashSet::from_iter([SourceId::from("S.flint")]);

    let optimized = IncOptions {
        use_optimized_sealed: true,
        ..IncOptions::default()
    };
    let invalidator = Invalidator::new(&optimized);
    let invalidated = invalidator.invalidate_after(
        std::slice::from_ref(&change),
        &analysis,
        &recompiled_classes,
        &recompiled_sources,
        1,
    );
    assert_eq!(names(&invalidated), FxHashSet::from_iter(["p.Matcher".to_string()]));

    // Without the optimization every user of the name is hit.
    let invalidator = Invalidator::new(&options);
    let invalidated = invalidator.invalidate_after(
        &[change],
        &analysis,
        &recompiled_classes,
        &recompiled_sources,
        1,
    );
    assert_eq!(
        names(&invalidated),
        FxHashSet::from_iter(["p.Matcher".to_string(), "p.Holder".to_string()])
    );
}

// ---------------------------------------------------------------------
// Package modules
// ---------------------------------------------------------------------

#[test]
fn test_package_module_inheriting_invalidated_class_is_recompiled() {
    let mut project = Project::new();
    project.set(
        "Base.flint",
        vec![ClassDef::new(
            ClassApi::new("p.Base", DefinitionType::Trait)
                .with_members([member("shared", "(): Int")]),
        )],
    );
    project.set(
        "package.flint",
        vec![ClassDef::new(
            ClassApi::new("p.package", DefinitionType::PackageModule)
                .with_parents([ClassName::from("p.Base")]),
        )
        .depends_on("p.Base", DependencyContext::Inheritance)],
    );

    let options = IncOptions::default();
    let analysis = build(&project, &options);

    let invalidator = Invalidator::new(&options);
    let additions = invalidator.expand_package_objects(
        &analysis,
        &FxHashSet::from_iter([ClassName::from("p.Base")]),
    );
    assert_eq!(names(&additions), FxHashSet::from_iter(["p.package".to_string()]));

    // A class that is not a package module is not added this way.
    let additions = invalidator.expand_package_objects(
        &analysis,
        &FxHashSet::from_iter([ClassName::from("p.Nothing")]),
    );
    assert!(additions.is_empty());
}

// ---------------------------------------------------------------------
// Cross-language dependencies
// ---------------------------------------------------------------------

#[test]
fn test_java_dependent_is_invalidated_conservatively() {
    let mut project = Project::new();
    project.set(
        "C.flint",
        vec![ClassDef::new(
            ClassApi::new("p.C", DefinitionType::Class)
                .with_members([member("foo", "(): Int"), member("bar", "(): Int")]),
        )],
    );
    // Both dependents reference p.C without using "foo"; only the Java
    // one must be invalidated when foo changes.
    project.set(
        "J.java",
        vec![ClassDef::new(
            ClassApi::new("p.J", DefinitionType::Class).with_members([member("j", "(): Unit")]),
        )
        .depends_on("p.C", DependencyContext::MemberRef)],
    );
    project.set(
        "F.flint",
        vec![ClassDef::new(
            ClassApi::new("p.F", DefinitionType::Class).with_members([member("f", "(): Unit")]),
        )
        .depends_on("p.C", DependencyContext::MemberRef)],
    );

    let options = IncOptions::default();
    let analysis = build(&project, &options);

    let invalidator = Invalidator::new(&options);
    let invalidated = invalidator.invalidate_after(
        &[ApiChange::NamesChange {
            class: ClassName::from("p.C"),
            modified_names: FxHashSet::from_iter([(Name::from("foo"), UseScope::Default)]),
        }],
        &analysis,
        &FxHashSet::from_iter([ClassName::from("p.C")]),
        &FxHashSet::from_iter([SourceId::from("C.flint")]),
        1,
    );

    assert_eq!(names(&invalidated), FxHashSet::from_iter(["p.J".to_string()]));
}

// ---------------------------------------------------------------------
// External API changes
// ---------------------------------------------------------------------

fn external_base(sig: &str) -> AnalyzedClass {
    hashing::analyze(
        1,
        Some(
            ClassApi::new("ext.Base", DefinitionType::Class)
                .with_members([member("size", sig)]),
        ),
        None,
        false,
        None,
    )
}

struct ExternalWorld {
    signature: &'static str,
}

impl ExternalLookup for ExternalWorld {
    fn lookup_analyzed_class(&self, name: &ClassName) -> Option<AnalyzedClass> {
        (name.as_str() == "ext.Base").then(|| external_base(self.signature))
    }
}

#[test]
fn test_changed_external_api_invalidates_its_users() {
    let mut project = Project::new();
    project.set(
        "User.flint",
        vec![ClassDef::new(
            ClassApi::new("p.User", DefinitionType::Class)
                .with_members([member("go", "(): Unit")]),
        )
        .depends_on_binary("ext.Base", DependencyContext::MemberRef)
        .uses("size", UseScopeSet::DEFAULT)],
    );
    project.set(
        "Other.flint",
        vec![ClassDef::new(
            ClassApi::new("p.Other", DefinitionType::Class)
                .with_members([member("o", "(): Unit")]),
        )],
    );

    let options = IncOptions {
        recompile_all_fraction: 1.0,
        ..IncOptions::default()
    };
    let sources = project.source_set();
    let stamper = project.stamper();

    // Full build against version one of the external world.
    let world = ExternalWorld { signature: "(): Int" };
    let driver = CycleDriver::new(&sources, &stamper, &world, &options);
    let compiler = ModelCompiler::new(&project);
    let mut manager = RecordingManager::default();
    let analysis = {
        let mut compile = compiler.compile_fn();
        driver
            .apply(&Analysis::empty(), &mut manager, &mut compile)
            .expect("full build")
            .analysis
    };
    assert!(analysis
        .apis
        .external
        .contains_key(&ClassName::from("ext.Base")));

    // The external API moves; nothing local changed.
    let world = ExternalWorld { signature: "(): Long" };
    let driver = CycleDriver::new(&sources, &stamper, &world, &options);
    let compiler = ModelCompiler::new(&project);
    let mut manager = RecordingManager::default();
    let result = {
        let mut compile = compiler.compile_fn();
        driver
            .apply(&analysis, &mut manager, &mut compile)
            .expect("incremental build")
    };

    assert!(result.compiled);
    assert_eq!(result.cycles, 1);
    assert_eq!(
        compiler.compiled_in_cycle(1),
        FxHashSet::from_iter([SourceId::from("User.flint")])
    );
}

// ---------------------------------------------------------------------
// Saturation
// ---------------------------------------------------------------------

#[test]
fn test_saturation_widens_to_member_ref_closure() {
    let mut project = Project::new();
    project.set(
        "C.flint",
        vec![ClassDef::new(
            ClassApi::new("p.C", DefinitionType::Class)
                .with_members([member("foo", "(): Int")]),
        )],
    );
    project.set(
        "U.flint",
        vec![ClassDef::new(
            ClassApi::new("p.U", DefinitionType::Class).with_members([member("u", "(): Unit")]),
        )
        .depends_on("p.C", DependencyContext::MemberRef)],
    );
    // X references U but uses none of C's changed names; only the
    // saturated closure reaches it.
    project.set(
        "X.flint",
        vec![ClassDef::new(
            ClassApi::new("p.X", DefinitionType::Class).with_members([member("x", "(): Unit")]),
        )
        .depends_on("p.U", DependencyContext::MemberRef)],
    );

    let options = IncOptions::default();
    let analysis = build(&project, &options);

    let change = ApiChange::NamesChange {
        class: ClassName::from("p.C"),
        modified_names: FxHashSet::from_iter([(Name::from("foo"), UseScope::Default)]),
    };
    let recompiled_classes = FxHashSet::from_iter([ClassName::from("p.C")]);
    let recompiled_sources = FxHashSet::from_iter([SourceId::from("C.flint")]);
    let invalidator = Invalidator::new(&options);

    // Under the threshold: the name filter stops at direct users.
    let invalidated = invalidator.invalidate_after(
        std::slice::from_ref(&change),
        &analysis,
        &recompiled_classes,
        &recompiled_sources,
        1,
    );
    assert!(!invalidated.contains(&ClassName::from("p.X")));

    // Past the threshold: brute-force member-reference closure.
    let invalidated = invalidator.invalidate_after(
        std::slice::from_ref(&change),
        &analysis,
        &recompiled_classes,
        &recompiled_sources,
        options.transitive_step + 1,
    );
    assert!(invalidated.contains(&ClassName::from("p.U")));
    assert!(invalidated.contains(&ClassName::from("p.X")));
}
