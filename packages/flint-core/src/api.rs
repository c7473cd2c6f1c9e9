//! API model for analyzed class-like definitions
//!
//! `ClassApi` is what the compiler reports for one class, trait, module or
//! package module; `AnalyzedClass` is what the engine stores: the hashes
//! that drive invalidation plus the (minimized) structure behind them.

use crate::fingerprint::Fingerprint;
use crate::ids::{ClassName, Name};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Syntactic role of a name reference.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum UseScope {
    /// Plain reference.
    Default,
    /// Reference resolved through implicit search.
    Implicit,
    /// Reference as the target of a pattern match.
    PatternTarget,
}

impl UseScope {
    pub const ALL: [UseScope; 3] = [UseScope::Default, UseScope::Implicit, UseScope::PatternTarget];

    fn bit(self) -> u8 {
        match self {
            UseScope::Default => 0b001,
            UseScope::Implicit => 0b010,
            UseScope::PatternTarget => 0b100,
        }
    }
}

/// Compact set of [`UseScope`]s.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UseScopeSet(u8);

impl UseScopeSet {
    pub const DEFAULT: UseScopeSet = UseScopeSet(0b001);

    pub fn empty() -> Self {
        UseScopeSet(0)
    }

    pub fn of(scopes: impl IntoIterator<Item = UseScope>) -> Self {
        let mut set = Self::empty();
        for scope in scopes {
            set = set.with(scope);
        }
        set
    }

    #[must_use]
    pub fn with(self, scope: UseScope) -> Self {
        UseScopeSet(self.0 | scope.bit())
    }

    pub fn contains(self, scope: UseScope) -> bool {
        self.0 & scope.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = UseScope> {
        UseScope::ALL.into_iter().filter(move |s| self.contains(*s))
    }

    /// Stable byte for canonical hashing.
    pub fn as_byte(self) -> u8 {
        self.0
    }
}

impl fmt::Display for UseScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in self.iter() {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{:?}", scope)?;
            first = false;
        }
        Ok(())
    }
}

/// One unqualified identifier referenced by a class, tagged with the
/// scopes it was used in. Value side of the `usedNames` relation.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct UsedName {
    pub name: Name,
    pub scopes: UseScopeSet,
}

impl UsedName {
    pub fn new(name: impl Into<Name>, scopes: UseScopeSet) -> Self {
        Self {
            name: name.into(),
            scopes,
        }
    }
}

/// What kind of class-like definition an API describes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DefinitionType {
    Class,
    Trait,
    /// Companion singleton.
    Module,
    /// Module scoping declarations at the package level.
    PackageModule,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    Def,
    Val,
    Var,
    TypeAlias,
    MacroDef,
}

/// One member of a class-like definition, as reported by the compiler.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MemberDef {
    pub name: Name,
    pub kind: MemberKind,
    pub visibility: Visibility,
    /// Canonical type signature; contributes to every hash.
    pub signature: String,
    /// Implementation payload. Never hashed; stripped by minimization.
    pub body: Option<String>,
    /// Scopes through which this member can be referenced.
    pub scopes: UseScopeSet,
}

impl MemberDef {
    pub fn new(
        name: impl Into<Name>,
        kind: MemberKind,
        visibility: Visibility,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            visibility,
            signature: signature.into(),
            body: None,
            scopes: UseScopeSet::DEFAULT,
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: UseScopeSet) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_public(&self) -> bool {
        !matches!(self.visibility, Visibility::Private)
    }
}

/// Full structure of one class-like definition.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClassApi {
    pub name: ClassName,
    pub definition_type: DefinitionType,
    pub is_sealed: bool,
    /// Names in a parent (extends/with) position.
    pub parents: Vec<ClassName>,
    pub members: Vec<MemberDef>,
}

impl ClassApi {
    pub fn new(name: impl Into<ClassName>, definition_type: DefinitionType) -> Self {
        Self {
            name: name.into(),
            definition_type,
            is_sealed: false,
            parents: Vec::new(),
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.is_sealed = true;
        self
    }

    #[must_use]
    pub fn with_parents(mut self, parents: impl IntoIterator<Item = ClassName>) -> Self {
        self.parents = parents.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_members(mut self, members: impl IntoIterator<Item = MemberDef>) -> Self {
        self.members = members.into_iter().collect();
        self
    }

    pub fn has_macro(&self) -> bool {
        self.members
            .iter()
            .any(|m| matches!(m.kind, MemberKind::MacroDef))
    }

    pub fn is_trait(&self) -> bool {
        matches!(self.definition_type, DefinitionType::Trait)
    }

    pub fn is_package_module(&self) -> bool {
        matches!(self.definition_type, DefinitionType::PackageModule)
    }
}

/// Per-name hash: the slice of a class API that contributes to one
/// exported identifier, under one use scope.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NameHash {
    pub name: Name,
    pub scope: UseScope,
    pub hash: Fingerprint,
}

impl NameHash {
    pub fn new(name: impl Into<Name>, scope: UseScope, hash: Fingerprint) -> Self {
        Self {
            name: name.into(),
            scope,
            hash,
        }
    }
}

/// A class-like and a module-like definition paired under one name.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Companions {
    pub class_api: Option<Arc<ClassApi>>,
    pub module_api: Option<Arc<ClassApi>>,
}

impl Companions {
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<ClassApi>> {
        self.class_api.iter().chain(self.module_api.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.class_api.is_none() && self.module_api.is_none()
    }
}

/// The stored record of one analyzed top-level name: whole-API hashes,
/// per-name hashes and the structure they were computed from.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedClass {
    /// When the compilation that produced this API started, in epoch ms.
    pub compilation_timestamp: u64,
    pub name: ClassName,
    pub companions: Companions,
    /// Hash of the whole public API.
    pub api_hash: Fingerprint,
    /// Like `api_hash` but including private members; tie-break signal
    /// for trait-private modifications.
    pub extra_hash: Fingerprint,
    pub name_hashes: Vec<NameHash>,
    pub has_macro: bool,
    /// Where the class landed (output jar), when known.
    pub provenance: Option<Arc<str>>,
}

impl AnalyzedClass {
    /// The record used when an external lookup has no answer: hashes at
    /// zero, no structure. Diffing against it reports every name changed.
    pub fn empty(name: ClassName) -> Self {
        Self {
            compilation_timestamp: 0,
            name,
            companions: Companions::default(),
            api_hash: Fingerprint::zero(),
            extra_hash: Fingerprint::zero(),
            name_hashes: Vec::new(),
            has_macro: false,
            provenance: None,
        }
    }

    pub fn is_trait(&self) -> bool {
        self.companions
            .definitions()
            .any(|api| api.is_trait())
    }

    pub fn is_package_module(&self) -> bool {
        self.companions
            .definitions()
            .any(|api| api.is_package_module())
    }
}
