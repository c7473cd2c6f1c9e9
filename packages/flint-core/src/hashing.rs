//! Deterministic API hashing
//!
//! Turns a [`ClassApi`] (or a companion pair of them) into the hashes the
//! invalidator works with: one whole-API hash, one extra hash that also
//! sees trait-private members, and one hash per exported name and use
//! scope. Hashing is order-insensitive in member order and parent order.

use crate::api::{
    AnalyzedClass, ClassApi, Companions, MemberDef, NameHash, UseScope, UseScopeSet,
};
use crate::fingerprint::{CanonicalHasher, Fingerprint};
use crate::ids::Name;
use rustc_hash::FxHashMap;
use std::sync::Arc;

fn definition_tag(api: &ClassApi) -> u8 {
    use crate::api::DefinitionType::*;
    match api.definition_type {
        Class => 0,
        Trait => 1,
        Module => 2,
        PackageModule => 3,
    }
}

fn member_encoding(hasher: &mut CanonicalHasher, member: &MemberDef) {
    hasher
        .tag(member.kind as u8)
        .tag(member.visibility as u8)
        .tag(member.scopes.as_byte())
        .str_field(member.name.as_str())
        .str_field(&member.signature);
}

fn hash_structure<'a>(
    api: &ClassApi,
    members: impl Iterator<Item = &'a MemberDef>,
) -> Fingerprint {
    let mut sorted: Vec<&MemberDef> = members.collect();
    sorted.sort_by(|a, b| {
        (a.name.as_str(), a.kind as u8, a.visibility as u8, &a.signature).cmp(&(
            b.name.as_str(),
            b.kind as u8,
            b.visibility as u8,
            &b.signature,
        ))
    });

    let mut parents: Vec<&str> = api.parents.iter().map(|p| p.as_str()).collect();
    parents.sort_unstable();

    let mut hasher = CanonicalHasher::new();
    hasher
        .tag(definition_tag(api))
        .tag(api.is_sealed as u8)
        .str_field(api.name.as_str());
    for parent in parents {
        hasher.str_field(parent);
    }
    for member in sorted {
        member_encoding(&mut hasher, member);
    }
    hasher.finish()
}

/// Hash of the whole public API: definition shape, parents, and every
/// non-private member.
pub fn api_hash(api: &ClassApi) -> Fingerprint {
    hash_structure(api, api.members.iter().filter(|m| m.is_public()))
}

/// Like [`api_hash`], but for traits it also covers private members.
/// Everything in a trait body can affect mixed-in subclasses, so private
/// renames there must be observable; for any other definition type this
/// is identical to the API hash.
pub fn extra_hash(api: &ClassApi) -> Fingerprint {
    if api.is_trait() {
        hash_structure(api, api.members.iter())
    } else {
        api_hash(api)
    }
}

/// Per-name hashes: for each exported identifier and each scope it is
/// usable from, a hash over the members contributing to that identifier.
///
/// The definition's own simple name contributes an entry covering the
/// shape (parents, sealedness); a sealed definition tags it with
/// `PatternTarget` so exhaustiveness-sensitive users can be told apart.
pub fn name_hashes(api: &ClassApi) -> Vec<NameHash> {
    let mut groups: FxHashMap<Name, Vec<&MemberDef>> = FxHashMap::default();
    for member in api.members.iter().filter(|m| m.is_public()) {
        groups.entry(member.name.clone()).or_default().push(member);
    }

    let mut result = Vec::new();
    for (name, mut members) in groups {
        members.sort_by(|a, b| {
            (a.kind as u8, a.visibility as u8, &a.signature).cmp(&(
                b.kind as u8,
                b.visibility as u8,
                &b.signature,
            ))
        });

        let scopes: UseScopeSet =
            UseScopeSet::of(members.iter().flat_map(|m| m.scopes.iter()));
        for scope in scopes.iter() {
            let mut hasher = CanonicalHasher::new();
            hasher.tag(scope as u8).str_field(name.as_str());
            for member in members.iter().filter(|m| m.scopes.contains(scope)) {
                member_encoding(&mut hasher, member);
            }
            result.push(NameHash::new(name.clone(), scope, hasher.finish()));
        }
    }

    // The definition itself is referable by its simple name.
    let own_name = api.name.simple_name();
    let mut own_scopes = UseScopeSet::DEFAULT;
    if api.is_sealed {
        own_scopes = own_scopes.with(UseScope::PatternTarget);
    }
    let mut parents: Vec<&str> = api.parents.iter().map(|p| p.as_str()).collect();
    parents.sort_unstable();
    for scope in own_scopes.iter() {
        let mut hasher = CanonicalHasher::new();
        hasher
            .tag(scope as u8)
            .tag(definition_tag(api))
            .tag(api.is_sealed as u8)
            .str_field(own_name.as_str());
        for parent in &parents {
            hasher.str_field(parent);
        }
        result.push(NameHash::new(own_name.clone(), scope, hasher.finish()));
    }

    result
}

/// Merge the per-name hash arrays of a class and its companion module.
/// Entries meeting on (name, scope) are combined with the stable
/// class-then-module combinator; the rest pass through.
pub fn merge_name_hashes(class: Vec<NameHash>, module: Vec<NameHash>) -> Vec<NameHash> {
    let mut merged: FxHashMap<(Name, UseScope), Fingerprint> = FxHashMap::default();
    for nh in class {
        merged.insert((nh.name, nh.scope), nh.hash);
    }
    for nh in module {
        merged
            .entry((nh.name.clone(), nh.scope))
            .and_modify(|existing| *existing = Fingerprint::combine(*existing, nh.hash))
            .or_insert(nh.hash);
    }
    merged
        .into_iter()
        .map(|((name, scope), hash)| NameHash::new(name, scope, hash))
        .collect()
}

/// Strip payload that does not contribute to any hash: member bodies
/// always, private member structure for everything but traits.
pub fn minimize(api: &ClassApi) -> ClassApi {
    let keep_private = api.is_trait();
    let members = api
        .members
        .iter()
        .filter(|m| keep_private || m.is_public())
        .map(|m| MemberDef {
            body: None,
            ..m.clone()
        })
        .collect();
    ClassApi {
        members,
        ..api.clone()
    }
}

/// Build the stored record for one top-level name from the definitions
/// the compiler reported for it.
///
/// With `api_debug` off the stored structure is minimized; the hashes are
/// always computed from the full structure first.
pub fn analyze(
    compilation_timestamp: u64,
    class_api: Option<ClassApi>,
    module_api: Option<ClassApi>,
    api_debug: bool,
    provenance: Option<Arc<str>>,
) -> AnalyzedClass {
    let name = class_api
        .as_ref()
        .or(module_api.as_ref())
        .map(|api| api.name.as_class())
        .expect("analyze requires at least one definition");

    let whole = |f: fn(&ClassApi) -> Fingerprint| match (&class_api, &module_api) {
        (Some(c), Some(m)) => Fingerprint::combine(f(c), f(m)),
        (Some(c), None) => f(c),
        (None, Some(m)) => f(m),
        (None, None) => unreachable!(),
    };

    let api = whole(api_hash);
    let extra = whole(extra_hash);
    let hashes = merge_name_hashes(
        class_api.as_ref().map(name_hashes).unwrap_or_default(),
        module_api.as_ref().map(name_hashes).unwrap_or_default(),
    );
    let has_macro = class_api.as_ref().is_some_and(|a| a.has_macro())
        || module_api.as_ref().is_some_and(|a| a.has_macro());

    let store = |api: ClassApi| {
        if api_debug {
            Arc::new(api)
        } else {
            Arc::new(minimize(&api))
        }
    };

    AnalyzedClass {
        compilation_timestamp,
        name,
        companions: Companions {
            class_api: class_api.map(store),
            module_api: module_api.map(store),
        },
        api_hash: api,
        extra_hash: extra,
        name_hashes: hashes,
        has_macro,
        provenance,
    }
}
