//! Immutable-by-convention binary relations with forward/reverse indices
//!
//! A `Relation<K, V>` is a finite mapping from keys to sets of values with
//! an eagerly maintained reverse index, so both "what does k map to" and
//! "who maps to v" are O(1) average. Neither direction carries ordering.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Binary relation between `K` and `V`.
///
/// Mutating operations (`add`, `remove`, `remove_all`, `remove_values`,
/// `merge`) are amortized O(|values touched|); the pure `merged` and
/// `without` variants copy-on-write for callers that need snapshot
/// semantics.
#[derive(Debug, Clone)]
pub struct Relation<K, V> {
    forward: FxHashMap<K, FxHashSet<V>>,
    reverse: FxHashMap<V, FxHashSet<K>>,
}

impl<K, V> Relation<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            forward: FxHashMap::default(),
            reverse: FxHashMap::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Number of (k, v) pairs in the relation.
    pub fn pair_count(&self) -> usize {
        self.forward.values().map(|vs| vs.len()).sum()
    }

    /// Add `(k, v)` for every `v` in `values`.
    pub fn add(&mut self, key: K, values: impl IntoIterator<Item = V>) {
        let entry = self.forward.entry(key.clone()).or_default();
        for value in values {
            if entry.insert(value.clone()) {
                self.reverse.entry(value).or_default().insert(key.clone());
            }
        }
        if entry.is_empty() {
            self.forward.remove(&key);
        }
    }

    /// Add a single `(k, v)` pair. Idempotent.
    pub fn add_pair(&mut self, key: K, value: V) {
        self.add(key, std::iter::once(value));
    }

    /// Remove every pair keyed by `key`.
    pub fn remove(&mut self, key: &K) {
        if let Some(values) = self.forward.remove(key) {
            for value in values {
                if let Some(keys) = self.reverse.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.reverse.remove(&value);
                    }
                }
            }
        }
    }

    /// Remove every pair keyed by any of `keys`.
    pub fn remove_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a K>)
    where
        K: 'a,
    {
        for key in keys {
            self.remove(key);
        }
    }

    /// Remove every pair whose value side is in `values`.
    pub fn remove_values<'a>(&mut self, values: impl IntoIterator<Item = &'a V>)
    where
        V: 'a,
    {
        for value in values {
            if let Some(keys) = self.reverse.remove(value) {
                for key in keys {
                    if let Some(vs) = self.forward.get_mut(&key) {
                        vs.remove(value);
                        if vs.is_empty() {
                            self.forward.remove(&key);
                        }
                    }
                }
            }
        }
    }

    /// Union every pair of `other` into `self`.
    pub fn merge(&mut self, other: &Relation<K, V>) {
        for (key, values) in &other.forward {
            self.add(key.clone(), values.iter().cloned());
        }
    }

    /// Pure union: a new relation holding the pairs of both operands.
    pub fn merged(&self, other: &Relation<K, V>) -> Relation<K, V> {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Pure restriction: a new relation without the pairs keyed by `keys`.
    pub fn without<'a>(&self, keys: impl IntoIterator<Item = &'a K>) -> Relation<K, V>
    where
        K: 'a,
    {
        let mut result = self.clone();
        result.remove_all(keys);
        result
    }

    /// Values related to `key` (empty when absent).
    pub fn forward<'a>(&'a self, key: &K) -> impl Iterator<Item = &'a V> + 'a {
        self.forward.get(key).into_iter().flatten()
    }

    /// Keys related to `value` (empty when absent).
    pub fn reverse<'a>(&'a self, value: &V) -> impl Iterator<Item = &'a K> + 'a {
        self.reverse.get(value).into_iter().flatten()
    }

    pub fn contains(&self, key: &K, value: &V) -> bool {
        self.forward.get(key).is_some_and(|vs| vs.contains(value))
    }

    pub fn has_key(&self, key: &K) -> bool {
        self.forward.contains_key(key)
    }

    pub fn has_value(&self, value: &V) -> bool {
        self.reverse.contains_key(value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.forward.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.reverse.keys()
    }

    /// All pairs, for serialization and debug dumps. Order unspecified.
    pub fn all(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.forward
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k, v)))
    }
}

impl<K, V> Default for Relation<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// Equality is by content; the reverse index is derived state.
impl<K, V> PartialEq for Relation<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        self.forward == other.forward
    }
}

impl<K, V> Eq for Relation<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
}

// Only the forward map is serialized; the reverse index is rebuilt on read.
impl<K, V> Serialize for Relation<K, V>
where
    K: Eq + Hash + Clone + Serialize,
    V: Eq + Hash + Clone + Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.forward.len()))?;
        for (key, values) in &self.forward {
            let values: Vec<&V> = values.iter().collect();
            map.serialize_entry(key, &values)?;
        }
        map.end()
    }
}

impl<'de, K, V> Deserialize<'de> for Relation<K, V>
where
    K: Eq + Hash + Clone + Deserialize<'de>,
    V: Eq + Hash + Clone + Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RelationVisitor<K, V>(PhantomData<(K, V)>);

        impl<'de, K, V> Visitor<'de> for RelationVisitor<K, V>
        where
            K: Eq + Hash + Clone + Deserialize<'de>,
            V: Eq + Hash + Clone + Deserialize<'de>,
        {
            type Value = Relation<K, V>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map from keys to value lists")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut relation = Relation::new();
                while let Some((key, values)) = access.next_entry::<K, Vec<V>>()? {
                    relation.add(key, values);
                }
                Ok(relation)
            }
        }

        deserializer.deserialize_map(RelationVisitor(PhantomData))
    }
}
