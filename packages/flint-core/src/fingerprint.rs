//! Content fingerprints with Blake3 hashing

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Opaque content fingerprint (Blake3 hash).
///
/// Fingerprints are compared only for equivalence; no ordering or
/// structure is exposed to callers.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct Fingerprint(blake3::Hash);

impl Fingerprint {
    /// Compute fingerprint from in-memory content.
    pub fn compute(content: &[u8]) -> Self {
        Self(blake3::hash(content))
    }

    /// Compute from file path (chunked read + hash).
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let mut hasher = blake3::Hasher::new();

        let mut buffer = [0u8; 8192];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(Self(hasher.finalize()))
    }

    /// Fast path: fingerprint from file metadata (mtime + size).
    ///
    /// Probabilistic; two different files with the same mtime and size
    /// collide. Use only where an occasional false "unchanged" is
    /// acceptable.
    pub fn from_metadata(mtime_ns: u64, size_bytes: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&mtime_ns.to_le_bytes());
        hasher.update(&size_bytes.to_le_bytes());
        Self(hasher.finalize())
    }

    /// Combine two fingerprints into one with a stable, order-sensitive
    /// combinator.
    pub fn combine(a: Fingerprint, b: Fingerprint) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(a.0.as_bytes());
        hasher.update(b.0.as_bytes());
        Self(hasher.finalize())
    }

    /// Zero fingerprint (placeholder for absent content).
    pub fn zero() -> Self {
        Self(blake3::Hash::from_bytes([0u8; 32]))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    pub fn from_hex(hex: &str) -> Result<Self, blake3::HexError> {
        Ok(Self(blake3::Hash::from_hex(hex)?))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

/// A hasher that feeds a canonical byte encoding into Blake3.
///
/// Length-prefixes every field so that adjacent fields cannot alias
/// (`("ab", "c")` must not hash like `("a", "bc")`).
pub struct CanonicalHasher {
    inner: blake3::Hasher,
}

impl CanonicalHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(&(bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    pub fn str_field(&mut self, s: &str) -> &mut Self {
        self.field(s.as_bytes())
    }

    pub fn tag(&mut self, tag: u8) -> &mut Self {
        self.inner.update(&[tag]);
        self
    }

    pub fn finish(&self) -> Fingerprint {
        Fingerprint(self.inner.finalize())
    }
}

impl Default for CanonicalHasher {
    fn default() -> Self {
        Self::new()
    }
}

// Blake3's hash type does not implement serde; round-trip through hex.
impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_str = String::deserialize(deserializer)?;
        Self::from_hex(&hex_str).map_err(serde::de::Error::custom)
    }
}
