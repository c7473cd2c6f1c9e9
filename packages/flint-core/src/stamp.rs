//! Change-detection stamps
//!
//! A stamp is an opaque fingerprint of a file, compared only for
//! equivalence. The engine never interprets stamp contents; which flavor
//! is produced is up to the [`StampReader`] in use.

use crate::fingerprint::Fingerprint;
use crate::ids::{LibraryId, ProductId, SourceId};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Stamp {
    /// Content hash of the file.
    Hash(Fingerprint),
    /// Last-modified time in milliseconds since the epoch.
    LastModified(u64),
    /// The file does not exist (or could not be read).
    Missing,
}

impl Stamp {
    /// Stamps are opaque: equivalence is plain equality, including the
    /// flavor. A hash stamp never matches a last-modified stamp.
    pub fn equivalent(&self, other: &Stamp) -> bool {
        self == other
    }
}

impl Default for Stamp {
    fn default() -> Self {
        Stamp::Missing
    }
}

/// Produces stamps for the three kinds of tracked files. Readers must
/// be shareable across compiler threads (the analysis callback holds
/// one).
pub trait StampReader: Send + Sync {
    fn source(&self, source: &SourceId) -> Stamp;
    fn product(&self, product: &ProductId) -> Stamp;
    fn library(&self, library: &LibraryId) -> Stamp;
}

/// Content-hash stamper: Blake3 over file contents for sources and
/// libraries, last-modified for products (class files are rewritten on
/// every compile, so hashing them buys nothing).
#[derive(Debug, Default)]
pub struct HashStamper;

impl HashStamper {
    fn hash_of(path: &str) -> Stamp {
        match Fingerprint::from_file(path) {
            Ok(fp) => Stamp::Hash(fp),
            Err(_) => Stamp::Missing,
        }
    }
}

impl StampReader for HashStamper {
    fn source(&self, source: &SourceId) -> Stamp {
        Self::hash_of(source.as_str())
    }

    fn product(&self, product: &ProductId) -> Stamp {
        mtime_stamp(product.as_str())
    }

    fn library(&self, library: &LibraryId) -> Stamp {
        Self::hash_of(library.as_str())
    }
}

/// Pure last-modified stamper, for callers that prefer speed over
/// robustness against touch-without-change.
#[derive(Debug, Default)]
pub struct TimestampStamper;

impl StampReader for TimestampStamper {
    fn source(&self, source: &SourceId) -> Stamp {
        mtime_stamp(source.as_str())
    }

    fn product(&self, product: &ProductId) -> Stamp {
        mtime_stamp(product.as_str())
    }

    fn library(&self, library: &LibraryId) -> Stamp {
        mtime_stamp(library.as_str())
    }
}

fn mtime_stamp(path: impl AsRef<Path>) -> Stamp {
    let mtime = Path::new(path.as_ref())
        .metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok());
    match mtime {
        Some(d) => Stamp::LastModified(d.as_millis() as u64),
        None => Stamp::Missing,
    }
}

/// Recorded stamps of one analysis: what each tracked file looked like
/// when it was last compiled against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamps {
    pub sources: FxHashMap<SourceId, Stamp>,
    pub products: FxHashMap<ProductId, Stamp>,
    pub libraries: FxHashMap<LibraryId, Stamp>,
}

impl Stamps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &Stamps) {
        self.sources
            .extend(other.sources.iter().map(|(k, v)| (k.clone(), *v)));
        self.products
            .extend(other.products.iter().map(|(k, v)| (k.clone(), *v)));
        self.libraries
            .extend(other.libraries.iter().map(|(k, v)| (k.clone(), *v)));
    }
}
