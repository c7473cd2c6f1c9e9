//! Class-file management
//!
//! The driver never touches class files directly; it tells a
//! [`ClassFileManager`] which products it is about to invalidate and
//! which ones a cycle generated, and commits or rolls back the whole run
//! at the end.

use flint_core::ProductId;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Scoped owner of generated class files for one engine run.
///
/// Contract: `delete` before the products' sources are recompiled,
/// `generated` after every cycle, then exactly one `complete`; `true`
/// commits, `false` restores the pre-run state.
pub trait ClassFileManager {
    fn delete(&mut self, products: &[ProductId]);
    fn generated(&mut self, products: &[ProductId]);
    fn complete(&mut self, success: bool);
}

/// Manager for embeddings that handle class files elsewhere.
#[derive(Debug, Default)]
pub struct NoopClassFileManager;

impl ClassFileManager for NoopClassFileManager {
    fn delete(&mut self, _products: &[ProductId]) {}
    fn generated(&mut self, _products: &[ProductId]) {}
    fn complete(&mut self, _success: bool) {}
}

/// Transactional manager: deleted class files are stashed in a
/// temporary directory and restored on rollback; generated class files
/// are removed on rollback. All-or-nothing for the whole run.
pub struct TransactionalClassFileManager {
    stash: Option<TempDir>,
    /// (original path, stashed path) of every deleted class file.
    moved: Vec<(PathBuf, PathBuf)>,
    generated: Vec<PathBuf>,
    completed: bool,
}

impl TransactionalClassFileManager {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            stash: Some(TempDir::new()?),
            moved: Vec::new(),
            generated: Vec::new(),
            completed: false,
        })
    }

    fn stash_path(&self, index: usize) -> PathBuf {
        self.stash
            .as_ref()
            .expect("stash lives until complete")
            .path()
            .join(format!("{index}.class"))
    }
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    // Rename when possible; the stash may live on another filesystem.
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

impl ClassFileManager for TransactionalClassFileManager {
    fn delete(&mut self, products: &[ProductId]) {
        for product in products {
            let original = PathBuf::from(product.as_str());
            if !original.exists() {
                continue;
            }
            let stashed = self.stash_path(self.moved.len());
            match move_file(&original, &stashed) {
                Ok(()) => self.moved.push((original, stashed)),
                Err(e) => warn!("failed to stash {}: {e}", original.display()),
            }
        }
    }

    fn generated(&mut self, products: &[ProductId]) {
        self.generated
            .extend(products.iter().map(|p| PathBuf::from(p.as_str())));
    }

    fn complete(&mut self, success: bool) {
        assert!(!self.completed, "complete called twice");
        self.completed = true;

        if success {
            debug!(
                "committing class files: {} deleted, {} generated",
                self.moved.len(),
                self.generated.len()
            );
        } else {
            for path in self.generated.drain(..) {
                if let Err(e) = fs::remove_file(&path) {
                    if path.exists() {
                        warn!("failed to remove {}: {e}", path.display());
                    }
                }
            }
            for (original, stashed) in self.moved.drain(..) {
                if let Err(e) = move_file(&stashed, &original) {
                    warn!("failed to restore {}: {e}", original.display());
                }
            }
        }
        self.stash = None;
    }
}

impl Drop for TransactionalClassFileManager {
    fn drop(&mut self) {
        // A dropped, never-completed manager rolls back.
        if !self.completed && self.stash.is_some() {
            self.complete(false);
        }
    }
}
