//! Interned identifiers for sources, products, libraries and classes
//!
//! All identifiers are `Arc<str>` newtypes: cheap to clone, deduplicated
//! across the relation store, serialized as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Sentinel suffix marking the companion module (singleton) form of a
/// class name.
pub const MODULE_SUFFIX: &str = "$";

macro_rules! interned_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(value: impl Into<Arc<str>>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

interned_id! {
    /// Opaque reference to an input source (path-like).
    SourceId
}

interned_id! {
    /// Opaque reference to an emitted class file.
    ProductId
}

interned_id! {
    /// Reference to a classpath artifact (jar or external class file).
    LibraryId
}

interned_id! {
    /// Compiled, flattened class name as it appears in a class file.
    BinaryClassName
}

interned_id! {
    /// Unqualified identifier referenced from a class body.
    Name
}

/// Fully-qualified source-level class name.
///
/// A companion module is encoded by appending [`MODULE_SUFFIX`]; both
/// forms are preserved wherever the compiler reports them, and lookups
/// that want the canonical entry normalize through [`ClassName::as_class`].
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassName(Arc<str>);

impl ClassName {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the module (companion singleton) form.
    pub fn is_module(&self) -> bool {
        self.0.ends_with(MODULE_SUFFIX)
    }

    /// The module form of this name (identity when already a module).
    pub fn as_module(&self) -> ClassName {
        if self.is_module() {
            self.clone()
        } else {
            ClassName::new(format!("{}{}", self.0, MODULE_SUFFIX))
        }
    }

    /// The class form of this name (identity when already a class).
    pub fn as_class(&self) -> ClassName {
        match self.0.strip_suffix(MODULE_SUFFIX) {
            Some(stripped) => ClassName::new(stripped),
            None => self.clone(),
        }
    }

    /// Last segment of the qualified name, without the module sentinel.
    pub fn simple_name(&self) -> Name {
        let base = self.0.strip_suffix(MODULE_SUFFIX).unwrap_or(&self.0);
        match base.rsplit_once('.') {
            Some((_, simple)) => Name::new(simple),
            None => Name::new(base),
        }
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClassName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
