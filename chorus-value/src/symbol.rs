//! Interned symbols.
//!
//! Symbols are case-preserving names backed by a process-wide interner.
//! Interning the same name twice returns handles that share one `Arc<str>`,
//! so cloning a symbol is a reference-count bump and comparisons on hot paths
//! (table lookups keyed by slot names) stay cheap.
//!
//! ```rust
//! use chorus_value::Symbol;
//!
//! let a = Symbol::intern("name");
//! let b = Symbol::intern("name");
//! assert!(a.ptr_eq(&b));
//! assert_eq!(a.as_str(), "name");
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

static INTERNER: LazyLock<Mutex<HashSet<Arc<str>>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// An interned, case-preserving name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Intern a name, returning the shared handle for it.
    pub fn intern(name: &str) -> Self {
        let mut set = INTERNER.lock();
        if let Some(existing) = set.get(name) {
            return Self(Arc::clone(existing));
        }
        let arc: Arc<str> = Arc::from(name);
        set.insert(Arc::clone(&arc));
        Self(arc)
    }

    /// The symbol's name.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name contains an uppercase ASCII letter.
    pub fn has_uppercase(&self) -> bool {
        self.0.bytes().any(|b| b.is_ascii_uppercase())
    }

    /// The symbol for the lower-cased name.
    pub fn to_lowercase(&self) -> Self {
        if self.has_uppercase() {
            Self::intern(&self.0.to_lowercase())
        } else {
            self.clone()
        }
    }

    /// Whether both handles share the same interned allocation.
    #[inline]
    pub fn ptr_eq(&self, other: &Symbol) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Number of distinct names interned so far.
pub fn interned_count() -> usize {
    INTERNER.lock().len()
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Self::intern(name)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
