//! Per-path method table.

use http::Method;
use smallvec::SmallVec;

/// Maps HTTP methods to values for a single terminal trie node.
///
/// Most paths carry one to three methods, so entries live inline and are
/// scanned linearly. Entries keep registration order, which is also the
/// order reported in `Allow` headers.
#[derive(Debug, Clone)]
pub struct MethodRouter<T> {
    entries: SmallVec<[(Method, T); 4]>,
}

impl<T> Default for MethodRouter<T> {
    fn default() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }
}

impl<T> MethodRouter<T> {
    /// Creates an empty method table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value registered for `method`.
    #[must_use]
    pub fn get(&self, method: &Method) -> Option<&T> {
        self.entries
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, v)| v)
    }

    /// Registers a value for `method`.
    ///
    /// Returns the existing value instead of replacing it when `method` is
    /// already present.
    pub fn insert(&mut self, method: Method, value: T) -> Result<(), &T> {
        if let Some(index) = self.entries.iter().position(|(m, _)| *m == method) {
            return Err(&self.entries[index].1);
        }
        self.entries.push((method, value));
        Ok(())
    }

    /// Returns true if any method is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the registered methods in registration order.
    #[must_use]
    pub fn allowed_methods(&self) -> Vec<Method> {
        self.entries.iter().map(|(m, _)| m.clone()).collect()
    }

    /// Returns the first registered value.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.entries.first().map(|(_, v)| v)
    }

    /// Iterates over `(method, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Method, &T)> {
        self.entries.iter().map(|(m, v)| (m, v))
    }
}
