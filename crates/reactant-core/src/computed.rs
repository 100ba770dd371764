//! Computed maps: named derived views over a value bag

use crate::{ObservableProxy, Result, Value};
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

/// Zero-argument accessor
pub type Accessor<T> = Rc<dyn Fn(&ObservableProxy<T>) -> Result<Value>>;

/// Parameterized computation
pub type Function<T> = Rc<dyn Fn(&ObservableProxy<T>, &[Value]) -> Result<Value>>;

/// A computed entry
///
/// Entries receive the live proxy at call time, so one map can be shared by a
/// definition and every instance stamped from it.
pub enum Computed<T> {
    /// Derived value; memoized when the config enables it
    Accessor(Accessor<T>),
    /// Called with arguments on every read, never memoized
    Function(Function<T>),
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        match self {
            Computed::Accessor(f) => Computed::Accessor(Rc::clone(f)),
            Computed::Function(f) => Computed::Function(Rc::clone(f)),
        }
    }
}

/// Name -> computed entry registry
pub struct ComputedMap<T> {
    entries: IndexMap<String, Computed<T>>,
}

impl<T: 'static> ComputedMap<T> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Add a zero-argument accessor
    pub fn accessor(
        mut self,
        name: impl Into<String>,
        accessor: impl Fn(&ObservableProxy<T>) -> Result<Value> + 'static,
    ) -> Self {
        let accessor: Accessor<T> = Rc::new(accessor);
        self.entries.insert(name.into(), Computed::Accessor(accessor));
        self
    }

    /// Add a parameterized computation
    pub fn function(
        mut self,
        name: impl Into<String>,
        function: impl Fn(&ObservableProxy<T>, &[Value]) -> Result<Value> + 'static,
    ) -> Self {
        let function: Function<T> = Rc::new(function);
        self.entries.insert(name.into(), Computed::Function(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Computed<T>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: 'static> Default for ComputedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ComputedMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
