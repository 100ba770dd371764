//! Deep observation of entity value trees
//!
//! An entity's bag holds [`Field`]s. Every map value is wrapped in a
//! [`NestedBag`], a plain observable with no computed or action support,
//! whose writes travel to the root proxy's write path. Lists stay opaque
//! values: replacing one is observed, there is no in-place edit.
//!
//! A nested bag that is replaced or removed is detached: its handles stay
//! readable and writable, but writes no longer reach the entity.
//!
//! `Value` trees are owned data, so wrapping can never meet a cycle.

use crate::proxy::{is_reserved, ProxyInner, WriteSink};
use crate::{EngineConfig, Error, ObservableProxy, Observer, Result, Value, ValueMap};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BAG_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a nested bag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BagId(u64);

impl BagId {
    fn next() -> Self {
        Self(NEXT_BAG_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bag:{}", self.0)
    }
}

/// One slot of an entity bag
#[derive(Debug, Clone)]
pub enum Field {
    /// Scalar, null or list
    Value(Value),
    /// Observable map
    Nested(NestedBag),
}

impl Field {
    /// Wrap `value`, turning every map at any depth into a nested bag that
    /// reports to `root`
    pub(crate) fn wrap(value: Value, root: &Weak<dyn WriteSink>) -> Self {
        match value {
            Value::Map(map) => Field::Nested(NestedBag::new(map, root)),
            other => Field::Value(other),
        }
    }

    /// Plain snapshot of this field
    pub fn to_value(&self) -> Value {
        match self {
            Field::Value(value) => value.clone(),
            Field::Nested(bag) => Value::Map(bag.snapshot()),
        }
    }

    pub fn as_nested(&self) -> Option<&NestedBag> {
        match self {
            Field::Nested(bag) => Some(bag),
            Field::Value(_) => None,
        }
    }

    fn detach(&self) {
        if let Field::Nested(bag) = self {
            bag.detach();
        }
    }
}

fn detached_root() -> Weak<dyn WriteSink> {
    let root: Weak<dyn WriteSink> = Weak::<ProxyInner<Field>>::new();
    root
}

fn wrap_all(map: ValueMap, root: &Weak<dyn WriteSink>) -> IndexMap<String, Field> {
    map.into_iter()
        .map(|(key, value)| (key, Field::wrap(value, root)))
        .collect()
}

fn snapshot_of(fields: &IndexMap<String, Field>) -> ValueMap {
    fields
        .iter()
        .map(|(key, field)| (key.clone(), field.to_value()))
        .collect()
}

struct NestedInner {
    id: BagId,
    fields: RefCell<IndexMap<String, Field>>,
    root: RefCell<Weak<dyn WriteSink>>,
}

/// Plain observable map inside an entity bag
#[derive(Clone)]
pub struct NestedBag {
    inner: Rc<NestedInner>,
}

impl NestedBag {
    fn new(map: ValueMap, root: &Weak<dyn WriteSink>) -> Self {
        Self {
            inner: Rc::new(NestedInner {
                id: BagId::next(),
                fields: RefCell::new(wrap_all(map, root)),
                root: RefCell::new(root.clone()),
            }),
        }
    }

    pub fn id(&self) -> BagId {
        self.inner.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.fields.borrow().get(key).map(Field::to_value)
    }

    /// Live handle to a nested map below this one
    pub fn nested(&self, key: &str) -> Option<NestedBag> {
        self.inner
            .fields
            .borrow()
            .get(key)
            .and_then(Field::as_nested)
            .cloned()
    }

    /// Write a field; the root entity is notified unless an action is running
    /// or this bag is detached
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let field = Field::wrap(value.into(), &self.inner.root.borrow());
        let replaced = self.inner.fields.borrow_mut().insert(key.into(), field);
        if let Some(old) = replaced {
            old.detach();
        }
        self.written()
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        let removed = self.inner.fields.borrow_mut().shift_remove(key);
        match removed {
            Some(field) => {
                field.detach();
                self.written()?;
                Ok(Some(field.to_value()))
            }
            None => Ok(None),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fields.borrow().is_empty()
    }

    pub fn snapshot(&self) -> ValueMap {
        snapshot_of(&self.inner.fields.borrow())
    }

    /// Check if writes still reach an entity
    pub fn is_attached(&self) -> bool {
        self.inner.root.borrow().strong_count() > 0
    }

    fn detach(&self) {
        *self.inner.root.borrow_mut() = detached_root();
        for field in self.inner.fields.borrow().values() {
            field.detach();
        }
    }

    fn written(&self) -> Result<()> {
        let root = self.inner.root.borrow().upgrade();
        match root {
            Some(root) => root.written(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for NestedBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedBag")
            .field("id", &self.inner.id)
            .field("fields", &self.snapshot())
            .finish()
    }
}

/// Value proxy of an entity
pub type EntityValues = ObservableProxy<Field>;

impl ObservableProxy<Field> {
    /// Wrap a value tree; maps at any depth become nested bags
    pub fn deep(values: ValueMap, config: EngineConfig, owner: Weak<dyn Observer>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ProxyInner<Field>>| {
            let sink: Weak<dyn WriteSink> = weak.clone();
            ProxyInner::new(wrap_all(values, &sink), config, owner)
        });
        Self::from_inner(inner)
    }

    /// Snapshot of one field
    pub fn get(&self, key: &str) -> Option<Value> {
        self.slot(key).map(|field| field.to_value())
    }

    /// Snapshot of one field, or `PropertyNotFound`
    pub fn require(&self, key: &str) -> Result<Value> {
        self.get(key)
            .ok_or_else(|| Error::PropertyNotFound(key.to_string()))
    }

    pub fn require_int(&self, key: &str) -> Result<i64> {
        let value = self.require(key)?;
        value.as_int().ok_or_else(|| Error::TypeError {
            expected: "int".to_string(),
            got: value.type_name().to_string(),
        })
    }

    /// Live handle to a nested map
    pub fn nested(&self, key: &str) -> Option<NestedBag> {
        match self.slot(key) {
            Some(Field::Nested(bag)) => Some(bag),
            _ => None,
        }
    }

    /// Write a field, wrapping maps for deep observation. A nested bag
    /// previously stored under `key` is detached.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        if !is_reserved(&key) {
            if let Some(old) = self.slot(&key) {
                old.detach();
            }
        }
        let field = Field::wrap(value.into(), &self.sink());
        self.write(key, field)
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        let removed = self.delete(key)?;
        if let Some(field) = &removed {
            field.detach();
        }
        Ok(removed.map(|field| field.to_value()))
    }

    /// Full plain snapshot of the bag
    pub fn snapshot(&self) -> ValueMap {
        self.slots()
            .into_iter()
            .map(|(key, field)| (key, field.to_value()))
            .collect()
    }
}
