//! Collections: keyed sets of entities
//!
//! A [`Collection`] keeps its entities in an `ObservableProxy<Entity>` keyed
//! by identity. Raw listeners receive the key set, or the value of a named
//! computation when they carry a [`ComputationInfo`](crate::ComputationInfo).
//! Computation listeners are refreshed whenever a contained entity changes,
//! through a silent relay listener the collection registers on every entity
//! it holds.

use crate::lifecycle::{run_initializer, Initialize, Lifecycle};
use crate::{
    ActionMap, Completion, ComputedMap, EngineConfig, Entity, Error, Invocation, Listener,
    ListenerList, ListenerRef, Notification, ObservableProxy, Observer, Result, Value, ValueMap,
};
use futures::FutureExt;
use indexmap::IndexMap;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Computed map of a collection
pub type CollectionComputed = ComputedMap<Entity>;

/// Action map of a collection
pub type CollectionActions = ActionMap<Entity>;

/// Value proxy of a collection: entity id -> entity
pub type CollectionValues = ObservableProxy<Entity>;

impl ObservableProxy<Entity> {
    /// Entity stored under `id`
    pub fn get(&self, id: &str) -> Option<Entity> {
        self.slot(id)
    }

    /// Store `entity` under `id`.
    ///
    /// Unlike [`Collection::insert`] this does not wire the entity into the
    /// collection's computation refresh.
    pub fn insert(&self, id: impl Into<String>, entity: Entity) -> Result<()> {
        self.write(id, entity)
    }

    pub fn remove(&self, id: &str) -> Result<Option<Entity>> {
        self.delete(id)
    }

    /// Every entity, in insertion order
    pub fn entities(&self) -> Vec<Entity> {
        self.slots().into_iter().map(|(_, entity)| entity).collect()
    }

    /// Every entity id, in insertion order
    pub fn ids(&self) -> Vec<String> {
        self.keys()
    }
}

struct CollectionInner {
    name: String,
    values: CollectionValues,
    entity_definition: Entity,
    listeners: ListenerList,
    computation_listeners: ListenerList,
    lifecycle: Lifecycle,
    /// Silent listener registered on every held entity
    relay: ListenerRef,
    config: EngineConfig,
}

impl CollectionInner {
    fn payload_for(&self, listener: &Listener) -> Result<Notification> {
        match listener.computation() {
            Some(info) => {
                let value = self
                    .values
                    .compute(&info.computation_name, &info.arguments)?;
                Ok(Notification::Computed(value))
            }
            None => Ok(Notification::Keys(self.values.ids())),
        }
    }

    fn notify_listeners(&self, standalone: bool) -> Result<()> {
        if !self.lifecycle.is_initialized() {
            trace!(collection = %self.name, "not initialized, notification suppressed");
            return Ok(());
        }
        for listener in self.listeners.snapshot() {
            if standalone && listener.is_silent() {
                continue;
            }
            let payload = self.payload_for(&listener)?;
            listener.deliver(&payload)?;
        }
        Ok(())
    }

    fn notify_computations(&self) -> Result<()> {
        // an entity changed underneath the bag, so cached accessors are stale
        self.values.invalidate_computed();
        if !self.lifecycle.is_initialized() {
            return Ok(());
        }
        for listener in self.computation_listeners.snapshot() {
            if listener.computation().is_none() {
                continue;
            }
            let payload = self.payload_for(&listener)?;
            listener.deliver(&payload)?;
        }
        Ok(())
    }
}

impl Observer for CollectionInner {
    fn notify(&self) -> Result<()> {
        self.notify_listeners(false)?;
        self.notify_computations()
    }

    fn action_started(&self, action: &str, completion: &Completion) {
        if self.lifecycle.is_initialized() {
            self.listeners.announce(action, completion);
        }
    }
}

impl Initialize for CollectionInner {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn initialized(&self) -> Result<()> {
        self.notify_listeners(true)?;
        self.notify_computations()
    }
}

/// Handle to one collection; clones share the collection
#[derive(Clone)]
pub struct Collection {
    inner: Rc<CollectionInner>,
}

impl Collection {
    /// Create an empty collection of `entity_definition` instances
    pub fn definition(name: impl Into<String>, entity_definition: &Entity, config: EngineConfig) -> Self {
        let name = name.into();
        let inner = Rc::new_cyclic(|weak: &Weak<CollectionInner>| {
            let owner: Weak<dyn Observer> = weak.clone();
            let target = weak.clone();
            let relay = Listener::fallible(move |_| match target.upgrade() {
                Some(collection) => collection.notify_computations(),
                None => Ok(()),
            })
            .silent()
            .into_ref();
            CollectionInner {
                values: ObservableProxy::new(IndexMap::new(), config.clone(), owner),
                name,
                entity_definition: entity_definition.clone(),
                listeners: ListenerList::new(),
                computation_listeners: ListenerList::new(),
                lifecycle: Lifecycle::new(),
                relay,
                config,
            }
        });
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The live entity proxy
    pub fn values(&self) -> &CollectionValues {
        &self.inner.values
    }

    /// The definition new entities are stamped from
    pub fn entity_definition(&self) -> &Entity {
        &self.inner.entity_definition
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lifecycle.is_initialized()
    }

    /// Install the computed map (last call wins)
    pub fn computed(&self, map: CollectionComputed) -> &Self {
        self.inner.values.computed(map);
        self
    }

    /// Install the action map (last call wins)
    pub fn actions(&self, map: CollectionActions) -> &Self {
        self.inner.values.actions(map);
        self
    }

    pub fn compute(&self, name: &str, arguments: &[Value]) -> Result<Value> {
        self.inner.values.compute(name, arguments)
    }

    pub fn invoke(&self, action: &str, arguments: impl Into<Vec<Value>>) -> Result<Invocation> {
        self.inner.values.invoke(action, arguments)
    }

    /// Add a raw listener. When initialized, a non-silent listener
    /// immediately receives the key set, or its computation's value.
    pub fn register(&self, listener: &ListenerRef) -> Result<()> {
        if !self.inner.listeners.add(listener) {
            return Ok(());
        }
        if self.is_initialized() && !listener.is_silent() {
            let payload = self.inner.payload_for(listener)?;
            listener.deliver(&payload)?;
        }
        Ok(())
    }

    pub fn unregister(&self, listener: &ListenerRef) -> bool {
        self.inner.listeners.remove(listener)
    }

    /// Add a computation listener, refreshed on every entity change. When
    /// initialized it immediately receives the computation's value.
    pub fn register_computation(&self, listener: &ListenerRef) -> Result<()> {
        if !self.inner.computation_listeners.add(listener) {
            return Ok(());
        }
        if listener.computation().is_none() {
            debug!(collection = %self.inner.name, "computation listener without computation info");
            return Ok(());
        }
        if self.is_initialized() {
            let payload = self.inner.payload_for(listener)?;
            listener.deliver(&payload)?;
        }
        Ok(())
    }

    pub fn unregister_computation(&self, listener: &ListenerRef) -> bool {
        self.inner.computation_listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn computation_listener_count(&self) -> usize {
        self.inner.computation_listeners.len()
    }

    /// Register `listener` directly on the entity stored under `id`
    pub fn register_with_entity(&self, id: &str, listener: &ListenerRef) -> Result<()> {
        self.entity(id)?.register(listener)
    }

    /// Unregister `listener` from the entity stored under `id`
    pub fn unregister_with_entity(&self, id: &str, listener: &ListenerRef) -> Result<bool> {
        Ok(self.entity(id)?.unregister(listener))
    }

    /// Deliver the key set and computations to raw listeners, then refresh
    /// computation listeners. `standalone` skips silent raw listeners.
    pub fn notify(&self, standalone: bool) -> Result<()> {
        self.inner.notify_listeners(standalone)?;
        self.inner.notify_computations()
    }

    /// Recompute and deliver to computation listeners only
    pub fn notify_computations(&self) -> Result<()> {
        self.inner.notify_computations()
    }

    /// Stamp a new entity from the definition and insert it under its
    /// identity field.
    pub fn create(&self, values: ValueMap) -> Result<Entity> {
        let key = self.inner.config.identity_key();
        let id = values
            .get(key)
            .and_then(Value::as_key)
            .ok_or_else(|| Error::MissingIdentity { key: key.to_string() })?;
        let entity = self
            .inner
            .entity_definition
            .new_instance(Some(values), Some(&self.inner.relay))?;
        debug!(collection = %self.inner.name, id = %id, "entity created");
        self.insert(id, entity.clone())?;
        Ok(entity)
    }

    /// Store an entity under `id`; its changes refresh this collection's
    /// computations from now on. An entity previously stored under `id` is
    /// detached.
    pub fn insert(&self, id: impl Into<String>, entity: Entity) -> Result<()> {
        let id = id.into();
        entity.register(&self.inner.relay)?;
        let displaced = self.inner.values.get(&id).filter(|old| !old.ptr_eq(&entity));
        if let Some(old) = &displaced {
            old.unregister(&self.inner.relay);
            debug!(collection = %self.inner.name, id = %id, "entity replaced");
        }
        self.inner.values.insert(id, entity)
    }

    /// Remove the entity stored under `id`
    pub fn remove(&self, id: &str) -> Result<Option<Entity>> {
        let removed = self.inner.values.remove(id)?;
        if let Some(entity) = &removed {
            entity.unregister(&self.inner.relay);
        }
        Ok(removed)
    }

    /// Entity stored under `id`
    pub fn entity(&self, id: &str) -> Result<Entity> {
        self.inner
            .values
            .get(id)
            .ok_or_else(|| Error::EntityNotFound(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.values.ids()
    }

    pub fn len(&self) -> usize {
        self.inner.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.values.is_empty()
    }

    /// Mark initialized and notify
    pub fn init(&self) -> Result<()> {
        self.inner.lifecycle.mark_initialized();
        debug!(collection = %self.inner.name, "initialized");
        self.inner.initialized()
    }

    /// Suppress notifications while `initializer` fills the collection, then
    /// mark initialized and notify.
    pub fn init_with<F, Fut>(&self, initializer: F) -> Result<Completion>
    where
        F: FnOnce(Collection) -> Fut,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let task = initializer(self.clone()).boxed_local();
        run_initializer(
            &self.inner,
            format!("{}::init", self.inner.name),
            &self.inner.config,
            task,
        )
    }

    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("ids", &self.ids())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
