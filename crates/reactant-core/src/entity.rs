//! Entities: identity-bearing, deeply observable records
//!
//! An [`Entity`] owns a deep value proxy, its listener list and a lifecycle.
//! A definition entity is the template: its computed and action maps are
//! shared with every instance stamped from it through
//! [`Entity::new_instance`], while each instance owns its own storage and
//! listeners.

use crate::lifecycle::{run_initializer, Initialize, Lifecycle};
use crate::{
    ActionMap, Completion, ComputedMap, EngineConfig, EntityValues, Field, Invocation,
    ListenerList, ListenerRef, Notification, Observer, Result, Value, ValueMap,
};
use futures::FutureExt;
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Computed map of an entity
pub type EntityComputed = ComputedMap<Field>;

/// Action map of an entity
pub type EntityActions = ActionMap<Field>;

struct EntityInner {
    name: String,
    values: EntityValues,
    listeners: ListenerList,
    lifecycle: Lifecycle,
    /// A write landed while notifications were suppressed
    stale: Cell<bool>,
    /// Initial values of the definition, used when an instance is stamped
    /// without values of its own
    template: Rc<ValueMap>,
    origin: Option<Weak<EntityInner>>,
    config: EngineConfig,
}

impl EntityInner {
    fn notify_listeners(&self, standalone: bool) -> Result<()> {
        if !self.lifecycle.is_initialized() {
            trace!(entity = %self.name, "not initialized, notification suppressed");
            self.stale.set(true);
            return Ok(());
        }
        let payload = Notification::Values(self.values.snapshot());
        for listener in self.listeners.snapshot() {
            if standalone && listener.is_silent() {
                continue;
            }
            listener.deliver(&payload)?;
        }
        Ok(())
    }
}

impl Observer for EntityInner {
    fn notify(&self) -> Result<()> {
        self.notify_listeners(false)
    }

    fn action_started(&self, action: &str, completion: &Completion) {
        if self.lifecycle.is_initialized() {
            self.listeners.announce(action, completion);
        }
    }
}

impl Initialize for EntityInner {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Writes swallowed before initialization also reach silent listeners,
    /// so a containing collection refreshes its computations.
    fn initialized(&self) -> Result<()> {
        let standalone = !self.stale.replace(false);
        self.notify_listeners(standalone)
    }
}

/// Handle to one entity; clones share the entity
#[derive(Clone)]
pub struct Entity {
    inner: Rc<EntityInner>,
}

impl Entity {
    /// Create a definition entity
    pub fn definition(name: impl Into<String>, values: ValueMap, config: EngineConfig) -> Self {
        let template = Rc::new(values.clone());
        Self::build(name.into(), values, template, None, config)
    }

    fn build(
        name: String,
        values: ValueMap,
        template: Rc<ValueMap>,
        origin: Option<Weak<EntityInner>>,
        config: EngineConfig,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<EntityInner>| {
            let owner: Weak<dyn Observer> = weak.clone();
            EntityInner {
                values: EntityValues::deep(values, config.clone(), owner),
                name,
                listeners: ListenerList::new(),
                lifecycle: Lifecycle::new(),
                stale: Cell::new(false),
                template,
                origin,
                config,
            }
        });
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The live value proxy
    pub fn values(&self) -> &EntityValues {
        &self.inner.values
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The definition this instance was stamped from
    pub fn origin(&self) -> Option<Entity> {
        self.inner
            .origin
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Entity { inner })
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lifecycle.is_initialized()
    }

    /// Install the computed map (last call wins)
    pub fn computed(&self, map: EntityComputed) -> &Self {
        self.inner.values.computed(map);
        self
    }

    /// Install the action map (last call wins)
    pub fn actions(&self, map: EntityActions) -> &Self {
        self.inner.values.actions(map);
        self
    }

    /// Evaluate a computed entry
    pub fn compute(&self, name: &str, arguments: &[Value]) -> Result<Value> {
        self.inner.values.compute(name, arguments)
    }

    /// Invoke an action on this entity's values
    pub fn invoke(&self, action: &str, arguments: impl Into<Vec<Value>>) -> Result<Invocation> {
        self.inner.values.invoke(action, arguments)
    }

    /// Add a listener. When initialized, a non-silent listener immediately
    /// receives the current values. Registering twice is a no-op.
    pub fn register(&self, listener: &ListenerRef) -> Result<()> {
        if !self.inner.listeners.add(listener) {
            return Ok(());
        }
        if self.is_initialized() && !listener.is_silent() {
            listener.deliver(&Notification::Values(self.inner.values.snapshot()))?;
        }
        Ok(())
    }

    /// Remove a listener by identity. Returns false if it was not registered.
    pub fn unregister(&self, listener: &ListenerRef) -> bool {
        self.inner.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Deliver the current values. `standalone` skips silent listeners.
    pub fn notify(&self, standalone: bool) -> Result<()> {
        self.inner.notify_listeners(standalone)
    }

    /// Mark initialized and notify non-silent listeners. Silent listeners
    /// are notified too when writes were suppressed before this call.
    pub fn init(&self) -> Result<()> {
        self.inner.lifecycle.mark_initialized();
        debug!(entity = %self.inner.name, "initialized");
        self.inner.initialized()
    }

    /// Suppress notifications while `initializer` hydrates the values, then
    /// mark initialized and notify non-silent listeners.
    pub fn init_with<F, Fut>(&self, initializer: F) -> Result<Completion>
    where
        F: FnOnce(EntityValues) -> Fut,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let task = initializer(self.inner.values.clone()).boxed_local();
        run_initializer(
            &self.inner,
            format!("{}::init", self.inner.name),
            &self.inner.config,
            task,
        )
    }

    /// Stamp a fresh instance sharing this entity's computed and action maps.
    ///
    /// `values` defaults to this definition's initial values. `listener` is
    /// registered before the instance initializes; a containing collection
    /// passes its silent computation-refresh listener here.
    pub fn new_instance(&self, values: Option<ValueMap>, listener: Option<&ListenerRef>) -> Result<Entity> {
        let values = values.unwrap_or_else(|| self.inner.template.as_ref().clone());
        let instance = Entity::build(
            self.inner.name.clone(),
            values,
            Rc::clone(&self.inner.template),
            Some(Rc::downgrade(&self.inner)),
            self.inner.config.clone(),
        );
        if let Some(listener) = listener {
            // init below delivers the first notification
            instance.inner.listeners.add(listener);
        }
        if let Some(computed) = self.inner.values.computed_map() {
            instance.inner.values.install_computed(computed);
        }
        if let Some(actions) = self.inner.values.action_map() {
            instance.inner.values.install_actions(actions);
        }
        instance.init()?;
        debug!(entity = %self.inner.name, "instance created");
        Ok(instance)
    }

    /// Check if both handles point at the same entity
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.inner.name)
            .field("values", &self.inner.values.snapshot())
            .field("initialized", &self.is_initialized())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}
