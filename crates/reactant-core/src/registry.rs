//! Named definitions
//!
//! A [`Registry`] owns the entity and collection definitions of an
//! application and hands them its [`EngineConfig`]. Each thread has a default
//! registry reached through [`with_registry`] and the
//! [`make_entity_definition`] / [`make_collection_definition`] shorthands.
//!
//! ```
//! use reactant_core::{bag, make_collection_definition, make_entity_definition, with_registry};
//!
//! let item = make_entity_definition("item", bag! { "qty" => 0 });
//! make_collection_definition("inventory", &item);
//!
//! let inventory = with_registry(|r| r.collection("inventory")).unwrap();
//! assert!(inventory.entity_definition().ptr_eq(&item));
//! # with_registry(|r| r.reset());
//! ```

use crate::{Collection, EngineConfig, Entity, Error, Result, ValueMap};
use indexmap::IndexMap;
use std::cell::RefCell;
use tracing::{debug, warn};

/// Entity and collection definitions by name
#[derive(Debug, Default)]
pub struct Registry {
    config: EngineConfig,
    entities: IndexMap<String, Entity>,
    collections: IndexMap<String, Collection>,
}

impl Registry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            entities: IndexMap::new(),
            collections: IndexMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the config given to definitions made from now on
    pub fn configure(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Create and register an entity definition. A definition already
    /// registered under `name` is replaced.
    pub fn make_entity_definition(&mut self, name: impl Into<String>, values: ValueMap) -> Entity {
        let name = name.into();
        let entity = Entity::definition(name.clone(), values, self.config.clone());
        if self.entities.insert(name.clone(), entity.clone()).is_some() {
            warn!(entity = %name, "replacing entity definition");
        } else {
            debug!(entity = %name, "entity definition registered");
        }
        entity
    }

    /// Create and register a collection definition. A definition already
    /// registered under `name` is replaced.
    pub fn make_collection_definition(&mut self, name: impl Into<String>, entity_definition: &Entity) -> Collection {
        let name = name.into();
        let collection = Collection::definition(name.clone(), entity_definition, self.config.clone());
        if self.collections.insert(name.clone(), collection.clone()).is_some() {
            warn!(collection = %name, "replacing collection definition");
        } else {
            debug!(collection = %name, "collection definition registered");
        }
        collection
    }

    pub fn entity(&self, name: &str) -> Result<Entity> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DefinitionNotFound(name.to_string()))
    }

    pub fn collection(&self, name: &str) -> Result<Collection> {
        self.collections
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DefinitionNotFound(name.to_string()))
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Drop every definition and restore the default config
    pub fn reset(&mut self) {
        debug!(
            entities = self.entities.len(),
            collections = self.collections.len(),
            "registry reset"
        );
        self.entities.clear();
        self.collections.clear();
        self.config = EngineConfig::default();
    }
}

thread_local! {
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry::default());
}

/// Run `f` against this thread's default registry.
///
/// `f` must not call back into `with_registry`.
pub fn with_registry<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    REGISTRY.with(|registry| f(&mut registry.borrow_mut()))
}

/// Create an entity definition in the default registry
pub fn make_entity_definition(name: impl Into<String>, values: ValueMap) -> Entity {
    with_registry(|registry| registry.make_entity_definition(name, values))
}

/// Create a collection definition in the default registry
pub fn make_collection_definition(name: impl Into<String>, entity_definition: &Entity) -> Collection {
    with_registry(|registry| registry.make_collection_definition(name, entity_definition))
}
