//! Reactant Core - observable value bags for UI state
//!
//! This crate provides the state layer a UI binding sits on:
//! - Dynamic value types (`Value`, `ValueMap`)
//! - `ObservableProxy`, a keyed bag that reports every write to its owner
//! - Computed maps (memoized accessors and parameterized functions)
//! - Batched, single-flight actions with a deferred-invocation queue
//! - Entities with deep observation of nested maps
//! - Collections with key-set and computation listeners
//! - A per-thread registry of named definitions
//!
//! ## Listeners
//!
//! A listener is a values callback plus an optional action hook. It may be
//! `silent` (skipped by standalone notifications) and may carry a
//! `ComputationInfo`, in which case a collection delivers the named
//! computation's value instead of its key set.
//!
//! ## Async
//!
//! Action bodies and initializers are futures. They start on the caller's
//! stack; a body that suspends is finished on the `Executor` set in the
//! `EngineConfig`:
//! ```ignore
//! let pool = futures::executor::LocalPool::new();
//! let config = EngineConfig::default().with_executor(Executor::new(pool.spawner()));
//! ```

pub mod action;
mod collection;
mod completion;
pub mod computed;
mod config;
pub mod deep;
mod entity;
mod error;
mod exec;
mod lifecycle;
mod listener;
pub mod proxy;
mod registry;
mod value;

pub use action::{ActionBody, ActionFuture, ActionMap, ActionState, DeferredAction, Invocation};
pub use collection::{Collection, CollectionActions, CollectionComputed, CollectionValues};
pub use completion::{Completion, Outcome};
pub use computed::{Computed, ComputedMap};
pub use config::{EngineConfig, Executor, FailurePolicy, ReplayOrder};
pub use deep::{BagId, EntityValues, Field, NestedBag};
pub use entity::{Entity, EntityActions, EntityComputed};
pub use error::{Error, Result};
pub use listener::{ComputationInfo, Listener, ListenerList, ListenerRef, Notification};
pub use proxy::{is_reserved, ControlKey, ObservableProxy, Observer, RESERVED_KEYS};
pub use registry::{make_collection_definition, make_entity_definition, with_registry, Registry};
pub use value::{Value, ValueMap};
