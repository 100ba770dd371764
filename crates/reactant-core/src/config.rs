//! Engine configuration - memoization, deferred replay and executor settings
//!
//! Every definition carries an [`EngineConfig`]; instances stamped from a
//! definition inherit it. The serializable part can be loaded from RON.

use crate::{Error, Result};
use futures::task::{LocalSpawn, LocalSpawnExt, SpawnError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

/// Order in which deferred action invocations are replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReplayOrder {
    /// Most recently deferred first
    #[default]
    Lifo,
    /// Oldest deferral first
    Fifo,
}

/// What happens to queued actions when an action body fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FailurePolicy {
    /// Keep replaying the deferred queue after a failure
    #[default]
    Drain,
    /// Drop every queued invocation after a failure
    Discard,
}

/// Local spawner used to finish actions and initializers that suspend
///
/// Wraps any [`LocalSpawn`] implementation, typically the spawner of a
/// `futures::executor::LocalPool`.
#[derive(Clone, Default)]
pub struct Executor(Option<Rc<dyn LocalSpawn>>);

impl Executor {
    /// Use the given spawner
    pub fn new(spawner: impl LocalSpawn + 'static) -> Self {
        let spawner: Rc<dyn LocalSpawn> = Rc::new(spawner);
        Self(Some(spawner))
    }

    /// No executor: suspending tasks fail with [`Error::NoExecutor`]
    pub fn none() -> Self {
        Self(None)
    }

    /// Check if a spawner is configured
    pub fn is_available(&self) -> bool {
        self.0.is_some()
    }

    /// Spawn a task. Returns `Ok(false)` when no spawner is configured.
    pub(crate) fn spawn(
        &self,
        task: impl Future<Output = ()> + 'static,
    ) -> std::result::Result<bool, SpawnError> {
        match &self.0 {
            Some(spawner) => spawner.spawn_local(task).map(|()| true),
            None => Ok(false),
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "Executor(local)"),
            None => write!(f, "Executor(none)"),
        }
    }
}

/// Configuration shared by a definition and every instance stamped from it
///
/// # Example
///
/// ```
/// use reactant_core::{EngineConfig, ReplayOrder};
///
/// let config = EngineConfig::default().with_replay_order(ReplayOrder::Fifo);
/// assert!(config.memoize_computed());
/// assert_eq!(config.replay_order(), ReplayOrder::Fifo);
/// assert_eq!(config.identity_key(), "id");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cache zero-argument computed accessors until the next write
    memoize_computed: bool,
    /// Deferred action replay order
    replay_order: ReplayOrder,
    /// Deferred queue handling after an action failure
    failure_policy: FailurePolicy,
    /// Field a collection reads an entity's identity from
    identity_key: String,
    /// Spawner for suspended tasks (never serialized)
    #[serde(skip)]
    executor: Executor,
}

impl EngineConfig {
    /// Load the serializable settings from RON
    ///
    /// ```
    /// use reactant_core::{EngineConfig, FailurePolicy};
    ///
    /// let config = EngineConfig::from_ron("(failure_policy: Discard)").unwrap();
    /// assert_eq!(config.failure_policy(), FailurePolicy::Discard);
    /// assert!(config.memoize_computed());
    /// ```
    pub fn from_ron(source: &str) -> Result<Self> {
        ron::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize the settings to RON
    pub fn to_ron(&self) -> Result<String> {
        ron::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Enable or disable computed accessor memoization
    pub fn with_memoize_computed(mut self, memoize: bool) -> Self {
        self.memoize_computed = memoize;
        self
    }

    /// Set the deferred replay order
    pub fn with_replay_order(mut self, order: ReplayOrder) -> Self {
        self.replay_order = order;
        self
    }

    /// Set the failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the identity field name
    pub fn with_identity_key(mut self, key: impl Into<String>) -> Self {
        self.identity_key = key.into();
        self
    }

    /// Set the executor for suspending actions and initializers
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    pub fn memoize_computed(&self) -> bool {
        self.memoize_computed
    }

    pub fn replay_order(&self) -> ReplayOrder {
        self.replay_order
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn identity_key(&self) -> &str {
        &self.identity_key
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memoize_computed: true,
            replay_order: ReplayOrder::Lifo,
            failure_policy: FailurePolicy::Drain,
            identity_key: "id".to_string(),
            executor: Executor::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::LocalPool;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.memoize_computed());
        assert_eq!(config.replay_order(), ReplayOrder::Lifo);
        assert_eq!(config.failure_policy(), FailurePolicy::Drain);
        assert!(!config.executor().is_available());
    }

    #[test]
    fn test_ron_roundtrip_skips_executor() {
        let pool = LocalPool::new();
        let config = EngineConfig::default()
            .with_identity_key("sku")
            .with_memoize_computed(false)
            .with_executor(Executor::new(pool.spawner()));

        let text = config.to_ron().unwrap();
        let loaded = EngineConfig::from_ron(&text).unwrap();
        assert_eq!(loaded.identity_key(), "sku");
        assert!(!loaded.memoize_computed());
        assert!(!loaded.executor().is_available());
    }

    #[test]
    fn test_invalid_ron() {
        let err = EngineConfig::from_ron("(replay_order: Sideways)").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_spawn_without_executor() {
        let spawned = Executor::none().spawn(async {}).unwrap();
        assert!(!spawned);
    }
}
