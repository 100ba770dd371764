//! Observable proxy over a keyed bag
//!
//! `ObservableProxy<T>` owns a bag of `T` slots and reports every write to
//! its owning [`Observer`]. It also carries the computed and action maps and
//! runs the single-flight action protocol described in [`crate::action`].
//!
//! Entities use `ObservableProxy<Field>` (see [`crate::deep`]); collections
//! use `ObservableProxy<Entity>`.

use crate::action::{ActionBody, ActionFuture, ActionMachine, DeferredAction};
use crate::completion::Settle;
use crate::config::FailurePolicy;
use crate::exec::{poll_once, Polled};
use crate::{
    ActionMap, ActionState, Completion, Computed, ComputedMap, EngineConfig, Error, Invocation,
    Result, Value,
};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

/// The construct that owns a proxy and fans its changes out to listeners
pub trait Observer {
    /// A write (or the end of an action chain) changed the bag
    fn notify(&self) -> Result<()>;

    /// An action started; `completion` settles when its body does
    fn action_started(&self, action: &str, completion: &Completion);
}

/// Receives writes made below the root of a bag (nested bags)
pub(crate) trait WriteSink {
    fn written(&self) -> Result<()>;
}

/// Write-only signalling keys. Writing one toggles the action state and
/// never touches the bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    /// Enter the "accessed by an action" state
    ActionStart,
    /// Leave it without notifying (a deferred action follows)
    ActionEnd,
    /// Leave it and fire the batched notification
    ActionEndNotify,
}

impl ControlKey {
    /// Recognize a control key by name
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "_actionStart" => Some(ControlKey::ActionStart),
            "_actionEnd" => Some(ControlKey::ActionEnd),
            "_actionEndNotify" => Some(ControlKey::ActionEndNotify),
            _ => None,
        }
    }

    /// Name written to trigger this signal
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKey::ActionStart => "_actionStart",
            ControlKey::ActionEnd => "_actionEnd",
            ControlKey::ActionEndNotify => "_actionEndNotify",
        }
    }
}

/// Names that are never stored in a bag nor listed among its keys
pub const RESERVED_KEYS: &[&str] = &[
    "computed",
    "actions",
    "init",
    "create",
    "getDefinition",
    "_definitionComputations",
    "_definitionActions",
];

/// Check if `key` is a reserved method, definition-pointer or control name
pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key) || ControlKey::parse(key).is_some()
}

/// Result of starting one action body
enum Launched {
    /// The body settled on the caller's stack
    Settled { failed: bool },
    /// The body suspended and was handed to the executor
    Suspended,
}

pub(crate) struct ProxyInner<T> {
    bag: RefCell<IndexMap<String, T>>,
    owner: Weak<dyn Observer>,
    computed: RefCell<Option<Rc<ComputedMap<T>>>>,
    cache: RefCell<HashMap<String, Value>>,
    actions: RefCell<Option<Rc<ActionMap<T>>>>,
    machine: RefCell<ActionMachine>,
    config: EngineConfig,
}

impl<T> ProxyInner<T> {
    pub(crate) fn new(bag: IndexMap<String, T>, config: EngineConfig, owner: Weak<dyn Observer>) -> Self {
        let bag = bag
            .into_iter()
            .filter(|(key, _)| {
                let reserved = is_reserved(key);
                if reserved {
                    warn!(key = %key, "dropping reserved key from initial values");
                }
                !reserved
            })
            .collect();
        Self {
            bag: RefCell::new(bag),
            owner,
            computed: RefCell::new(None),
            cache: RefCell::new(HashMap::new()),
            actions: RefCell::new(None),
            machine: RefCell::new(ActionMachine::new(config.replay_order())),
            config,
        }
    }

    fn notify_owner(&self) -> Result<()> {
        self.cache.borrow_mut().clear();
        match self.owner.upgrade() {
            Some(owner) => {
                trace!("notifying owner");
                owner.notify()
            }
            None => Ok(()),
        }
    }
}

impl<T> WriteSink for ProxyInner<T> {
    fn written(&self) -> Result<()> {
        self.cache.borrow_mut().clear();
        if self.machine.borrow().is_idle() {
            self.notify_owner()
        } else {
            trace!("write batched inside action");
            Ok(())
        }
    }
}

/// Observable keyed bag with computed values and batched actions
pub struct ObservableProxy<T> {
    inner: Rc<ProxyInner<T>>,
}

impl<T> Clone for ObservableProxy<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> ObservableProxy<T> {
    /// Wrap `bag`; writes are reported to `owner`
    pub fn new(bag: IndexMap<String, T>, config: EngineConfig, owner: Weak<dyn Observer>) -> Self {
        Self::from_inner(Rc::new(ProxyInner::new(bag, config, owner)))
    }

    pub(crate) fn from_inner(inner: Rc<ProxyInner<T>>) -> Self {
        Self { inner }
    }

    /// Weak handle used by nested bags to reach this proxy's write path
    pub(crate) fn sink(&self) -> Weak<dyn WriteSink> {
        let sink: Weak<dyn WriteSink> = Rc::<ProxyInner<T>>::downgrade(&self.inner);
        sink
    }

    /// Current keys in insertion order. Reserved names never appear.
    pub fn keys(&self) -> Vec<String> {
        self.inner.bag.borrow().keys().cloned().collect()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.inner.bag.borrow().len()
    }

    /// Check if the bag holds no keys
    pub fn is_empty(&self) -> bool {
        self.inner.bag.borrow().is_empty()
    }

    /// Check if `key` is stored
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.bag.borrow().contains_key(key)
    }

    /// Clone of the slot stored under `key`
    pub fn slot(&self, key: &str) -> Option<T> {
        self.inner.bag.borrow().get(key).cloned()
    }

    /// Clone of every slot, in key order
    pub fn slots(&self) -> Vec<(String, T)> {
        self.inner
            .bag
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Store `value` under `key`.
    ///
    /// Control keys are routed to [`signal`](Self::signal); other reserved
    /// names are ignored. Outside an action the owner is notified before
    /// this returns; inside one the write is batched. The write itself
    /// always lands; an error comes from the notification cycle.
    pub fn write(&self, key: impl Into<String>, value: T) -> Result<()> {
        let key = key.into();
        if let Some(control) = ControlKey::parse(&key) {
            return self.signal(control);
        }
        if is_reserved(&key) {
            warn!(key = %key, "ignoring write to reserved key");
            return Ok(());
        }
        self.inner.bag.borrow_mut().insert(key, value);
        self.inner.written()
    }

    /// Remove `key`, notifying like a write when something was removed
    pub fn delete(&self, key: &str) -> Result<Option<T>> {
        let removed = self.inner.bag.borrow_mut().shift_remove(key);
        if removed.is_some() {
            self.inner.written()?;
        }
        Ok(removed)
    }

    /// Write a control key
    pub fn signal(&self, control: ControlKey) -> Result<()> {
        trace!(control = control.as_str(), "control signal");
        match control {
            ControlKey::ActionStart => self.inner.machine.borrow_mut().begin(),
            ControlKey::ActionEnd => self.inner.machine.borrow_mut().release(),
            ControlKey::ActionEndNotify => {
                self.inner.machine.borrow_mut().finish();
                return self.inner.notify_owner();
            }
        }
        Ok(())
    }

    /// Install the computed map (last call wins)
    pub fn computed(&self, map: ComputedMap<T>) -> &Self {
        self.install_computed(Rc::new(map))
    }

    /// Install a shared computed map
    pub fn install_computed(&self, map: Rc<ComputedMap<T>>) -> &Self {
        *self.inner.computed.borrow_mut() = Some(map);
        self.invalidate_computed();
        self
    }

    /// The installed computed map, if any
    pub fn computed_map(&self) -> Option<Rc<ComputedMap<T>>> {
        self.inner.computed.borrow().clone()
    }

    /// Install the action map (last call wins)
    pub fn actions(&self, map: ActionMap<T>) -> &Self {
        self.install_actions(Rc::new(map))
    }

    /// Install a shared action map
    pub fn install_actions(&self, map: Rc<ActionMap<T>>) -> &Self {
        *self.inner.actions.borrow_mut() = Some(map);
        self
    }

    /// The installed action map, if any
    pub fn action_map(&self) -> Option<Rc<ActionMap<T>>> {
        self.inner.actions.borrow().clone()
    }

    /// Evaluate a computed entry.
    ///
    /// Accessors ignore `arguments` and are memoized when the config says
    /// so; functions are called fresh every time.
    pub fn compute(&self, name: &str, arguments: &[Value]) -> Result<Value> {
        let entry = self
            .inner
            .computed
            .borrow()
            .as_ref()
            .and_then(|map| map.get(name).cloned())
            .ok_or_else(|| Error::UnknownComputation(name.to_string()))?;

        match entry {
            Computed::Accessor(accessor) => {
                let memoize = self.inner.config.memoize_computed();
                if memoize {
                    if let Some(value) = self.inner.cache.borrow().get(name) {
                        return Ok(value.clone());
                    }
                }
                let value = accessor(self)?;
                if memoize {
                    self.inner
                        .cache
                        .borrow_mut()
                        .insert(name.to_string(), value.clone());
                }
                Ok(value)
            }
            Computed::Function(function) => function(self, arguments),
        }
    }

    /// Drop every memoized accessor value
    pub fn invalidate_computed(&self) {
        self.inner.cache.borrow_mut().clear();
    }

    /// Current state of the action machine
    pub fn action_state(&self) -> ActionState {
        self.inner.machine.borrow().state()
    }

    /// Check if an action chain is running or draining
    pub fn is_action_in_progress(&self) -> bool {
        !self.inner.machine.borrow().is_idle()
    }

    /// Number of queued invocations
    pub fn deferred_count(&self) -> usize {
        self.inner.machine.borrow().deferred_len()
    }

    /// Engine configuration this bag was built with
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Check if both handles point at the same bag
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Invoke an action.
    ///
    /// With no action in progress the body starts immediately, the owner's
    /// action hook receives the completion, and the call returns
    /// [`Invocation::Started`]. Otherwise the invocation is queued and
    /// replayed after the running chain settles.
    pub fn invoke(&self, name: &str, arguments: impl Into<Vec<Value>>) -> Result<Invocation> {
        let arguments = arguments.into();
        let body = self.action_body(name)?;
        self.invalidate_computed();
        {
            let mut machine = self.inner.machine.borrow_mut();
            if !machine.is_idle() {
                debug!(action = name, state = ?machine.state(), "action deferred");
                machine.defer(DeferredAction {
                    action: name.to_string(),
                    arguments,
                });
                return Ok(Invocation::Deferred);
            }
        }

        let (completion, launched) = self.launch(name.to_string(), body, arguments);
        if let Launched::Settled { failed } = launched {
            self.resume(failed)?;
        }
        Ok(Invocation::Started(completion))
    }

    fn action_body(&self, name: &str) -> Result<ActionBody<T>> {
        self.inner
            .actions
            .borrow()
            .as_ref()
            .and_then(|map| map.get(name).cloned())
            .ok_or_else(|| Error::UnknownAction(name.to_string()))
    }

    fn launch(&self, action: String, body: ActionBody<T>, arguments: Vec<Value>) -> (Completion, Launched) {
        self.inner.machine.borrow_mut().begin();
        debug!(action = %action, "action started");

        let (settle, completion) = Completion::channel(action.clone());
        let task = body(self, &arguments);
        if let Some(owner) = self.inner.owner.upgrade() {
            owner.action_started(&action, &completion);
        }

        let launched = match poll_once(task) {
            Polled::Ready(outcome) => {
                let failed = report(&action, &outcome);
                settle.send(outcome);
                Launched::Settled { failed }
            }
            Polled::Pending(task) => self.suspend(action, task, settle),
        };
        (completion, launched)
    }

    fn suspend(&self, action: String, task: ActionFuture, settle: Settle) -> Launched {
        let executor = self.inner.config.executor().clone();
        if !executor.is_available() {
            let err = Error::NoExecutor { task: action };
            warn!(error = %err, "action suspended without an executor");
            settle.send(Err(err));
            return Launched::Settled { failed: true };
        }

        let proxy = self.clone();
        let label = action.clone();
        let continuation = async move {
            let outcome = task.await;
            let failed = report(&label, &outcome);
            settle.send(outcome);
            if let Err(err) = proxy.resume(failed) {
                warn!(action = %label, error = %err, "notification after action failed");
            }
        };
        match executor.spawn(continuation) {
            Ok(_) => Launched::Suspended,
            Err(err) => {
                // the continuation was dropped, which cancels the completion
                warn!(action = %action, error = %err, "could not spawn action");
                Launched::Settled { failed: true }
            }
        }
    }

    /// Replay deferred invocations until the queue is empty or a body
    /// suspends, then fire the batched notification.
    fn resume(&self, mut failed: bool) -> Result<()> {
        loop {
            let next = {
                let mut machine = self.inner.machine.borrow_mut();
                if failed && self.inner.config.failure_policy() == FailurePolicy::Discard {
                    let dropped = machine.discard();
                    if !dropped.is_empty() {
                        warn!(count = dropped.len(), "discarding deferred actions after failure");
                    }
                }
                machine.next_deferred()
            };

            let Some(deferred) = next else {
                debug!("action chain settled");
                return self.signal(ControlKey::ActionEndNotify);
            };
            self.signal(ControlKey::ActionEnd)?;

            let body = match self.action_body(&deferred.action) {
                Ok(body) => body,
                Err(err) => {
                    warn!(error = %err, "skipping deferred action");
                    failed = false;
                    continue;
                }
            };
            debug!(action = %deferred.action, "replaying deferred action");
            match self.launch(deferred.action, body, deferred.arguments) {
                (_, Launched::Settled { failed: f }) => failed = f,
                (_, Launched::Suspended) => return Ok(()),
            }
        }
    }
}

/// Log an action outcome; returns true on failure
fn report(action: &str, outcome: &Result<()>) -> bool {
    match outcome {
        Ok(()) => {
            debug!(action, "action settled");
            false
        }
        Err(err) => {
            warn!(action, error = %err, "action failed");
            true
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableProxy")
            .field("bag", &self.inner.bag.borrow())
            .field("state", &self.inner.machine.borrow().state())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Executor;
    use futures::channel::oneshot;
    use futures::executor::LocalPool;
    use std::cell::Cell;

    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) notifies: Cell<usize>,
        pub(crate) started: RefCell<Vec<String>>,
    }

    impl Observer for Recorder {
        fn notify(&self) -> Result<()> {
            self.notifies.set(self.notifies.get() + 1);
            Ok(())
        }

        fn action_started(&self, action: &str, _completion: &Completion) {
            self.started.borrow_mut().push(action.to_string());
        }
    }

    fn flat(recorder: &Rc<Recorder>, config: EngineConfig) -> ObservableProxy<Value> {
        let owner: Weak<dyn Observer> = Rc::<Recorder>::downgrade(recorder);
        let mut bag = IndexMap::new();
        bag.insert("qty".to_string(), Value::Int(1));
        ObservableProxy::new(bag, config, owner)
    }

    fn qty(proxy: &ObservableProxy<Value>) -> i64 {
        proxy.slot("qty").and_then(|v| v.as_int()).unwrap_or(0)
    }

    #[test]
    fn test_write_notifies_once() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default());

        proxy.write("qty", Value::Int(2)).unwrap();
        assert_eq!(recorder.notifies.get(), 1);
        assert_eq!(qty(&proxy), 2);

        proxy.write("name", Value::from("bolt")).unwrap();
        assert_eq!(recorder.notifies.get(), 2);
        assert_eq!(proxy.keys(), vec!["qty".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_reserved_keys_are_not_stored() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default());

        proxy.write("computed", Value::Int(1)).unwrap();
        proxy.write("getDefinition", Value::Int(1)).unwrap();
        assert_eq!(proxy.keys(), vec!["qty".to_string()]);
        assert_eq!(recorder.notifies.get(), 0);
    }

    #[test]
    fn test_control_keys_toggle_batching() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default());

        proxy.write("_actionStart", Value::Bool(true)).unwrap();
        proxy.write("qty", Value::Int(5)).unwrap();
        proxy.write("qty", Value::Int(6)).unwrap();
        assert_eq!(recorder.notifies.get(), 0);
        assert!(!proxy.contains_key("_actionStart"));

        proxy.write("_actionEndNotify", Value::Bool(true)).unwrap();
        assert_eq!(recorder.notifies.get(), 1);
        assert_eq!(proxy.action_state(), ActionState::Idle);
    }

    #[test]
    fn test_action_batches_writes() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default());
        proxy.actions(ActionMap::new().action("bump", |p: &ObservableProxy<Value>, args: &[Value]| {
            let times = args.first().and_then(Value::as_int).unwrap_or(1);
            for _ in 0..times {
                let next = p.slot("qty").and_then(|v| v.as_int()).unwrap_or(0) + 1;
                p.write("qty", Value::Int(next))?;
            }
            Ok(())
        }));

        let invocation = proxy.invoke("bump", vec![Value::Int(4)]).unwrap();
        let completion = invocation.completion().unwrap();
        assert_eq!(completion.outcome(), Some(Ok(())));
        assert_eq!(qty(&proxy), 5);
        assert_eq!(recorder.notifies.get(), 1);
        assert_eq!(*recorder.started.borrow(), vec!["bump".to_string()]);
    }

    #[test]
    fn test_reentrant_invocations_replay_lifo() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default());
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = |name: &'static str, order: &Rc<RefCell<Vec<&'static str>>>| {
            let order = Rc::clone(order);
            move |_: &ObservableProxy<Value>, _: &[Value]| -> Result<()> {
                order.borrow_mut().push(name);
                Ok(())
            }
        };
        let outer = {
            let order = Rc::clone(&order);
            move |p: &ObservableProxy<Value>, _: &[Value]| -> Result<()> {
                order.borrow_mut().push("a");
                assert!(p.invoke("b", vec![])?.is_deferred());
                assert!(p.invoke("c", vec![])?.is_deferred());
                Ok(())
            }
        };
        proxy.actions(
            ActionMap::new()
                .action("a", outer)
                .action("b", log("b", &order))
                .action("c", log("c", &order)),
        );

        proxy.invoke("a", vec![]).unwrap();
        assert_eq!(*order.borrow(), vec!["a", "c", "b"]);
        assert_eq!(recorder.notifies.get(), 1);
        assert_eq!(*recorder.started.borrow(), vec!["a", "c", "b"]);
        assert_eq!(proxy.action_state(), ActionState::Idle);
    }

    #[test]
    fn test_fifo_replay_order() {
        let recorder = Rc::new(Recorder::default());
        let config = EngineConfig::default().with_replay_order(crate::ReplayOrder::Fifo);
        let proxy = flat(&recorder, config);
        let outer = |p: &ObservableProxy<Value>, _: &[Value]| -> Result<()> {
            p.invoke("b", vec![])?;
            p.invoke("c", vec![])?;
            Ok(())
        };
        proxy.actions(
            ActionMap::new()
                .action("a", outer)
                .action("b", |_: &ObservableProxy<Value>, _: &[Value]| Ok(()))
                .action("c", |_: &ObservableProxy<Value>, _: &[Value]| Ok(())),
        );

        proxy.invoke("a", vec![]).unwrap();
        assert_eq!(*recorder.started.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failed_action_releases_and_drains() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default());
        proxy.actions(
            ActionMap::new()
                .action("explode", |p: &ObservableProxy<Value>, _: &[Value]| {
                    p.invoke("fix", vec![])?;
                    Err(Error::action("explode", "boom"))
                })
                .action("fix", |p: &ObservableProxy<Value>, _: &[Value]| {
                    p.write("qty", Value::Int(10))
                }),
        );

        let invocation = proxy.invoke("explode", vec![]).unwrap();
        assert_eq!(
            invocation.completion().unwrap().outcome(),
            Some(Err(Error::action("explode", "boom")))
        );
        assert_eq!(qty(&proxy), 10);
        assert_eq!(proxy.action_state(), ActionState::Idle);
        assert_eq!(recorder.notifies.get(), 1);
    }

    #[test]
    fn test_failed_action_discards_queue() {
        let recorder = Rc::new(Recorder::default());
        let config = EngineConfig::default().with_failure_policy(FailurePolicy::Discard);
        let proxy = flat(&recorder, config);
        proxy.actions(
            ActionMap::new()
                .action("explode", |p: &ObservableProxy<Value>, _: &[Value]| {
                    p.invoke("fix", vec![])?;
                    Err(Error::action("explode", "boom"))
                })
                .action("fix", |p: &ObservableProxy<Value>, _: &[Value]| {
                    p.write("qty", Value::Int(10))
                }),
        );

        proxy.invoke("explode", vec![]).unwrap();
        assert_eq!(qty(&proxy), 1);
        assert_eq!(proxy.deferred_count(), 0);
        assert_eq!(proxy.action_state(), ActionState::Idle);
        assert_eq!(*recorder.started.borrow(), vec!["explode"]);
    }

    #[test]
    fn test_unknown_action() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default());
        assert_eq!(
            proxy.invoke("missing", vec![]).unwrap_err(),
            Error::UnknownAction("missing".to_string())
        );
    }

    #[test]
    fn test_suspended_action_without_executor_fails() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default());
        let (_tx, rx) = oneshot::channel::<()>();
        let gate = RefCell::new(Some(rx));
        proxy.actions(ActionMap::new().task("wait", move |_: &ObservableProxy<Value>, _: &[Value]| {
            let gate = gate.borrow_mut().take();
            async move {
                if let Some(rx) = gate {
                    let _ = rx.await;
                }
                Ok::<(), Error>(())
            }
        }));

        let invocation = proxy.invoke("wait", vec![]).unwrap();
        assert_eq!(
            invocation.completion().unwrap().outcome(),
            Some(Err(Error::NoExecutor {
                task: "wait".to_string()
            }))
        );
        assert_eq!(proxy.action_state(), ActionState::Idle);
    }

    #[test]
    fn test_suspended_action_batches_until_settled() {
        let mut pool = LocalPool::new();
        let recorder = Rc::new(Recorder::default());
        let config = EngineConfig::default().with_executor(Executor::new(pool.spawner()));
        let proxy = flat(&recorder, config);

        let (tx, rx) = oneshot::channel::<()>();
        let gate = RefCell::new(Some(rx));
        proxy.actions(
            ActionMap::new()
                .task("load", move |p: &ObservableProxy<Value>, _: &[Value]| {
                    let p = p.clone();
                    let gate = gate.borrow_mut().take();
                    async move {
                        if let Some(rx) = gate {
                            let _ = rx.await;
                        }
                        p.write("loaded", Value::Bool(true))
                    }
                })
                .action("bump", |p: &ObservableProxy<Value>, _: &[Value]| {
                    p.write("qty", Value::Int(2))
                }),
        );

        let invocation = proxy.invoke("load", vec![]).unwrap();
        let completion = invocation.completion().unwrap().clone();
        pool.run_until_stalled();
        assert!(!completion.is_settled());
        assert_eq!(proxy.action_state(), ActionState::Running);

        proxy.write("qty", Value::Int(7)).unwrap();
        assert!(proxy.invoke("bump", vec![]).unwrap().is_deferred());
        assert_eq!(recorder.notifies.get(), 0);

        tx.send(()).unwrap();
        pool.run_until_stalled();
        assert_eq!(completion.outcome(), Some(Ok(())));
        assert_eq!(proxy.slot("loaded"), Some(Value::Bool(true)));
        assert_eq!(qty(&proxy), 2);
        assert_eq!(recorder.notifies.get(), 1);
        assert_eq!(proxy.action_state(), ActionState::Idle);
    }

    #[test]
    fn test_suspended_action_failure_settles_and_drains() {
        let mut pool = LocalPool::new();
        let recorder = Rc::new(Recorder::default());
        let config = EngineConfig::default().with_executor(Executor::new(pool.spawner()));
        let proxy = flat(&recorder, config);

        let (tx, rx) = oneshot::channel::<()>();
        let gate = RefCell::new(Some(rx));
        proxy.actions(
            ActionMap::new()
                .task("fetch", move |_: &ObservableProxy<Value>, _: &[Value]| {
                    let gate = gate.borrow_mut().take();
                    async move {
                        if let Some(rx) = gate {
                            let _ = rx.await;
                        }
                        Err::<(), Error>(Error::action("fetch", "timed out"))
                    }
                })
                .action("fallback", |p: &ObservableProxy<Value>, _: &[Value]| {
                    p.write("qty", Value::Int(0))
                }),
        );

        let invocation = proxy.invoke("fetch", vec![]).unwrap();
        let completion = invocation.completion().unwrap().clone();
        pool.run_until_stalled();
        assert!(proxy.invoke("fallback", vec![]).unwrap().is_deferred());

        tx.send(()).unwrap();
        pool.run_until_stalled();
        assert_eq!(
            completion.outcome(),
            Some(Err(Error::action("fetch", "timed out")))
        );
        assert_eq!(proxy.action_state(), ActionState::Idle);
        assert_eq!(qty(&proxy), 0);
        assert_eq!(*recorder.started.borrow(), vec!["fetch", "fallback"]);
        assert_eq!(recorder.notifies.get(), 1);
    }

    #[test]
    fn test_memoized_accessor_invalidated_by_write() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default());
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        proxy.computed(
            ComputedMap::new()
                .accessor("double", move |p: &ObservableProxy<Value>| {
                    counter.set(counter.get() + 1);
                    Ok(Value::Int(qty(p) * 2))
                })
                .function("times", |p: &ObservableProxy<Value>, args: &[Value]| {
                    let factor = args.first().and_then(Value::as_int).unwrap_or(1);
                    Ok(Value::Int(qty(p) * factor))
                }),
        );

        assert_eq!(proxy.compute("double", &[]).unwrap(), Value::Int(2));
        assert_eq!(proxy.compute("double", &[]).unwrap(), Value::Int(2));
        assert_eq!(calls.get(), 1);

        proxy.write("qty", Value::Int(4)).unwrap();
        assert_eq!(proxy.compute("double", &[]).unwrap(), Value::Int(8));
        assert_eq!(calls.get(), 2);
        assert_eq!(proxy.compute("times", &[Value::Int(3)]).unwrap(), Value::Int(12));
        assert!(matches!(
            proxy.compute("nope", &[]),
            Err(Error::UnknownComputation(_))
        ));
    }

    #[test]
    fn test_unmemoized_accessor() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default().with_memoize_computed(false));
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        proxy.computed(ComputedMap::new().accessor("q", move |p: &ObservableProxy<Value>| {
            counter.set(counter.get() + 1);
            Ok(Value::Int(qty(p)))
        }));

        proxy.compute("q", &[]).unwrap();
        proxy.compute("q", &[]).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_delete_notifies() {
        let recorder = Rc::new(Recorder::default());
        let proxy = flat(&recorder, EngineConfig::default());
        assert_eq!(proxy.delete("qty").unwrap(), Some(Value::Int(1)));
        assert_eq!(proxy.delete("qty").unwrap(), None);
        assert_eq!(recorder.notifies.get(), 1);
        assert!(proxy.is_empty());
    }
}
