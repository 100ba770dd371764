//! Action maps and the single-flight action state machine
//!
//! An action is a named, batched mutation. While one runs (or while the
//! deferred chain behind it drains) further invocations are queued instead of
//! executed, and writes are applied without notifying. One notification fires
//! when the whole chain has settled.
//!
//! ```text
//!          invoke                 settle, queue empty
//!   Idle ---------> Running --------------------------> Idle (+ notify)
//!                    |   ^
//!   settle, queued   |   | replay next deferred
//!                    v   |
//!                  Draining
//! ```

use crate::config::ReplayOrder;
use crate::{Completion, ObservableProxy, Result, Value};
use futures::future::{self, FutureExt, LocalBoxFuture};
use indexmap::IndexMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

/// Future returned by an action body
pub type ActionFuture = LocalBoxFuture<'static, Result<()>>;

/// Action body: receives the live proxy and the invocation arguments
pub type ActionBody<T> = Rc<dyn Fn(&ObservableProxy<T>, &[Value]) -> ActionFuture>;

/// Name -> action body registry
pub struct ActionMap<T> {
    entries: IndexMap<String, ActionBody<T>>,
}

impl<T: 'static> ActionMap<T> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Add a synchronous action
    pub fn action(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&ObservableProxy<T>, &[Value]) -> Result<()> + 'static,
    ) -> Self {
        let body: ActionBody<T> = Rc::new(move |proxy: &ObservableProxy<T>, args: &[Value]| {
            future::ready(body(proxy, args)).boxed_local()
        });
        self.entries.insert(name.into(), body);
        self
    }

    /// Add an asynchronous action. The body runs on the caller's stack until
    /// its first suspension point.
    pub fn task<F>(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&ObservableProxy<T>, &[Value]) -> F + 'static,
    ) -> Self
    where
        F: Future<Output = Result<()>> + 'static,
    {
        let body: ActionBody<T> = Rc::new(move |proxy: &ObservableProxy<T>, args: &[Value]| {
            body(proxy, args).boxed_local()
        });
        self.entries.insert(name.into(), body);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ActionBody<T>> {
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

impl<T: 'static> Default for ActionMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ActionMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

/// What an `invoke` call did
#[derive(Debug, Clone)]
pub enum Invocation {
    /// The action started; the completion settles when its body does
    Started(Completion),
    /// Another action was in progress; this one was queued
    Deferred,
}

impl Invocation {
    pub fn completion(&self) -> Option<&Completion> {
        match self {
            Invocation::Started(completion) => Some(completion),
            Invocation::Deferred => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Invocation::Deferred)
    }
}

/// A queued invocation
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredAction {
    pub action: String,
    pub arguments: Vec<Value>,
}

/// Action state of a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// No action in progress; writes notify immediately
    Idle,
    /// An action body is executing or suspended
    Running,
    /// A body settled and the deferred queue is being replayed
    Draining,
}

#[derive(Debug)]
pub(crate) struct ActionMachine {
    state: ActionState,
    deferred: Vec<DeferredAction>,
    order: ReplayOrder,
}

impl ActionMachine {
    pub(crate) fn new(order: ReplayOrder) -> Self {
        Self {
            state: ActionState::Idle,
            deferred: Vec::new(),
            order,
        }
    }

    pub(crate) fn state(&self) -> ActionState {
        self.state
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state == ActionState::Idle
    }

    pub(crate) fn begin(&mut self) {
        self.state = ActionState::Running;
    }

    pub(crate) fn release(&mut self) {
        self.state = ActionState::Draining;
    }

    pub(crate) fn finish(&mut self) {
        self.state = ActionState::Idle;
    }

    pub(crate) fn defer(&mut self, action: DeferredAction) {
        self.deferred.push(action);
    }

    pub(crate) fn next_deferred(&mut self) -> Option<DeferredAction> {
        match self.order {
            ReplayOrder::Lifo => self.deferred.pop(),
            ReplayOrder::Fifo if self.deferred.is_empty() => None,
            ReplayOrder::Fifo => Some(self.deferred.remove(0)),
        }
    }

    /// Drop the whole queue, returning what was dropped
    pub(crate) fn discard(&mut self) -> Vec<DeferredAction> {
        std::mem::take(&mut self.deferred)
    }

    pub(crate) fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}
