//! Listeners and listener lists
//!
//! A listener receives [`Notification`]s through its values callback and
//! in-flight actions through its action hook. Listeners are compared by
//! identity (`Rc` pointer), never by content.

use crate::{Completion, Result, Value, ValueMap};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Payload delivered to a listener
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Full value bag of an entity
    Values(ValueMap),
    /// Full key set of a collection
    Keys(Vec<String>),
    /// Result of a collection computation
    Computed(Value),
}

impl Notification {
    pub fn as_values(&self) -> Option<&ValueMap> {
        match self {
            Notification::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_keys(&self) -> Option<&[String]> {
        match self {
            Notification::Keys(keys) => Some(keys),
            _ => None,
        }
    }

    pub fn as_computed(&self) -> Option<&Value> {
        match self {
            Notification::Computed(value) => Some(value),
            _ => None,
        }
    }
}

/// Names a collection computation and the arguments to call it with
#[derive(Debug, Clone, PartialEq)]
pub struct ComputationInfo {
    pub computation_name: String,
    pub arguments: Vec<Value>,
}

impl ComputationInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            computation_name: name.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: impl Into<Vec<Value>>) -> Self {
        self.arguments = arguments.into();
        self
    }
}

type ValuesFn = Box<dyn Fn(&Notification) -> Result<()>>;
type ActionHookFn = Box<dyn Fn(&str, &Completion)>;

/// An observer of an entity or collection
pub struct Listener {
    on_values: ValuesFn,
    on_action: Option<ActionHookFn>,
    silent: bool,
    computation: Option<ComputationInfo>,
}

/// Shared listener handle; registration and removal go by pointer identity
pub type ListenerRef = Rc<Listener>;

impl Listener {
    /// Listener with an infallible values callback
    pub fn new(on_values: impl Fn(&Notification) + 'static) -> Self {
        Self::fallible(move |notification| {
            on_values(notification);
            Ok(())
        })
    }

    /// Listener whose values callback can fail; the error propagates to the
    /// caller of the notification cycle
    pub fn fallible(on_values: impl Fn(&Notification) -> Result<()> + 'static) -> Self {
        Self {
            on_values: Box::new(on_values),
            on_action: None,
            silent: false,
            computation: None,
        }
    }

    /// Receive `(action name, completion)` whenever an action starts
    pub fn with_action_hook(mut self, hook: impl Fn(&str, &Completion) + 'static) -> Self {
        self.on_action = Some(Box::new(hook));
        self
    }

    /// Exclude this listener from standalone and on-register deliveries
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Deliver a collection computation instead of the key set
    pub fn for_computation(mut self, info: ComputationInfo) -> Self {
        self.computation = Some(info);
        self
    }

    /// Wrap in a shared handle for registration
    pub fn into_ref(self) -> ListenerRef {
        Rc::new(self)
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn computation(&self) -> Option<&ComputationInfo> {
        self.computation.as_ref()
    }

    pub(crate) fn deliver(&self, notification: &Notification) -> Result<()> {
        (self.on_values)(notification)
    }

    pub(crate) fn action_started(&self, action: &str, completion: &Completion) {
        if let Some(hook) = &self.on_action {
            hook(action, completion);
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("silent", &self.silent)
            .field("computation", &self.computation)
            .field("action_hook", &self.on_action.is_some())
            .finish()
    }
}

/// Identity-deduplicated list of listeners
///
/// Dispatch always iterates a [`snapshot`](ListenerList::snapshot), so a
/// listener may register or unregister others while being notified.
#[derive(Debug, Default)]
pub struct ListenerList {
    listeners: RefCell<Vec<ListenerRef>>,
}

impl ListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. Returns false if it was already registered.
    pub fn add(&self, listener: &ListenerRef) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        if listeners.iter().any(|l| Rc::ptr_eq(l, listener)) {
            return false;
        }
        listeners.push(Rc::clone(listener));
        true
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove(&self, listener: &ListenerRef) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| !Rc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn contains(&self, listener: &ListenerRef) -> bool {
        self.listeners
            .borrow()
            .iter()
            .any(|l| Rc::ptr_eq(l, listener))
    }

    /// Copy of the current list for dispatch
    pub fn snapshot(&self) -> Vec<ListenerRef> {
        self.listeners.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }

    /// Hand a started action to every listener's hook
    pub(crate) fn announce(&self, action: &str, completion: &Completion) {
        for listener in self.snapshot() {
            listener.action_started(action, completion);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_list_deduplicates_by_identity() {
        let list = ListenerList::new();
        let a = Listener::new(|_| {}).into_ref();
        let b = Listener::new(|_| {}).into_ref();

        assert!(list.add(&a));
        assert!(!list.add(&a));
        assert!(list.add(&b));
        assert_eq!(list.len(), 2);

        assert!(list.remove(&a));
        assert!(!list.remove(&a));
        assert!(!list.contains(&a));
        assert!(list.contains(&b));
    }

    #[test]
    fn test_snapshot_is_stable_under_mutation() {
        let list = Rc::new(ListenerList::new());
        let calls = Rc::new(Cell::new(0));

        let late = Listener::new(|_| {}).into_ref();
        let adder = {
            let list = Rc::clone(&list);
            let late = Rc::clone(&late);
            let calls = Rc::clone(&calls);
            Listener::new(move |_| {
                calls.set(calls.get() + 1);
                list.add(&late);
            })
            .into_ref()
        };
        list.add(&adder);

        for listener in list.snapshot() {
            listener.deliver(&Notification::Keys(vec![])).unwrap();
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_listener_flags() {
        let listener = Listener::new(|_| {})
            .silent()
            .for_computation(ComputationInfo::new("total").with_arguments(vec![Value::Int(2)]));
        assert!(listener.is_silent());
        let info = listener.computation().unwrap();
        assert_eq!(info.computation_name, "total");
        assert_eq!(info.arguments, vec![Value::Int(2)]);
    }
}
