//! Completion handles for actions and initializers
//!
//! A [`Completion`] is handed to every listener's action hook when an action
//! starts, and returned from `init_with`. It can be cloned freely, awaited by
//! any number of holders, or inspected without blocking.

use crate::{Error, Result};
use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Final result of an action or initializer
pub type Outcome = Result<()>;

/// Awaitable, cloneable completion signal
#[derive(Clone)]
pub struct Completion {
    task: Rc<str>,
    shared: Shared<LocalBoxFuture<'static, Outcome>>,
}

/// Sending half of a completion. Dropping it without sending resolves the
/// completion with [`Error::ActionCancelled`].
pub(crate) struct Settle {
    sender: oneshot::Sender<Outcome>,
}

impl Settle {
    pub(crate) fn send(self, outcome: Outcome) {
        // every completion clone may already be gone
        let _ = self.sender.send(outcome);
    }
}

impl Completion {
    pub(crate) fn channel(task: impl Into<String>) -> (Settle, Completion) {
        let task: String = task.into();
        let label = task.clone();
        let (sender, receiver) = oneshot::channel();
        let shared = receiver
            .map(move |received| {
                received.unwrap_or_else(|_| Err(Error::ActionCancelled { task: label }))
            })
            .boxed_local()
            .shared();
        (
            Settle { sender },
            Completion {
                task: Rc::from(task),
                shared,
            },
        )
    }

    /// Name of the action (or `<name>::init`) this completion belongs to
    pub fn task(&self) -> &str {
        &self.task
    }

    /// The outcome, if the task has settled
    pub fn outcome(&self) -> Option<Outcome> {
        self.shared.clone().now_or_never()
    }

    /// Check if the task has settled
    pub fn is_settled(&self) -> bool {
        self.outcome().is_some()
    }
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared.poll_unpin(cx)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("task", &self.task)
            .field("settled", &self.is_settled())
            .finish()
    }
}
