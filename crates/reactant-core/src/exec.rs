//! In-place polling of action bodies and initializers
//!
//! Bodies start synchronously: the engine polls them once on the caller's
//! stack. Only a body that suspends is handed to the configured executor.

use futures::future::LocalBoxFuture;
use futures::task::noop_waker_ref;
use std::task::{Context, Poll};

/// Result of polling a task once
pub(crate) enum Polled<T> {
    Ready(T),
    Pending(LocalBoxFuture<'static, T>),
}

/// Poll `task` once with a no-op waker.
///
/// A pending task must be polled again by an executor, which registers a
/// real waker on its first poll.
pub(crate) fn poll_once<T>(mut task: LocalBoxFuture<'static, T>) -> Polled<T> {
    let mut cx = Context::from_waker(noop_waker_ref());
    match task.as_mut().poll(&mut cx) {
        Poll::Ready(value) => Polled::Ready(value),
        Poll::Pending => Polled::Pending(task),
    }
}
