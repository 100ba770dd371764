//! Uninitialized -> Initialized lifecycle shared by entities and collections
//!
//! While uninitialized no listener is notified. `init` flips straight to
//! initialized; `init_with` runs an initializer first. Each initializer run
//! gets a generation number, and only the latest generation may complete.

use crate::exec::{poll_once, Polled};
use crate::{Completion, EngineConfig, Error, Result};
use futures::future::LocalBoxFuture;
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) struct Lifecycle {
    initialized: Cell<bool>,
    generation: Cell<u64>,
}

impl Lifecycle {
    /// Constructs start initialized
    pub(crate) fn new() -> Self {
        Self {
            initialized: Cell::new(true),
            generation: Cell::new(0),
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Initialize now, superseding any running initializer
    pub(crate) fn mark_initialized(&self) {
        self.generation.set(self.generation.get() + 1);
        self.initialized.set(true);
    }

    /// Enter the uninitialized state for a new initializer run
    pub(crate) fn begin(&self) -> u64 {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        self.initialized.set(false);
        generation
    }

    /// Finish run `generation`. Returns false if a newer run superseded it.
    pub(crate) fn complete(&self, generation: u64) -> bool {
        if generation != self.generation.get() {
            return false;
        }
        self.initialized.set(true);
        true
    }
}

/// A construct with a lifecycle
pub(crate) trait Initialize: 'static {
    fn lifecycle(&self) -> &Lifecycle;

    /// Deliver the post-initialization notification
    fn initialized(&self) -> Result<()>;
}

/// Run `task` as the initializer of `owner`.
///
/// The task starts immediately; if it suspends it is finished on the
/// configured executor. A failed initializer still initializes its owner so
/// that it is not muted forever; the failure is reported through the
/// returned completion.
pub(crate) fn run_initializer<O: Initialize>(
    owner: &Rc<O>,
    label: String,
    config: &EngineConfig,
    task: LocalBoxFuture<'static, Result<()>>,
) -> Result<Completion> {
    let generation = owner.lifecycle().begin();
    debug!(task = %label, generation, "initializer started");
    let (settle, completion) = Completion::channel(label.clone());

    match poll_once(task) {
        Polled::Ready(outcome) => {
            settle.send(outcome.clone());
            finish(owner.as_ref(), &label, generation, outcome)?;
        }
        Polled::Pending(task) => {
            let executor = config.executor().clone();
            if !executor.is_available() {
                let err = Error::NoExecutor { task: label.clone() };
                settle.send(Err(err.clone()));
                finish(owner.as_ref(), &label, generation, Err(err))?;
                return Ok(completion);
            }

            let weak = Rc::downgrade(owner);
            let task_label = label.clone();
            let continuation = async move {
                let outcome = task.await;
                settle.send(outcome.clone());
                if let Some(owner) = weak.upgrade() {
                    if let Err(err) = finish(owner.as_ref(), &task_label, generation, outcome) {
                        warn!(task = %task_label, error = %err, "notification after initializer failed");
                    }
                }
            };
            if let Err(err) = executor.spawn(continuation) {
                warn!(task = %label, error = %err, "could not spawn initializer");
                if owner.lifecycle().complete(generation) {
                    owner.initialized()?;
                }
            }
        }
    }
    Ok(completion)
}

fn finish<O: Initialize>(owner: &O, label: &str, generation: u64, outcome: Result<()>) -> Result<()> {
    if let Err(err) = &outcome {
        warn!(task = label, error = %err, "initializer failed");
    }
    if owner.lifecycle().complete(generation) {
        debug!(task = label, generation, "initialized");
        owner.initialized()
    } else {
        debug!(task = label, generation, "superseded initializer finished, ignoring");
        Ok(())
    }
}
