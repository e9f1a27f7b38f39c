//! The host's single thread and the dispatcher that leaves and re-enters it.
//!
//! Blocking engine calls run on a tokio runtime owned by the [`HostLoop`].
//! When a call finishes, its worker fills the task's oneshot and posts the
//! task id on the wake queue. Continuations only run inside
//! [`HostLoop::run_one`], [`HostLoop::run_ready`] or
//! [`HostLoop::run_until_idle`], one at a time, on the thread that owns the
//! loop.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use modelbridge_core::{BridgeError, Result};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::task::{Delivery, PendingTask};
use crate::worker::WorkerTask;
use crate::{ConfigError, RuntimeConfig, TaskId, TaskKind, TaskState, TaskStatus};

struct PendingEntry {
    status: TaskStatus,
    delivery: Box<dyn Delivery>,
}

struct HostShared {
    runtime: RefCell<Option<Runtime>>,
    wake_tx: mpsc::UnboundedSender<TaskId>,
    wake_rx: RefCell<mpsc::UnboundedReceiver<TaskId>>,
    pending: RefCell<HashMap<TaskId, PendingEntry>>,
    next_id: Cell<u64>,
    delivering: Cell<bool>,
    dispatched: Cell<u64>,
    delivered: Cell<u64>,
}

/// Handle to the host's event loop. Cloning shares the same loop; the type is
/// neither `Send` nor `Sync`.
#[derive(Clone)]
pub struct HostLoop {
    shared: Rc<HostShared>,
}

/// Non-owning reference to a [`HostLoop`].
///
/// Model handles and pending continuations hold one of these, so the loop is
/// dropped (and its pending tasks abandoned) once the last owner lets go.
#[derive(Clone)]
pub(crate) struct WeakHostLoop {
    shared: Weak<HostShared>,
}

impl WeakHostLoop {
    pub(crate) fn upgrade(&self) -> Result<HostLoop> {
        self.shared
            .upgrade()
            .map(|shared| HostLoop { shared })
            .ok_or_else(|| BridgeError::internal("dispatcher shut down"))
    }
}

impl HostLoop {
    pub(crate) fn downgrade(&self) -> WeakHostLoop {
        WeakHostLoop {
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn new(config: &RuntimeConfig) -> std::result::Result<Self, ConfigError> {
        if config.worker_threads == 0 || config.max_blocking_threads == 0 {
            return Err(ConfigError::invalid("runtime thread counts must be at least 1"));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .max_blocking_threads(config.max_blocking_threads)
            .thread_name(config.thread_name.clone())
            .build()?;

        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        Ok(Self {
            shared: Rc::new(HostShared {
                runtime: RefCell::new(Some(runtime)),
                wake_tx,
                wake_rx: RefCell::new(wake_rx),
                pending: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
                delivering: Cell::new(false),
                dispatched: Cell::new(0),
                delivered: Cell::new(0),
            }),
        })
    }

    /// Run `execute` on a worker and `complete` back on this thread.
    ///
    /// `complete` is called exactly once, by a later `run_*` call (or by
    /// [`HostLoop::shutdown`]), never from inside `dispatch`.
    pub(crate) fn dispatch<T, X, C>(
        &self,
        kind: TaskKind,
        execute: X,
        complete: C,
    ) -> Result<TaskId>
    where
        T: Send + 'static,
        X: FnOnce() -> Result<T> + Send + 'static,
        C: FnOnce(Result<T>) + 'static,
    {
        let runtime = self.shared.runtime.borrow();
        let Some(runtime) = runtime.as_ref() else {
            return Err(BridgeError::internal("dispatcher shut down"));
        };

        let id = TaskId(self.shared.next_id.get());
        self.shared.next_id.set(id.0 + 1);

        let (result_tx, result_rx) = oneshot::channel();
        let status = TaskStatus::new();
        self.shared.pending.borrow_mut().insert(
            id,
            PendingEntry {
                status: status.clone(),
                delivery: Box::new(PendingTask {
                    kind,
                    result_rx,
                    complete: Box::new(complete),
                }),
            },
        );

        let task = WorkerTask {
            id,
            kind,
            status,
            execute,
            result_tx,
            wake_tx: self.shared.wake_tx.clone(),
        };
        runtime.spawn(task.run());
        self.shared.dispatched.set(self.shared.dispatched.get() + 1);

        debug!(task_id = %id, %kind, "task dispatched");
        Ok(id)
    }

    /// Deliver the next finished task, waiting for one if necessary. Returns
    /// `false` when nothing is in flight.
    pub fn run_one(&self) -> Result<bool> {
        let _guard = self.enter()?;
        if self.shared.pending.borrow().is_empty() {
            return Ok(false);
        }
        loop {
            let next = self.shared.wake_rx.borrow_mut().blocking_recv();
            let Some(id) = next else {
                return Err(BridgeError::internal("wake queue closed"));
            };
            if self.deliver(id) {
                return Ok(true);
            }
        }
    }

    /// Deliver every task that has already finished, without waiting.
    pub fn run_ready(&self) -> Result<usize> {
        let _guard = self.enter()?;
        let mut count = 0;
        loop {
            let next = self.shared.wake_rx.borrow_mut().try_recv();
            match next {
                Ok(id) => {
                    if self.deliver(id) {
                        count += 1;
                    }
                }
                Err(_) => return Ok(count),
            }
        }
    }

    /// Deliver tasks until none are in flight, including tasks dispatched by
    /// the continuations themselves.
    pub fn run_until_idle(&self) -> Result<usize> {
        let mut count = 0;
        while self.run_one()? {
            count += 1;
        }
        Ok(count)
    }

    /// Stop the workers and resolve every undelivered task with an internal
    /// error. Later dispatches fail synchronously.
    pub fn shutdown(&self) {
        if let Some(runtime) = self.shared.runtime.borrow_mut().take() {
            runtime.shutdown_background();
        }
        self.shared.abandon_pending();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.runtime.borrow().is_none()
    }

    pub fn pending_tasks(&self) -> usize {
        self.shared.pending.borrow().len()
    }

    pub fn dispatched_tasks(&self) -> u64 {
        self.shared.dispatched.get()
    }

    pub fn delivered_tasks(&self) -> u64 {
        self.shared.delivered.get()
    }

    /// State of a task that has not been delivered yet.
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.shared
            .pending
            .borrow()
            .get(&id)
            .map(|entry| entry.status.get())
    }

    fn enter(&self) -> Result<DeliveryGuard<'_>> {
        if self.shared.delivering.replace(true) {
            return Err(BridgeError::usage(
                "host loop is already delivering a result; nested runs are not allowed",
            ));
        }
        Ok(DeliveryGuard {
            flag: &self.shared.delivering,
        })
    }

    fn deliver(&self, id: TaskId) -> bool {
        // Take the entry out before calling into the continuation, which may
        // dispatch more work.
        let entry = self.shared.pending.borrow_mut().remove(&id);
        let Some(entry) = entry else {
            return false;
        };
        let state = entry.status.get();
        debug!(task_id = %id, kind = %entry.delivery.kind(), ?state, "delivering task");
        self.shared.delivered.set(self.shared.delivered.get() + 1);
        entry.delivery.deliver();
        true
    }
}

impl HostShared {
    fn abandon_pending(&self) {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        if pending.is_empty() {
            return;
        }
        warn!(tasks = pending.len(), "dispatcher shut down with tasks in flight");

        let mut entries: Vec<_> = pending.into_iter().collect();
        entries.sort_by_key(|(id, _)| *id);
        for (_, entry) in entries {
            self.delivered.set(self.delivered.get() + 1);
            entry
                .delivery
                .abandon(BridgeError::internal("dispatcher shut down"));
        }
    }
}

impl Drop for HostShared {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
        self.abandon_pending();
    }
}

struct DeliveryGuard<'a> {
    flag: &'a Cell<bool>,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}
