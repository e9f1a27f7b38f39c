use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use modelbridge_core::{BridgeError, Result};
use tokio::sync::oneshot;

/// Identifies one dispatched load or evaluate task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Load,
    Evaluate,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => f.write_str("load"),
            Self::Evaluate => f.write_str("evaluate"),
        }
    }
}

/// `Pending -> Running -> {Succeeded, Failed}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Succeeded,
            _ => Self::Failed,
        }
    }
}

/// Task state shared between the host-side record and the worker running it.
#[derive(Clone, Debug)]
pub(crate) struct TaskStatus(Arc<AtomicU8>);

impl TaskStatus {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(TaskState::Pending as u8)))
    }

    pub(crate) fn set(&self, state: TaskState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Host-side half of a task: the completion continuation and the channel the
/// worker fills. Lives on the host thread only.
pub(crate) trait Delivery {
    fn kind(&self) -> TaskKind;

    /// Hand the worker's result to the continuation.
    fn deliver(self: Box<Self>);

    /// Resolve the continuation without a worker result.
    fn abandon(self: Box<Self>, err: BridgeError);
}

pub(crate) struct PendingTask<T> {
    pub(crate) kind: TaskKind,
    pub(crate) result_rx: oneshot::Receiver<Result<T>>,
    pub(crate) complete: Box<dyn FnOnce(Result<T>)>,
}

impl<T> Delivery for PendingTask<T> {
    fn kind(&self) -> TaskKind {
        self.kind
    }

    fn deliver(self: Box<Self>) {
        let PendingTask {
            mut result_rx,
            complete,
            ..
        } = *self;
        let result = match result_rx.try_recv() {
            Ok(result) => result,
            Err(e) => Err(BridgeError::internal(format!("task result missing: {e}"))),
        };
        complete(result);
    }

    fn abandon(self: Box<Self>, err: BridgeError) {
        let PendingTask { complete, .. } = *self;
        complete(Err(err));
    }
}
