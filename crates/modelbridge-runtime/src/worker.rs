use std::any::Any;

use modelbridge_core::{BridgeError, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::{TaskId, TaskKind, TaskState, TaskStatus};

/// Worker side of one task.
pub(crate) struct WorkerTask<T, X> {
    pub(crate) id: TaskId,
    pub(crate) kind: TaskKind,
    pub(crate) status: TaskStatus,
    pub(crate) execute: X,
    pub(crate) result_tx: oneshot::Sender<Result<T>>,
    pub(crate) wake_tx: mpsc::UnboundedSender<TaskId>,
}

impl<T, X> WorkerTask<T, X>
where
    T: Send + 'static,
    X: FnOnce() -> Result<T> + Send + 'static,
{
    /// Run the blocking call on the blocking pool, then post the result for
    /// the host. Panics inside `execute` end up as an internal error.
    pub(crate) async fn run(self) {
        let WorkerTask {
            id,
            kind,
            status,
            execute,
            result_tx,
            wake_tx,
        } = self;

        let running = status.clone();
        let joined = tokio::task::spawn_blocking(move || {
            running.set(TaskState::Running);
            execute()
        })
        .await;

        let result = match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let msg = panic_message(join_err.into_panic());
                error!(task_id = %id, %kind, panic = %msg, "native call panicked");
                Err(BridgeError::internal(format!("{kind} task panicked: {msg}")))
            }
            Err(join_err) => Err(BridgeError::internal(format!(
                "{kind} task was cancelled: {join_err}"
            ))),
        };

        status.set(if result.is_ok() {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        });

        if result_tx.send(result).is_err() {
            debug!(task_id = %id, "host dropped the task before delivery");
            return;
        }
        // The host owns a sender too, so this only fails once it is gone.
        let _ = wake_tx.send(id);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
