//! Asynchronous model loading and evaluation for a single-threaded host.
//!
//! A [`Bridge`] owns an [`Engine`](modelbridge_core::Engine) and a
//! [`HostLoop`]. Load and evaluate requests are validated on the calling
//! thread, run on worker threads, and their completion continuations are
//! invoked back on the host thread whenever the host drives the loop.

pub mod binding;
mod bridge;
pub mod config;
mod evaluate;
mod handle;
mod host;
mod load;
pub mod logging;
mod task;
mod worker;

pub use bridge::Bridge;
pub use config::*;
pub use handle::ModelHandle;
pub use host::HostLoop;
pub use task::{TaskId, TaskKind, TaskState};

pub(crate) use task::TaskStatus;
