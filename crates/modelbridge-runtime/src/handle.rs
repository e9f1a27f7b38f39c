use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use modelbridge_core::{
    Device, Engine, EngineModel, InputTensorSet, OutputNameList, OutputTensor, Result,
};
use serde_json::Value;

use crate::host::WeakHostLoop;
use crate::{evaluate, TaskId};

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// A handle allocated by a load request whose model has not arrived yet.
///
/// Only the load flow ever holds one; [`UnboundHandle::bind`] consumes it, so
/// a caller can never observe or evaluate an unbound handle.
pub(crate) struct UnboundHandle {
    id: u64,
    host: WeakHostLoop,
    path: PathBuf,
    device: Device,
    serialize: bool,
}

impl UnboundHandle {
    pub(crate) fn new(
        host: WeakHostLoop,
        path: PathBuf,
        device: Device,
        serialize: bool,
    ) -> Self {
        Self {
            id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
            host,
            path,
            device,
            serialize,
        }
    }

    pub(crate) fn bind<E: Engine>(self, model: E::Model) -> ModelHandle<E> {
        let bound = BoundModel {
            id: self.id,
            model,
            gate: self.serialize.then(|| Mutex::new(())),
            path: self.path,
            device: self.device,
        };
        ModelHandle {
            bound: Arc::new(bound),
            host: self.host,
        }
    }
}

/// The loaded model as seen from worker threads.
pub(crate) struct BoundModel<E: Engine> {
    id: u64,
    model: E::Model,
    // Present when the engine cannot run forward passes concurrently.
    gate: Option<Mutex<()>>,
    path: PathBuf,
    device: Device,
}

impl<E: Engine> BoundModel<E> {
    /// Runs on a worker; holds the gate only around the engine call.
    pub(crate) fn evaluate(
        &self,
        inputs: &InputTensorSet,
        outputs: &OutputNameList,
    ) -> Result<Vec<OutputTensor>> {
        let _serialized = self
            .gate
            .as_ref()
            .map(|gate| gate.lock().unwrap_or_else(PoisonError::into_inner));
        self.model.evaluate(inputs, outputs, &self.device)
    }
}

/// A loaded model, ready for evaluation.
///
/// Clones refer to the same loaded model. The model is released when the last
/// clone (and the last in-flight evaluation) is dropped. A handle does not keep
/// the host loop alive; evaluating after the loop is gone fails with an
/// internal error.
pub struct ModelHandle<E: Engine> {
    pub(crate) bound: Arc<BoundModel<E>>,
    pub(crate) host: WeakHostLoop,
}

impl<E: Engine> Clone for ModelHandle<E> {
    fn clone(&self) -> Self {
        Self {
            bound: Arc::clone(&self.bound),
            host: self.host.clone(),
        }
    }
}

impl<E: Engine> fmt::Debug for ModelHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.bound.id)
            .field("path", &self.bound.path)
            .field("device", &self.bound.device)
            .field("serialized", &self.bound.gate.is_some())
            .finish()
    }
}

impl<E: Engine> ModelHandle<E> {
    pub fn id(&self) -> u64 {
        self.bound.id
    }

    pub fn path(&self) -> &Path {
        &self.bound.path
    }

    pub fn device(&self) -> &Device {
        &self.bound.device
    }

    /// Whether evaluations on this model run one at a time.
    pub fn is_serialized(&self) -> bool {
        self.bound.gate.is_some()
    }

    /// Evaluate the model asynchronously.
    ///
    /// `inputs` is a single batch, an array of batches or a mapping of input
    /// name to batch; `output_names` optionally selects outputs. Malformed
    /// arguments fail here with a usage error and nothing is dispatched.
    /// Otherwise `completion` later receives a mapping of output name to
    /// samples × features.
    pub fn evaluate<C>(
        &self,
        inputs: &Value,
        output_names: Option<&Value>,
        completion: C,
    ) -> Result<TaskId>
    where
        C: FnOnce(Result<Value>) + 'static,
    {
        evaluate::submit(self, inputs, output_names, completion)
    }
}
