use std::path::PathBuf;
use std::sync::Arc;

use modelbridge_core::{BridgeError, Device, Engine, Result};
use tracing::{info, warn};

use crate::handle::UnboundHandle;
use crate::{HostLoop, ModelHandle, TaskId, TaskKind};

pub(crate) struct LoadRequest {
    pub(crate) path: PathBuf,
    pub(crate) device: Device,
    pub(crate) serialize: bool,
}

/// `Requested -> Loading -> {Loaded, LoadFailed}`.
///
/// Every failure reaches `completion` as an error; a failed load never
/// produces a handle.
pub(crate) fn submit<E, C>(
    host: &HostLoop,
    engine: &Arc<E>,
    request: LoadRequest,
    completion: C,
) -> Result<TaskId>
where
    E: Engine,
    C: FnOnce(Result<ModelHandle<E>>) + 'static,
{
    let LoadRequest {
        path,
        device,
        serialize,
    } = request;
    if path.as_os_str().is_empty() {
        return Err(BridgeError::usage("model path must not be empty"));
    }

    let unbound = UnboundHandle::new(host.downgrade(), path.clone(), device.clone(), serialize);
    let engine = Arc::clone(engine);

    host.dispatch(
        TaskKind::Load,
        move || {
            engine
                .load(&path, &device)
                .map_err(|err| err.into_load_error(&path))
        },
        move |result: Result<E::Model>| match result {
            Ok(model) => {
                let handle = unbound.bind::<E>(model);
                info!(
                    model_id = handle.id(),
                    path = %handle.path().display(),
                    device = %handle.device(),
                    "model loaded"
                );
                completion(Ok(handle));
            }
            Err(err) => {
                warn!(error = %err, "model load failed");
                completion(Err(err));
            }
        },
    )
}
