use std::sync::Arc;

use modelbridge_core::{
    extract_output_names, input, outputs_to_value, Engine, OutputTensor, Result,
};
use serde_json::Value;
use tracing::warn;

use crate::{ModelHandle, TaskId, TaskKind};

/// `Requested -> Running -> {Succeeded, Failed}`.
///
/// Inputs and output names are built here, on the host thread, so malformed
/// arguments fail before anything is dispatched. The task owns its copy.
pub(crate) fn submit<E, C>(
    handle: &ModelHandle<E>,
    inputs: &Value,
    output_names: Option<&Value>,
    completion: C,
) -> Result<TaskId>
where
    E: Engine,
    C: FnOnce(Result<Value>) + 'static,
{
    let tensors = input::build(inputs)?;
    let names = extract_output_names(output_names)?;
    let host = handle.host.upgrade()?;
    let bound = Arc::clone(&handle.bound);
    let model_id = handle.id();

    host.dispatch(
        TaskKind::Evaluate,
        move || bound.evaluate(&tensors, &names),
        move |result: Result<Vec<OutputTensor>>| {
            let outputs = result.and_then(|outputs| outputs_to_value(&outputs));
            if let Err(err) = &outputs {
                warn!(model_id, error = %err, "evaluation failed");
            }
            completion(outputs);
        },
    )
}
