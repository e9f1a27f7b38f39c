use std::path::Path;

use crate::{Device, InputTensorSet, OutputNameList, OutputTensor, Result};

#[derive(Clone, Copy, Debug)]
pub struct EngineCapabilities {
    /// Read-only forward passes may run concurrently on one loaded model.
    pub concurrent_evaluation: bool,
}

/// The native inference engine the bridge drives.
///
/// Both calls block; the runtime only ever invokes them from worker threads.
pub trait Engine: Send + Sync + 'static {
    type Model: EngineModel;

    fn name(&self) -> &'static str;
    fn default_device(&self) -> Device;
    fn capabilities(&self) -> EngineCapabilities;
    fn load(&self, path: &Path, device: &Device) -> Result<Self::Model>;
}

pub trait EngineModel: Send + Sync + 'static {
    /// An empty `outputs` list asks for the model's default outputs.
    fn evaluate(
        &self,
        inputs: &InputTensorSet,
        outputs: &OutputNameList,
        device: &Device,
    ) -> Result<Vec<OutputTensor>>;
}
