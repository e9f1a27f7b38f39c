use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Context};
use modelbridge_core::{
    BridgeError, Device, Engine, EngineCapabilities, EngineModel, IOName, InputTensorSet,
    OutputNameList, OutputTensor, Result, Shape, TensorBlock,
};
use ort::{
    session::{builder::SessionBuilder, Session, SessionInputValue},
    tensor::TensorElementType,
    value::ValueType,
};
use tracing::debug;

pub struct OrtEngine;

impl OrtEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrtEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub struct OrtModel {
    session: Mutex<Session>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl Engine for OrtEngine {
    type Model = OrtModel;

    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn default_device(&self) -> Device {
        if cfg!(feature = "cuda") {
            Device::Cuda { device_id: 0 }
        } else {
            Device::Cpu
        }
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            concurrent_evaluation: false,
        }
    }

    fn load(&self, path: &Path, device: &Device) -> Result<Self::Model> {
        let model =
            load_session(path, device).map_err(|e| BridgeError::load(path, format!("{e:#}")))?;
        debug!(
            path = %path.display(),
            inputs = ?model.input_names,
            outputs = ?model.output_names,
            "onnx model loaded"
        );
        Ok(model)
    }
}

fn load_session(path: &Path, device: &Device) -> anyhow::Result<OrtModel> {
    if !path.exists() {
        bail!("model file not found");
    }

    let builder = Session::builder()
        .context("failed to create ORT session builder")?
        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
        .context("failed to configure ORT session builder")?;

    let builder = configure_session_builder(builder, device)?;

    let session = builder
        .commit_from_file(path)
        .context("failed to load ONNX model")?;

    let input_names = session.inputs.iter().map(|i| i.name.clone()).collect();
    let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();

    Ok(OrtModel {
        session: Mutex::new(session),
        input_names,
        output_names,
    })
}

fn configure_session_builder(
    builder: SessionBuilder,
    device: &Device,
) -> anyhow::Result<SessionBuilder> {
    match device {
        Device::Cpu => Ok(builder),
        Device::Cuda { device_id } => configure_cuda(builder, *device_id),
    }
}

fn configure_cuda(builder: SessionBuilder, device_id: u32) -> anyhow::Result<SessionBuilder> {
    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::cuda::CUDAExecutionProvider;
        let ep = CUDAExecutionProvider::default()
            .with_device_id(device_id as i32)
            .build();
        builder
            .with_execution_providers([ep])
            .context("failed to enable ORT CUDA execution provider")
    }
    #[cfg(not(feature = "cuda"))]
    {
        let _ = (builder, device_id);
        bail!("CUDA requested but modelbridge-backend-ort was built without the `cuda` feature")
    }
}

impl OrtModel {
    /// Pair each block with the session input it feeds.
    fn bind_inputs<'a>(
        &self,
        inputs: &'a InputTensorSet,
    ) -> Result<Vec<(String, &'a TensorBlock)>> {
        let blocks = inputs.blocks();
        if blocks.len() != self.input_names.len() {
            return Err(BridgeError::shape(format!(
                "expected {} inputs, got {}",
                self.input_names.len(),
                blocks.len()
            )));
        }

        match inputs {
            InputTensorSet::Positional(blocks) => Ok(self
                .input_names
                .iter()
                .cloned()
                .zip(blocks.iter())
                .collect()),
            InputTensorSet::Named(blocks) => blocks
                .iter()
                .map(|block| {
                    let name = block.name.as_ref().map(IOName::as_str).unwrap_or_default();
                    if self.input_names.iter().any(|n| n == name) {
                        Ok((name.to_string(), block))
                    } else {
                        Err(BridgeError::shape(format!("model has no input named {name:?}")))
                    }
                })
                .collect(),
        }
    }

    fn selected_outputs(&self, outputs: &OutputNameList) -> Result<Vec<String>> {
        if outputs.is_empty() {
            return Ok(self.output_names.clone());
        }
        outputs
            .names()
            .iter()
            .map(|name| {
                if self.output_names.iter().any(|n| n == name.as_str()) {
                    Ok(name.0.clone())
                } else {
                    Err(BridgeError::internal(format!("model has no output named {name}")))
                }
            })
            .collect()
    }
}

impl EngineModel for OrtModel {
    fn evaluate(
        &self,
        inputs: &InputTensorSet,
        outputs: &OutputNameList,
        _device: &Device,
    ) -> Result<Vec<OutputTensor>> {
        let bound = self.bind_inputs(inputs)?;
        let wanted = self.selected_outputs(outputs)?;

        let mut ort_inputs = Vec::with_capacity(bound.len());
        for (name, block) in bound {
            let value = block_to_ort_value(block)?;
            ort_inputs.push((name, SessionInputValue::from(value)));
        }

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let results = session
            .run(ort_inputs)
            .map_err(|e| BridgeError::internal(format!("onnxruntime run failed: {e}")))?;

        let mut produced = Vec::with_capacity(wanted.len());
        for (name, value) in results.iter() {
            if wanted.iter().any(|w| w == name) {
                produced.push(ort_value_to_tensor(name, &value)?);
            }
        }

        wanted
            .iter()
            .map(|name| {
                let idx = produced
                    .iter()
                    .position(|t| t.name.as_str() == name)
                    .ok_or_else(|| {
                        BridgeError::internal(format!("session produced no output {name}"))
                    })?;
                Ok(produced[idx].clone())
            })
            .collect()
    }
}

/// Feed a block as `[samples, features]`.
fn block_to_ort_value(block: &TensorBlock) -> Result<ort::value::DynValue> {
    let Some(features) = block.uniform_width() else {
        return Err(BridgeError::shape(format!(
            "{} values do not split evenly into {} samples",
            block.values.len(),
            block.sample_count
        )));
    };
    let shape = vec![block.sample_count, features];
    ort::value::Tensor::from_array((shape, block.values.clone()))
        .map(|t| t.into_dyn())
        .map_err(|e| BridgeError::internal(format!("failed to build input tensor: {e}")))
}

fn ort_value_to_tensor(name: &str, value: &ort::value::ValueRef<'_>) -> Result<OutputTensor> {
    let ValueType::Tensor { ty, shape, .. } = value.dtype() else {
        return Err(BridgeError::internal(format!("output {name} is not a tensor")));
    };
    if *ty != TensorElementType::Float32 {
        return Err(BridgeError::internal(format!(
            "output {name} has unsupported element type {ty}"
        )));
    }

    let dims: Vec<usize> = shape.iter().map(|d| (*d).max(0) as usize).collect();
    let array = value
        .try_extract_array::<f32>()
        .map_err(|e| BridgeError::internal(format!("failed to read output {name}: {e}")))?;
    let values = array.iter().copied().collect();

    OutputTensor::new(name, Shape::from_slice(&dims), values)
}
