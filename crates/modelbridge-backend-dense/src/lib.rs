//! Pure-Rust engine for dense affine models.
//!
//! A model file is JSON:
//!
//! ```json
//! { "inputs":  [{ "name": "x", "features": 2 }],
//!   "outputs": [{ "name": "y", "weights": [[1.0, 0.0], [0.0, 1.0]], "bias": [0.0, 0.0] }] }
//! ```
//!
//! Every output computes `W · concat(inputs) + b` per sample, with the inputs
//! concatenated in declaration order.

use std::path::Path;

use anyhow::{ensure, Context};
use modelbridge_core::{
    BridgeError, Device, Engine, EngineCapabilities, EngineModel, IOName, InputTensorSet,
    OutputNameList, OutputTensor, Result, Shape, TensorBlock,
};
use serde::Deserialize;
use tracing::debug;

pub struct DenseEngine;

impl DenseEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DenseEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DenseModelFile {
    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<OutputDecl>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InputDecl {
    pub name: String,
    pub features: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    pub weights: Vec<Vec<f32>>,
    #[serde(default)]
    pub bias: Option<Vec<f32>>,
}

struct DenseInput {
    name: IOName,
    features: usize,
}

struct DenseOutput {
    name: IOName,
    // row-major, rows x in_features
    weights: Vec<f32>,
    bias: Vec<f32>,
    rows: usize,
}

pub struct DenseModel {
    inputs: Vec<DenseInput>,
    outputs: Vec<DenseOutput>,
    in_features: usize,
}

impl Engine for DenseEngine {
    type Model = DenseModel;

    fn name(&self) -> &'static str {
        "dense"
    }

    fn default_device(&self) -> Device {
        Device::Cpu
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            concurrent_evaluation: true,
        }
    }

    fn load(&self, path: &Path, device: &Device) -> Result<Self::Model> {
        if *device != Device::Cpu {
            return Err(BridgeError::load(
                path,
                format!("dense engine runs on cpu only, got {device}"),
            ));
        }
        let model = read_model(path).map_err(|e| BridgeError::load(path, format!("{e:#}")))?;
        debug!(
            path = %path.display(),
            inputs = model.inputs.len(),
            outputs = model.outputs.len(),
            "dense model loaded"
        );
        Ok(model)
    }
}

fn read_model(path: &Path) -> anyhow::Result<DenseModel> {
    let raw = std::fs::read_to_string(path).context("failed to read model file")?;
    let file: DenseModelFile = serde_json::from_str(&raw).context("failed to parse model file")?;
    DenseModel::from_file(file)
}

impl DenseModel {
    pub fn from_file(file: DenseModelFile) -> anyhow::Result<Self> {
        ensure!(!file.inputs.is_empty(), "model declares no inputs");
        ensure!(!file.outputs.is_empty(), "model declares no outputs");

        let mut inputs = Vec::with_capacity(file.inputs.len());
        for decl in file.inputs {
            ensure!(decl.features > 0, "input {} has zero features", decl.name);
            ensure!(
                inputs.iter().all(|i: &DenseInput| i.name.0 != decl.name),
                "duplicate input {}",
                decl.name
            );
            inputs.push(DenseInput {
                name: IOName(decl.name),
                features: decl.features,
            });
        }
        let in_features = inputs.iter().map(|i| i.features).sum::<usize>();

        let mut outputs = Vec::with_capacity(file.outputs.len());
        for decl in file.outputs {
            let rows = decl.weights.len();
            let mut weights = Vec::with_capacity(rows * in_features);
            for (r, row) in decl.weights.iter().enumerate() {
                ensure!(
                    row.len() == in_features,
                    "output {} row {r} has {} weights, expected {in_features}",
                    decl.name,
                    row.len()
                );
                weights.extend_from_slice(row);
            }
            let bias = decl.bias.unwrap_or_else(|| vec![0.0; rows]);
            ensure!(
                bias.len() == rows,
                "output {} has {} bias terms for {rows} rows",
                decl.name,
                bias.len()
            );
            outputs.push(DenseOutput {
                name: IOName(decl.name),
                weights,
                bias,
                rows,
            });
        }

        Ok(Self {
            inputs,
            outputs,
            in_features,
        })
    }

    pub fn input_names(&self) -> Vec<IOName> {
        self.inputs.iter().map(|i| i.name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<IOName> {
        self.outputs.iter().map(|o| o.name.clone()).collect()
    }

    /// Match the given blocks to declared inputs, in declaration order.
    fn bind_inputs<'a>(&self, inputs: &'a InputTensorSet) -> Result<Vec<&'a TensorBlock>> {
        let blocks = inputs.blocks();
        if blocks.len() != self.inputs.len() {
            return Err(BridgeError::shape(format!(
                "expected {} inputs, got {}",
                self.inputs.len(),
                blocks.len()
            )));
        }

        match inputs {
            InputTensorSet::Positional(blocks) => Ok(blocks.iter().collect()),
            InputTensorSet::Named(blocks) => self
                .inputs
                .iter()
                .map(|decl| {
                    blocks
                        .iter()
                        .find(|b| b.name.as_ref() == Some(&decl.name))
                        .ok_or_else(|| BridgeError::shape(format!("missing input {}", decl.name)))
                })
                .collect(),
        }
    }

    fn select_outputs(&self, names: &OutputNameList) -> Result<Vec<&DenseOutput>> {
        if names.is_empty() {
            return Ok(self.outputs.iter().collect());
        }
        names
            .names()
            .iter()
            .map(|name| {
                self.outputs
                    .iter()
                    .find(|o| &o.name == name)
                    .ok_or_else(|| BridgeError::internal(format!("unknown output {name}")))
            })
            .collect()
    }
}

impl EngineModel for DenseModel {
    fn evaluate(
        &self,
        inputs: &InputTensorSet,
        outputs: &OutputNameList,
        device: &Device,
    ) -> Result<Vec<OutputTensor>> {
        if *device != Device::Cpu {
            return Err(BridgeError::internal(format!(
                "dense engine runs on cpu only, got {device}"
            )));
        }

        let blocks = self.bind_inputs(inputs)?;
        let selected = self.select_outputs(outputs)?;

        let samples = blocks.first().map_or(0, |b| b.sample_count);
        for (block, decl) in blocks.iter().zip(&self.inputs) {
            if block.sample_count != samples {
                return Err(BridgeError::shape(format!(
                    "input {} has {} samples, expected {samples}",
                    decl.name, block.sample_count
                )));
            }
            let expected = samples * decl.features;
            if block.values.len() != expected {
                return Err(BridgeError::shape(format!(
                    "input {} expects {samples} x {} values, got {}",
                    decl.name,
                    decl.features,
                    block.values.len()
                )));
            }
        }

        // One concatenated feature row per sample.
        let mut rows = vec![0.0f32; samples * self.in_features];
        let mut offset = 0;
        for (block, decl) in blocks.iter().zip(&self.inputs) {
            for s in 0..samples {
                let src = &block.values[s * decl.features..(s + 1) * decl.features];
                let dst = s * self.in_features + offset;
                rows[dst..dst + decl.features].copy_from_slice(src);
            }
            offset += decl.features;
        }

        selected
            .into_iter()
            .map(|out| {
                let mut values = Vec::with_capacity(samples * out.rows);
                for x in rows.chunks(self.in_features).take(samples) {
                    for r in 0..out.rows {
                        let w = &out.weights[r * self.in_features..(r + 1) * self.in_features];
                        let dot = w.iter().zip(x).map(|(a, b)| a * b).sum::<f32>();
                        values.push(dot + out.bias[r]);
                    }
                }
                OutputTensor::new(
                    out.name.clone(),
                    Shape::from_slice(&[samples, out.rows]),
                    values,
                )
            })
            .collect()
    }
}
