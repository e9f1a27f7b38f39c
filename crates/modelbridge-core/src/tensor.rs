use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::{BridgeError, Result};

/// Compute device a model is loaded on and evaluated against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda { device_id: u32 },
}

impl FromStr for Device {
    type Err = BridgeError;

    /// Parse a device string like "cpu", "cuda", "cuda:0", "cuda:1".
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        if s == "cpu" {
            return Ok(Self::Cpu);
        }
        if s == "cuda" {
            return Ok(Self::Cuda { device_id: 0 });
        }
        if let Some(rest) = s.strip_prefix("cuda:") {
            let device_id = rest
                .parse()
                .map_err(|_| BridgeError::usage(format!("invalid cuda device id: {rest}")))?;
            return Ok(Self::Cuda { device_id });
        }
        Err(BridgeError::usage(format!(
            "unsupported device: {s} (expected cpu or cuda:N)"
        )))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda { device_id } => write!(f, "cuda:{device_id}"),
        }
    }
}

/// Engine-side identifier of a model input or output.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IOName(pub String);

impl IOName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IOName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IOName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for IOName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }
    pub fn dims(&self) -> &[usize] {
        &self.0
    }
    pub fn rank(&self) -> usize {
        self.0.len()
    }
    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>()
    }
}

/// A named or positional bundle of flattened sample data.
///
/// `values` holds every sample's items back to back in sample order. Samples
/// may differ in length; whether the block fits the model is for the engine
/// to decide.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TensorBlock {
    pub name: Option<IOName>,
    pub sample_count: usize,
    pub values: Vec<f32>,
}

impl TensorBlock {
    /// Items per sample when the values split evenly across samples.
    pub fn uniform_width(&self) -> Option<usize> {
        if self.sample_count == 0 {
            return self.values.is_empty().then_some(0);
        }
        self.values
            .len()
            .is_multiple_of(self.sample_count)
            .then(|| self.values.len() / self.sample_count)
    }
}

/// Input tensors for one evaluation. Blocks are either all positional or all
/// named, never a mix of both.
#[derive(Clone, Debug, PartialEq)]
pub enum InputTensorSet {
    Positional(Vec<TensorBlock>),
    Named(Vec<TensorBlock>),
}

impl InputTensorSet {
    pub fn blocks(&self) -> &[TensorBlock] {
        match self {
            Self::Positional(blocks) | Self::Named(blocks) => blocks,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks().is_empty()
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Self::Named(_))
    }

    /// Sample count shared by every block, or `None` when blocks disagree.
    pub fn sample_count(&self) -> Option<usize> {
        let mut counts = self.blocks().iter().map(|b| b.sample_count);
        let first = counts.next()?;
        counts.all(|c| c == first).then_some(first)
    }
}

/// Requested outputs. Empty means the engine picks its default outputs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputNameList(pub Vec<IOName>);

impl OutputNameList {
    pub fn names(&self) -> &[IOName] {
        &self.0
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// A dense f32 tensor produced by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputTensor {
    pub name: IOName,
    pub shape: Shape,
    pub values: Vec<f32>,
}

impl OutputTensor {
    pub fn new(name: impl Into<IOName>, shape: Shape, values: Vec<f32>) -> Result<Self> {
        let name = name.into();
        if shape.numel() != values.len() {
            return Err(BridgeError::internal(format!(
                "output {name} has {} values but shape {:?} needs {}",
                values.len(),
                shape.dims(),
                shape.numel()
            )));
        }
        Ok(Self {
            name,
            shape,
            values,
        })
    }
}
