//! Conversion of host input values into tensor blocks.
//!
//! Hosts hand over one of three shapes and nothing says which one it is:
//!
//! - a keyed mapping `{"x": [[..], ..], "y": [[..], ..]}`, one named batch per key;
//! - an array of batches `[[[..], ..], [[..], ..]]`, one positional batch each;
//! - a single batch `[[..], [..]]` of samples.
//!
//! [`classify`] decides which by probing the first element, then
//! [`build`] flattens each batch into a [`TensorBlock`].

use serde_json::{Map, Value};

use crate::{BridgeError, IOName, InputTensorSet, Result, TensorBlock};

/// The layout [`classify`] found in a host input value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputLayout<'a> {
    /// The whole sequence is one batch of samples.
    SingleBatch(&'a [Value]),
    /// Each element of the sequence is its own batch.
    MultiBatch(&'a [Value]),
    /// Each key names an input; its value is one batch.
    NamedBatches(&'a Map<String, Value>),
}

pub fn classify(input: &Value) -> Result<InputLayout<'_>> {
    match input {
        Value::Object(map) => Ok(InputLayout::NamedBatches(map)),
        Value::Array(items) => {
            if is_array_of_batches(items) {
                Ok(InputLayout::MultiBatch(items))
            } else {
                Ok(InputLayout::SingleBatch(items))
            }
        }
        other => Err(BridgeError::usage(format!(
            "inputs must be a mapping or an array, got {}",
            value_kind(other)
        ))),
    }
}

// Only element 0 is probed: the first sample of the first batch decides.
fn is_array_of_batches(items: &[Value]) -> bool {
    let Some(Value::Array(first)) = items.first() else {
        return false;
    };
    matches!(first.first(), Some(Value::Array(nested)) if !nested.is_empty())
}

/// Build the input tensor set for one evaluation.
pub fn build(input: &Value) -> Result<InputTensorSet> {
    let set = match classify(input)? {
        InputLayout::SingleBatch(samples) => {
            InputTensorSet::Positional(vec![flatten_batch(None, samples)])
        }
        InputLayout::MultiBatch(batches) => InputTensorSet::Positional(
            batches
                .iter()
                .map(|batch| flatten_batch(None, as_samples(batch)))
                .collect(),
        ),
        InputLayout::NamedBatches(map) => InputTensorSet::Named(
            map.iter()
                .map(|(name, batch)| {
                    flatten_batch(Some(IOName::from(name.as_str())), as_samples(batch))
                })
                .collect(),
        ),
    };
    Ok(set)
}

// A batch that is not an array has no samples.
fn as_samples(batch: &Value) -> &[Value] {
    match batch {
        Value::Array(samples) => samples,
        _ => &[],
    }
}

fn flatten_batch(name: Option<IOName>, samples: &[Value]) -> TensorBlock {
    let mut values = Vec::new();
    for sample in samples {
        if let Value::Array(items) = sample {
            values.extend(items.iter().map(coerce_f32));
        }
    }
    TensorBlock {
        name,
        sample_count: samples.len(),
        values,
    }
}

/// Host number coercion, narrowed to f32. Anything without a numeric reading
/// becomes 0.
pub fn coerce_f32(value: &Value) -> f32 {
    match value {
        Value::Number(n) => n.as_f64().map_or(0.0, |v| v as f32),
        Value::Bool(true) => 1.0,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map_or(0.0, |v| v as f32),
        _ => 0.0,
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}
