use serde_json::{Map, Number, Value};

use crate::input::value_kind;
use crate::{BridgeError, IOName, OutputNameList, OutputTensor, Result};

/// Normalize the optional list of requested output names.
///
/// Absent, `null` and `[]` all mean "engine default". A name requested more
/// than once is kept at its first position only, since the host reply keys
/// outputs by name.
pub fn extract_output_names(requested: Option<&Value>) -> Result<OutputNameList> {
    let items = match requested {
        None | Some(Value::Null) => return Ok(OutputNameList::default()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(BridgeError::usage(format!(
                "output names must be an array of strings, got {}",
                value_kind(other)
            )))
        }
    };

    let mut names: Vec<IOName> = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let name = match item {
            Value::String(s) => IOName(s.clone()),
            Value::Number(n) => IOName(n.to_string()),
            Value::Bool(b) => IOName(b.to_string()),
            other => {
                return Err(BridgeError::usage(format!(
                    "output name {idx} must be a string, got {}",
                    value_kind(other)
                )))
            }
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(OutputNameList(names))
}

/// Convert engine outputs into the host convention: a mapping from output
/// name to samples, each sample an array of features.
pub fn outputs_to_value(outputs: &[OutputTensor]) -> Result<Value> {
    let mut map = Map::with_capacity(outputs.len());
    for output in outputs {
        map.insert(output.name.0.clone(), tensor_to_samples(output)?);
    }
    Ok(Value::Object(map))
}

fn tensor_to_samples(tensor: &OutputTensor) -> Result<Value> {
    let numel = tensor.shape.numel();
    if numel != tensor.values.len() {
        return Err(BridgeError::internal(format!(
            "output {} has {} values but shape {:?} needs {numel}",
            tensor.name,
            tensor.values.len(),
            tensor.shape.dims()
        )));
    }

    // Rank 0 is one sample with one feature.
    let samples = tensor.shape.dims().first().copied().unwrap_or(1);
    if samples == 0 {
        return Ok(Value::Array(Vec::new()));
    }
    let features = numel / samples;

    let rows = if features == 0 {
        vec![Value::Array(Vec::new()); samples]
    } else {
        tensor
            .values
            .chunks(features)
            .map(|row| Value::Array(row.iter().map(|v| f32_to_value(*v)).collect()))
            .collect()
    };
    Ok(Value::Array(rows))
}

// Host values have no NaN or infinity; those become null.
fn f32_to_value(v: f32) -> Value {
    Number::from_f64(f64::from(v)).map_or(Value::Null, Value::Number)
}
