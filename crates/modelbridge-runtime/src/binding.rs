//! Untyped call surface for host bindings.
//!
//! A binding forwards whatever the host passed: a list of values ending, if
//! the caller got it right, in a completion callback. These functions check
//! the list the way the host API documents it and raise a usage error,
//! without dispatching, when it does not match.

use std::fmt;

use modelbridge_core::{BridgeError, Engine, Result};
use serde_json::Value;

use crate::{Bridge, ModelHandle, TaskId};

const LOAD_USAGE: &str =
    "expected arguments are: model path[string], completion callback [function]";
const EVALUATE_USAGE: &str = "expected arguments are: input args[key: input node name (string), value: input data (array of arrays)], optional: output node names[array of strings], completion callback [function]";

/// What a completion callback receives on success.
pub enum HostReply<E: Engine> {
    Model(ModelHandle<E>),
    Outputs(Value),
}

impl<E: Engine> fmt::Debug for HostReply<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(handle) => f.debug_tuple("Model").field(handle).finish(),
            Self::Outputs(value) => f.debug_tuple("Outputs").field(value).finish(),
        }
    }
}

pub type HostCallback<E> = Box<dyn FnOnce(Result<HostReply<E>>)>;

/// One argument of a host call.
pub enum HostArg<E: Engine> {
    Value(Value),
    Callback(HostCallback<E>),
}

impl<E: Engine> HostArg<E> {
    pub fn callback(f: impl FnOnce(Result<HostReply<E>>) + 'static) -> Self {
        Self::Callback(Box::new(f))
    }

    fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Callback(_) => None,
        }
    }
}

impl<E: Engine> From<Value> for HostArg<E> {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// `loadModel(path, callback)`.
pub fn invoke_load_model<E: Engine>(
    bridge: &Bridge<E>,
    args: Vec<HostArg<E>>,
) -> Result<TaskId> {
    let mut args = args.into_iter();
    let (Some(HostArg::Value(Value::String(path))), Some(HostArg::Callback(callback))) =
        (args.next(), args.next())
    else {
        return Err(BridgeError::usage(LOAD_USAGE));
    };

    bridge.load_model(path, move |result| {
        callback(result.map(HostReply::Model));
    })
}

/// `model.eval(inputs, [outputNames,] callback)`. The callback is always the
/// last argument; output names are read from the second argument only when
/// more than two arguments are given.
pub fn invoke_evaluate<E: Engine>(
    handle: &ModelHandle<E>,
    mut args: Vec<HostArg<E>>,
) -> Result<TaskId> {
    if args.len() < 2 {
        return Err(BridgeError::usage(EVALUATE_USAGE));
    }
    let Some(HostArg::Callback(callback)) = args.pop() else {
        return Err(BridgeError::usage(EVALUATE_USAGE));
    };

    let inputs = match args[0].as_value() {
        Some(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => return Err(BridgeError::usage(EVALUATE_USAGE)),
    };
    let output_names = if args.len() > 1 {
        match args[1].as_value() {
            Some(value @ Value::Array(_)) => Some(value),
            _ => return Err(BridgeError::usage(EVALUATE_USAGE)),
        }
    } else {
        None
    };

    handle.evaluate(inputs, output_names, move |result| {
        callback(result.map(HostReply::Outputs));
    })
}
