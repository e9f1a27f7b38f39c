//! Data shaping for the modelbridge host bridge: host values in, typed tensor
//! blocks out, and the contract the native inference engine implements.

pub mod engine;
pub mod error;
pub mod input;
pub mod output;
pub mod tensor;

pub use engine::*;
pub use error::*;
pub use output::{extract_output_names, outputs_to_value};
pub use tensor::*;
