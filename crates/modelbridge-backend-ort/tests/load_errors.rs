use std::path::PathBuf;

use modelbridge_backend_ort::OrtEngine;
use modelbridge_core::{Device, Engine, ErrorKind};

#[test]
fn missing_model_is_a_load_error() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../models/does-not-exist.onnx");

    let engine = OrtEngine::new();
    let err = engine.load(&path, &Device::Cpu).err().expect("load should fail");

    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(err.to_string().contains("model file not found"), "{err}");
}

#[test]
fn ort_engine_serializes_evaluations() {
    let engine = OrtEngine::new();
    assert_eq!(engine.name(), "onnxruntime");
    assert!(!engine.capabilities().concurrent_evaluation);
}
