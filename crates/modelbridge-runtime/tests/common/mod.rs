#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use modelbridge_core::{
    BridgeError, Device, Engine, EngineCapabilities, EngineModel, InputTensorSet,
    OutputNameList, OutputTensor, Result, Shape,
};
use modelbridge_runtime::{Bridge, HostLoop, ModelHandle};
use serde_json::{json, Value};

/// Dense model mapping `features` inputs straight through to output `y`.
pub fn identity_model(features: usize) -> Value {
    let weights: Vec<Vec<f32>> = (0..features)
        .map(|r| (0..features).map(|c| if r == c { 1.0 } else { 0.0 }).collect())
        .collect();
    json!({
        "inputs": [{"name": "x", "features": features}],
        "outputs": [{"name": "y", "weights": weights}]
    })
}

pub fn write_model(dir: &Path, file: &str, doc: &Value) -> anyhow::Result<PathBuf> {
    let path = dir.join(file);
    std::fs::write(&path, doc.to_string()).with_context(|| format!("writing {file}"))?;
    Ok(path)
}

/// Load and drive the host loop until the load is delivered.
pub fn load_now<E: Engine>(bridge: &Bridge<E>, path: &Path) -> Result<ModelHandle<E>> {
    let slot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    bridge.load_model(path, move |result| {
        assert!(sink.borrow_mut().replace(result).is_none(), "delivered twice");
    })?;
    bridge.run_until_idle()?;
    let delivered = slot.borrow_mut().take();
    delivered.unwrap_or_else(|| Err(BridgeError::internal("load never delivered")))
}

pub fn evaluate_now<E: Engine>(
    host: &HostLoop,
    handle: &ModelHandle<E>,
    inputs: &Value,
    output_names: Option<&Value>,
) -> Result<Value> {
    let slot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    handle.evaluate(inputs, output_names, move |result| {
        assert!(sink.borrow_mut().replace(result).is_none(), "delivered twice");
    })?;
    host.run_until_idle()?;
    let delivered = slot.borrow_mut().take();
    delivered.unwrap_or_else(|| Err(BridgeError::internal("evaluation never delivered")))
}

/// Counters shared between a test and a [`ScriptedEngine`].
#[derive(Clone, Default)]
pub struct Probe {
    pub loads: Arc<AtomicUsize>,
    pub evaluations: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

impl Probe {
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

/// Engine whose behaviour is driven by the request:
///
/// - loading a path named `panic.model` panics, `broken.model` fails;
/// - evaluating a named input called `panic` panics, `fail` fails;
/// - anything else echoes each block back as `out{i}` shaped
///   `[samples, features]`, after holding the call for `hold`.
pub struct ScriptedEngine {
    pub concurrent: bool,
    pub hold: Duration,
    pub probe: Probe,
}

impl ScriptedEngine {
    pub fn new(concurrent: bool, hold: Duration) -> (Self, Probe) {
        let probe = Probe::default();
        (
            Self {
                concurrent,
                hold,
                probe: probe.clone(),
            },
            probe,
        )
    }
}

pub struct ScriptedModel {
    hold: Duration,
    probe: Probe,
}

impl Engine for ScriptedEngine {
    type Model = ScriptedModel;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn default_device(&self) -> Device {
        Device::Cpu
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            concurrent_evaluation: self.concurrent,
        }
    }

    fn load(&self, path: &Path, _device: &Device) -> Result<Self::Model> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        match path.file_name().and_then(|n| n.to_str()) {
            Some("panic.model") => panic!("loader crashed"),
            Some("broken.model") => Err(BridgeError::internal("corrupt header")),
            _ => Ok(ScriptedModel {
                hold: self.hold,
                probe: self.probe.clone(),
            }),
        }
    }
}

impl EngineModel for ScriptedModel {
    fn evaluate(
        &self,
        inputs: &InputTensorSet,
        _outputs: &OutputNameList,
        _device: &Device,
    ) -> Result<Vec<OutputTensor>> {
        self.probe.evaluations.fetch_add(1, Ordering::SeqCst);
        let now = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.hold);
        self.probe.active.fetch_sub(1, Ordering::SeqCst);

        let trigger = inputs
            .blocks()
            .first()
            .and_then(|b| b.name.as_ref())
            .map(|n| n.as_str().to_string());
        match trigger.as_deref() {
            Some("panic") => panic!("forward pass crashed"),
            Some("fail") => return Err(BridgeError::shape("scripted shape failure")),
            _ => {}
        }

        inputs
            .blocks()
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let features = block
                    .uniform_width()
                    .ok_or_else(|| BridgeError::shape("ragged input"))?;
                OutputTensor::new(
                    format!("out{i}"),
                    Shape::from_slice(&[block.sample_count, features]),
                    block.values.clone(),
                )
            })
            .collect()
    }
}
