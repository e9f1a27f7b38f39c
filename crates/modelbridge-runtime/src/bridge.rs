use std::path::Path;
use std::sync::Arc;

use modelbridge_core::{Device, Engine, Result};
use serde_json::Value;
use tracing::debug;

use crate::load::{self, LoadRequest};
use crate::{BridgeConfig, ConfigError, HostLoop, ModelHandle, TaskId};

/// Entry point for a host: owns the engine, the host loop and the device
/// models are loaded on.
pub struct Bridge<E: Engine> {
    engine: Arc<E>,
    host: HostLoop,
    device: Device,
    serialize_evaluations: bool,
}

impl<E: Engine> Bridge<E> {
    pub fn new(engine: E, config: &BridgeConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let device = config
            .device_override()?
            .unwrap_or_else(|| engine.default_device());
        let serialize_evaluations =
            config.engine.serialize_evaluations || !engine.capabilities().concurrent_evaluation;
        let host = HostLoop::new(&config.runtime)?;

        debug!(
            engine = engine.name(),
            %device,
            serialize_evaluations,
            "bridge ready"
        );
        Ok(Self {
            engine: Arc::new(engine),
            host,
            device,
            serialize_evaluations,
        })
    }

    pub fn with_defaults(engine: E) -> std::result::Result<Self, ConfigError> {
        Self::new(engine, &BridgeConfig::default())
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn host(&self) -> &HostLoop {
        &self.host
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Load a model asynchronously. `completion` receives the bound handle or
    /// the load error, exactly once, from a later `run_*` call on the host loop.
    pub fn load_model<C>(&self, path: impl AsRef<Path>, completion: C) -> Result<TaskId>
    where
        C: FnOnce(Result<ModelHandle<E>>) + 'static,
    {
        let request = LoadRequest {
            path: path.as_ref().to_path_buf(),
            device: self.device.clone(),
            serialize: self.serialize_evaluations,
        };
        load::submit(&self.host, &self.engine, request, completion)
    }

    /// Same as [`ModelHandle::evaluate`].
    pub fn evaluate<C>(
        &self,
        handle: &ModelHandle<E>,
        inputs: &Value,
        output_names: Option<&Value>,
        completion: C,
    ) -> Result<TaskId>
    where
        C: FnOnce(Result<Value>) + 'static,
    {
        handle.evaluate(inputs, output_names, completion)
    }

    pub fn run_until_idle(&self) -> Result<usize> {
        self.host.run_until_idle()
    }

    pub fn shutdown(&self) {
        self.host.shutdown();
    }
}
