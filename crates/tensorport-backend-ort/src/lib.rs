//! ONNX Runtime behind the tensorport [`NativeBackend`] seam.
//!
//! Inputs are copied into ORT values at bind time and outputs are bound to
//! host memory, so the runtime's pool only ever sees CPU bytes. The execution
//! provider (CPU or CUDA) decides where the graph itself runs.

mod convert;

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use ort::{
    memory::{AllocationDevice, AllocatorType, MemoryInfo, MemoryType},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
    value::DynValue,
};
use tensorport_core::{
    Device, NativeBackend, NativeSession, NativeSource, OptimizationLevel, SessionOptions,
    SlotInfo, Tensor,
};
use tracing::debug;

use crate::convert::{ort_value_to_tensor, slot_info, tensor_to_ort_value};

pub struct OrtBackend;

impl OrtBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrtBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// A committed ORT session plus the bindings staged for the next run.
pub struct OrtSession {
    bound_inputs: Vec<(String, DynValue)>,
    bound_outputs: Vec<String>,
    inputs: Vec<SlotInfo>,
    outputs: Vec<SlotInfo>,
    session: Session,
}

impl NativeBackend for OrtBackend {
    type Session = OrtSession;

    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn create_session(
        &self,
        source: NativeSource<'_>,
        device: &Device,
        options: &SessionOptions,
    ) -> Result<Self::Session> {
        let builder = Session::builder()
            .context("failed to create ORT session builder")?
            .with_optimization_level(optimization_level(options.optimization))
            .context("failed to configure ORT session builder")?;
        let builder = configure_threads(builder, options)?;
        let mut builder = configure_session_builder(builder, device)?;

        // ORT resolves external weight files relative to the model path, and
        // converts the path to the platform's native encoding itself.
        let session = match source {
            NativeSource::Buffer(bytes) => builder
                .commit_from_memory(bytes)
                .context("failed to load ONNX model from memory")?,
            NativeSource::Path(path) => builder
                .commit_from_file(path)
                .with_context(|| format!("failed to load ONNX model from {}", path.display()))?,
        };

        let inputs = session
            .inputs
            .iter()
            .map(|input| slot_info(&input.name, &input.input_type))
            .collect::<Result<Vec<_>>>()?;
        let outputs = session
            .outputs
            .iter()
            .map(|output| slot_info(&output.name, &output.output_type))
            .collect::<Result<Vec<_>>>()?;

        debug!(%device, inputs = inputs.len(), outputs = outputs.len(), "ORT session committed");
        Ok(OrtSession {
            bound_inputs: Vec::new(),
            bound_outputs: Vec::new(),
            inputs,
            outputs,
            session,
        })
    }
}

impl NativeSession for OrtSession {
    fn inputs(&self) -> Vec<SlotInfo> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<SlotInfo> {
        self.outputs.clone()
    }

    fn bind_input(&mut self, name: &str, tensor: &Tensor) -> Result<()> {
        let value = tensor_to_ort_value(tensor)
            .with_context(|| format!("failed to convert input `{name}`"))?;
        self.bound_inputs.push((name.to_string(), value));
        Ok(())
    }

    fn bind_output(&mut self, name: &str, device: &Device) -> Result<()> {
        if !device.is_host() {
            bail!("output `{name}` requested on {device}; ORT outputs are bound to host memory");
        }
        self.bound_outputs.push(name.to_string());
        Ok(())
    }

    fn execute(&mut self) -> Result<Vec<Tensor>> {
        let mut binding = self
            .session
            .create_binding()
            .context("failed to create ORT IO binding")?;
        for (name, value) in &self.bound_inputs {
            binding
                .bind_input(name.as_str(), value)
                .with_context(|| format!("failed to bind input `{name}`"))?;
        }

        let host = MemoryInfo::new(
            AllocationDevice::CPU,
            0,
            AllocatorType::Device,
            MemoryType::Default,
        )?;
        for name in &self.bound_outputs {
            binding
                .bind_output_to_device(name.as_str(), &host)
                .with_context(|| format!("failed to bind output `{name}`"))?;
        }

        let outputs = self.session.run_binding(&binding)?;
        let mut produced = HashMap::with_capacity(outputs.len());
        for (name, value) in outputs.iter() {
            produced.insert(name.to_string(), ort_value_to_tensor(name, &value)?);
        }

        self.bound_outputs
            .iter()
            .map(|name| {
                produced
                    .remove(name)
                    .with_context(|| format!("ORT produced no value for output `{name}`"))
            })
            .collect()
    }

    fn clear_bindings(&mut self) {
        self.bound_inputs.clear();
        self.bound_outputs.clear();
    }
}

fn optimization_level(level: OptimizationLevel) -> GraphOptimizationLevel {
    match level {
        OptimizationLevel::Disable => GraphOptimizationLevel::Disable,
        OptimizationLevel::Basic => GraphOptimizationLevel::Level1,
        OptimizationLevel::Extended => GraphOptimizationLevel::Level2,
        OptimizationLevel::All => GraphOptimizationLevel::Level3,
    }
}

fn configure_threads(
    mut builder: SessionBuilder,
    options: &SessionOptions,
) -> Result<SessionBuilder> {
    if let Some(n) = options.intra_op_threads {
        builder = builder
            .with_intra_threads(n)
            .context("failed to set ORT intra-op threads")?;
    }
    if let Some(n) = options.inter_op_threads {
        builder = builder
            .with_inter_threads(n)
            .context("failed to set ORT inter-op threads")?;
    }
    Ok(builder)
}

fn configure_session_builder(builder: SessionBuilder, device: &Device) -> Result<SessionBuilder> {
    match device {
        Device::Cpu => Ok(builder),
        Device::Cuda { device_id } => configure_cuda(builder, *device_id),
    }
}

fn configure_cuda(builder: SessionBuilder, device_id: u32) -> Result<SessionBuilder> {
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
        bail!("CUDA requested but tensorport-backend-ort was built without the `cuda` feature")
    }
}
