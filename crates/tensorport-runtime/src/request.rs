use tensorport_core::{DataFormat, Device, IOName, Result, ShapeMap, Tensor};
use tokio::sync::oneshot;

/// One output the caller wants back, and where.
#[derive(Clone, Debug)]
pub struct OutputRequest {
    pub name: IOName,
    pub device: Device,
    pub format: Option<DataFormat>,
}

impl OutputRequest {
    pub fn host(name: impl Into<String>) -> Self {
        Self {
            name: IOName(name.into()),
            device: Device::Cpu,
            format: None,
        }
    }
}

#[derive(Debug)]
pub struct InferenceRequest {
    pub shapes: ShapeMap,
    pub inputs: Vec<(IOName, Tensor)>,
    /// Empty means every model output, on the host.
    pub outputs: Vec<OutputRequest>,
    pub enqueued_at: std::time::Instant,
    pub resp_tx: oneshot::Sender<Result<InferenceResponse>>,
}

#[derive(Debug)]
pub struct InferenceResponse {
    pub outputs: Vec<(IOName, Tensor)>,
    pub timings: Timings,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Timings {
    pub queued_us: u64,
    pub backend_us: u64,
}
