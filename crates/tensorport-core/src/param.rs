use std::path::PathBuf;

use bytes::Bytes;

use crate::{Device, Shape, ShapeMap};

/// Where the serialized model comes from.
#[derive(Clone, Debug)]
pub enum ModelSource {
    Buffer(Bytes),
    Path(PathBuf),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptimizationLevel {
    Disable,
    Basic,
    Extended,
    #[default]
    All,
}

#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub optimization: OptimizationLevel,
    pub intra_op_threads: Option<usize>,
    pub inter_op_threads: Option<usize>,
}

/// Everything a session needs to load one model on one device.
#[derive(Clone, Debug)]
pub struct InferenceParam {
    pub source: ModelSource,
    /// Weight shards stored next to the model. Non-empty forces path loading.
    pub external_data: Vec<PathBuf>,
    pub max_shapes: ShapeMap,
    pub device: Device,
    pub options: SessionOptions,
}

impl InferenceParam {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(ModelSource::Path(path.into()))
    }

    pub fn from_buffer(bytes: impl Into<Bytes>) -> Self {
        Self::new(ModelSource::Buffer(bytes.into()))
    }

    fn new(source: ModelSource) -> Self {
        Self {
            source,
            external_data: Vec::new(),
            max_shapes: ShapeMap::new(),
            device: Device::Cpu,
            options: SessionOptions::default(),
        }
    }

    pub fn with_external_data(mut self, path: impl Into<PathBuf>) -> Self {
        self.external_data.push(path.into());
        self
    }

    pub fn with_max_shape(mut self, name: impl Into<String>, shape: impl Into<Shape>) -> Self {
        self.max_shapes.insert(name.into(), shape.into());
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }
}
