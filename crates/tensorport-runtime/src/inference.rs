use tensorport_core::{DataFormat, Device, ModelSpec, NativeBackend, Result, ShapeMap, Tensor};

use crate::InferenceSession;

/// Object-safe view of a session, so callers can hold any backend behind a `Box`.
pub trait Inference: Send {
    fn backend_name(&self) -> &'static str;
    fn init(&mut self) -> Result<()>;
    fn deinit(&mut self);
    fn reshape(&mut self, shapes: &ShapeMap) -> Result<()>;
    fn run(&mut self) -> Result<()>;

    fn set_input_tensor(&mut self, name: &str, tensor: Tensor) -> Result<()>;
    fn clear_input_tensors(&mut self);
    fn input_tensor_mut(&mut self, name: &str) -> Option<&mut Tensor>;

    fn output_tensor(
        &self,
        name: &str,
        device: &Device,
        copy: bool,
        format: Option<DataFormat>,
    ) -> Result<Tensor>;
    fn output_tensor_after_run(
        &self,
        name: &str,
        device: &Device,
        copy: bool,
        format: Option<DataFormat>,
    ) -> Option<Tensor>;

    fn model_spec(&self) -> Option<ModelSpec>;
}

impl<B: NativeBackend> Inference for InferenceSession<B> {
    fn backend_name(&self) -> &'static str {
        InferenceSession::backend_name(self)
    }

    fn init(&mut self) -> Result<()> {
        InferenceSession::init(self)
    }

    fn deinit(&mut self) {
        InferenceSession::deinit(self)
    }

    fn reshape(&mut self, shapes: &ShapeMap) -> Result<()> {
        InferenceSession::reshape(self, shapes)
    }

    fn run(&mut self) -> Result<()> {
        InferenceSession::run(self)
    }

    fn set_input_tensor(&mut self, name: &str, tensor: Tensor) -> Result<()> {
        InferenceSession::set_input_tensor(self, name, tensor)
    }

    fn clear_input_tensors(&mut self) {
        InferenceSession::clear_input_tensors(self)
    }

    fn input_tensor_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        InferenceSession::input_tensor_mut(self, name)
    }

    fn output_tensor(
        &self,
        name: &str,
        device: &Device,
        copy: bool,
        format: Option<DataFormat>,
    ) -> Result<Tensor> {
        InferenceSession::output_tensor(self, name, device, copy, format)
    }

    fn output_tensor_after_run(
        &self,
        name: &str,
        device: &Device,
        copy: bool,
        format: Option<DataFormat>,
    ) -> Option<Tensor> {
        InferenceSession::output_tensor_after_run(self, name, device, copy, format)
    }

    fn model_spec(&self) -> Option<ModelSpec> {
        InferenceSession::model_spec(self)
    }
}
