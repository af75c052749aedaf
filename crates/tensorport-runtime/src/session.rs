use std::collections::HashMap;
use std::time::Instant;

use tensorport_core::{
    DataFormat, Device, InferenceParam, ModelSpec, NativeBackend, NativeSession, Result,
    SessionError, ShapeMap, SlotKind, Tensor, TensorSpec,
};
use tracing::{debug, error, info};

use crate::contract::{resolve_contract, Contract};
use crate::engine;
use crate::loader::{load_session, LoadStrategy};
use crate::materialize::materialize;
use crate::pool::TensorPool;

/// Everything that exists only while a model is loaded.
///
/// Field order is drop order: pool storage and external tensors go before
/// the native session they were bound to.
struct Loaded<S> {
    pool: TensorPool,
    external_inputs: HashMap<String, Tensor>,
    contract: Contract,
    batch_size: Option<usize>,
    strategy: LoadStrategy,
    native: S,
}

impl<S> Loaded<S> {
    fn refresh_batch(&mut self) {
        self.batch_size = self
            .pool
            .inputs()
            .iter()
            .next()
            .map(|(_, entry)| entry.current())
            .filter(|tensor| tensor.is_allocated())
            .and_then(|tensor| tensor.shape().batch());
    }
}

/// One model loaded into one backend instance.
///
/// Calls must be serialized by the owner; nothing here locks. Separate
/// sessions share nothing and can run on separate threads.
pub struct InferenceSession<B: NativeBackend> {
    backend: B,
    param: InferenceParam,
    state: Option<Loaded<B::Session>>,
}

impl<B: NativeBackend> InferenceSession<B> {
    pub fn new(backend: B, param: InferenceParam) -> Self {
        Self {
            backend,
            param,
            state: None,
        }
    }

    pub fn param(&self) -> &InferenceParam {
        &self.param
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Loads the model, resolves its contract and builds the tensor pool.
    ///
    /// Nothing is kept unless every step succeeds.
    pub fn init(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Err(SessionError::InvalidArgument(
                "session is already initialized, deinit it first".to_string(),
            ));
        }

        let (native, strategy) = load_session(&self.backend, &self.param)?;
        let contract = resolve_contract(&native, &self.param.max_shapes)?;
        // Pool storage is host staging memory; the backend moves it to its own device.
        let pool = TensorPool::build(&contract, &Device::Cpu);

        info!(
            backend = self.backend.name(),
            inputs = contract.inputs.len(),
            outputs = contract.outputs.len(),
            batch = ?contract.batch_size,
            "session initialized"
        );
        self.state = Some(Loaded {
            pool,
            external_inputs: HashMap::new(),
            batch_size: contract.batch_size,
            contract,
            strategy,
            native,
        });
        Ok(())
    }

    /// Releases tensors, then bindings, then the native session. Safe to call repeatedly.
    pub fn deinit(&mut self) {
        let Some(mut state) = self.state.take() else {
            return;
        };
        state.external_inputs.clear();
        state.pool.clear();
        state.native.clear_bindings();
        drop(state);
        info!(backend = self.backend.name(), "session released");
    }

    fn loaded(&self) -> Result<&Loaded<B::Session>> {
        self.state.as_ref().ok_or(SessionError::NotInitialized)
    }

    fn loaded_mut(&mut self) -> Result<&mut Loaded<B::Session>> {
        self.state.as_mut().ok_or(SessionError::NotInitialized)
    }

    pub fn reshape(&mut self, shapes: &ShapeMap) -> Result<()> {
        let state = self.loaded_mut()?;
        let changed = state.pool.reshape(shapes)?;
        if changed > 0 {
            state.refresh_batch();
            debug!(changed, batch = ?state.batch_size, "reshape applied");
        }
        Ok(())
    }

    pub fn run(&mut self) -> Result<()> {
        let state = self.loaded_mut()?;
        let started = Instant::now();
        engine::run_once(
            &mut state.native,
            &state.contract,
            &mut state.pool,
            &state.external_inputs,
        )?;
        debug!(elapsed_us = started.elapsed().as_micros() as u64, "run finished");
        Ok(())
    }

    pub fn output_tensor(
        &self,
        name: &str,
        device: &Device,
        copy: bool,
        format: Option<DataFormat>,
    ) -> Result<Tensor> {
        let state = self.loaded()?;
        let current = state
            .pool
            .outputs()
            .current(name)
            .ok_or_else(|| SessionError::not_found(SlotKind::Output, name))?;
        materialize(current, device, copy, format)
    }

    /// Like [`Self::output_tensor`], but logs the failure and returns `None`.
    pub fn output_tensor_after_run(
        &self,
        name: &str,
        device: &Device,
        copy: bool,
        format: Option<DataFormat>,
    ) -> Option<Tensor> {
        match self.output_tensor(name, device, copy, format) {
            Ok(tensor) => Some(tensor),
            Err(err) => {
                error!(%name, error = %err, "output tensor unavailable");
                None
            }
        }
    }

    /// Binds `tensor` to an input slot in place of the pool tensor until cleared.
    pub fn set_input_tensor(&mut self, name: &str, tensor: Tensor) -> Result<()> {
        let state = self.loaded_mut()?;
        let slot = state
            .contract
            .input(name)
            .ok_or_else(|| SessionError::not_found(SlotKind::Input, name))?;
        if tensor.dtype() != slot.spec.dtype {
            return Err(SessionError::InvalidArgument(format!(
                "input `{name}` expects {}, got {}",
                slot.spec.dtype,
                tensor.dtype()
            )));
        }
        state.external_inputs.insert(name.to_string(), tensor);
        Ok(())
    }

    pub fn clear_input_tensors(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.external_inputs.clear();
        }
    }

    pub fn input_tensor(&self, name: &str) -> Option<&Tensor> {
        self.state.as_ref()?.pool.inputs().current(name)
    }

    /// The pool tensor for an input, for writing data in place before `run`.
    pub fn input_tensor_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.state.as_mut()?.pool.input_mut(name)
    }

    pub fn contract(&self) -> Option<&Contract> {
        self.state.as_ref().map(|s| &s.contract)
    }

    pub fn model_spec(&self) -> Option<ModelSpec> {
        self.contract().map(Contract::model_spec)
    }

    pub fn input_names(&self) -> Vec<String> {
        self.contract().map_or_else(Vec::new, |c| {
            c.inputs.iter().map(|s| s.name().to_string()).collect()
        })
    }

    pub fn output_names(&self) -> Vec<String> {
        self.contract().map_or_else(Vec::new, |c| {
            c.outputs.iter().map(|s| s.name().to_string()).collect()
        })
    }

    pub fn input_specs(&self) -> Vec<TensorSpec> {
        self.contract().map_or_else(Vec::new, |c| {
            c.inputs.iter().map(|s| s.spec.clone()).collect()
        })
    }

    pub fn output_specs(&self) -> Vec<TensorSpec> {
        self.contract().map_or_else(Vec::new, |c| {
            c.outputs.iter().map(|s| s.spec.clone()).collect()
        })
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.state.as_ref().and_then(|s| s.batch_size)
    }

    pub fn load_strategy(&self) -> Option<LoadStrategy> {
        self.state.as_ref().map(|s| s.strategy)
    }
}

impl<B: NativeBackend> Drop for InferenceSession<B> {
    fn drop(&mut self) {
        self.deinit();
    }
}
