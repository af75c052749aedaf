use std::path::Path;

use anyhow::Result;

use crate::{DType, Device, SessionOptions, Shape, Tensor};

/// What the loader hands to the backend: the model bytes, or a path the
/// backend opens itself (so external weight shards never pass through us).
#[derive(Clone, Copy, Debug)]
pub enum NativeSource<'a> {
    Buffer(&'a [u8]),
    Path(&'a Path),
}

/// One input or output slot as the backend reports it. Negative dims are dynamic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotInfo {
    pub name: String,
    pub dims: Vec<i64>,
    pub dtype: DType,
}

pub trait NativeBackend: Send + Sync + 'static {
    type Session: NativeSession;

    fn name(&self) -> &'static str;
    fn create_session(
        &self,
        source: NativeSource<'_>,
        device: &Device,
        options: &SessionOptions,
    ) -> Result<Self::Session>;
}

/// A loaded model inside the native runtime.
///
/// Bindings accumulate until [`NativeSession::execute`]; the runtime calls
/// [`NativeSession::clear_bindings`] before every run and at teardown.
pub trait NativeSession: Send + 'static {
    fn inputs(&self) -> Vec<SlotInfo>;
    fn outputs(&self) -> Vec<SlotInfo>;

    /// Allocation shape for a dynamic slot nobody gave a bound for.
    fn default_max_shape(&self, _slot: &SlotInfo) -> Option<Shape> {
        None
    }

    fn bind_input(&mut self, name: &str, tensor: &Tensor) -> Result<()>;
    fn bind_output(&mut self, name: &str, device: &Device) -> Result<()>;

    /// Runs the graph and returns one tensor per bound output, in binding order.
    fn execute(&mut self) -> Result<Vec<Tensor>>;

    fn clear_bindings(&mut self);
}
