use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;

use crate::{Result, SessionError};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda { device_id: u32 },
}

impl Device {
    /// Host devices can alias pool storage directly; everything else gets a copy.
    pub fn is_host(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda { device_id } => write!(f, "cuda:{device_id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    I64,
    I32,
    U8,
}

impl DType {
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::U8 => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::I64 => "i64",
            DType::I32 => "i32",
            DType::U8 => "u8",
        };
        f.write_str(s)
    }
}

/// Memory layout tag, derived from rank unless a caller asks for something else.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DataFormat {
    N,
    NC,
    NCL,
    NCHW,
    NCDHW,
    #[default]
    Auto,
}

impl DataFormat {
    pub fn from_rank(rank: usize) -> Self {
        match rank {
            1 => DataFormat::N,
            2 => DataFormat::NC,
            3 => DataFormat::NCL,
            4 => DataFormat::NCHW,
            5 => DataFormat::NCDHW,
            _ => DataFormat::Auto,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }
    pub fn rank(&self) -> usize {
        self.0.len()
    }
    /// Element count. A rank-0 shape is a scalar and holds one element.
    ///
    /// Saturates at `usize::MAX`, so an overflowing shape never fits anywhere.
    pub fn numel(&self) -> usize {
        self.checked_numel().unwrap_or(usize::MAX)
    }
    pub fn checked_numel(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d))
    }
    pub fn dims(&self) -> &[usize] {
        &self.0
    }
    pub fn batch(&self) -> Option<usize> {
        self.0.first().copied()
    }
    pub fn with_batch(mut self, batch: usize) -> Self {
        if let Some(first) = self.0.first_mut() {
            *first = batch;
        }
        self
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims.into_iter().collect())
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::from_slice(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::from_slice(&dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorDesc {
    pub dtype: DType,
    pub shape: Shape,
    pub format: DataFormat,
}

impl TensorDesc {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        let format = DataFormat::from_rank(shape.rank());
        Self {
            dtype,
            shape,
            format,
        }
    }

    /// Saturates like [`Shape::numel`].
    pub fn byte_len(&self) -> usize {
        self.checked_byte_len().unwrap_or(usize::MAX)
    }

    /// `None` when the byte count does not fit in `usize`.
    pub fn checked_byte_len(&self) -> Option<usize> {
        self.shape
            .checked_numel()?
            .checked_mul(self.dtype.size_bytes())
    }
}

/// Device storage shared between a max tensor and the views built on it.
///
/// Cloning a `Buffer` aliases the same allocation; use [`Buffer::copy_into`]
/// to move bytes between two distinct allocations.
#[derive(Clone, Debug)]
pub struct Buffer {
    device: Device,
    data: Arc<RwLock<Vec<u8>>>,
}

impl Buffer {
    pub fn alloc(device: Device, byte_len: usize) -> Self {
        Self {
            device,
            data: Arc::new(RwLock::new(vec![0u8; byte_len])),
        }
    }

    pub fn from_bytes(device: Device, bytes: &[u8]) -> Self {
        Self {
            device,
            data: Arc::new(RwLock::new(bytes.to_vec())),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn capacity(&self) -> usize {
        self.data.read().len()
    }

    /// Stable address of the allocation, used to tell aliases from copies.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.data) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write()
    }

    /// Copies the first `byte_len` bytes into `dst`. Both buffers must hold at least that much.
    pub fn copy_into(&self, dst: &Buffer, byte_len: usize) -> Result<()> {
        if self.ptr_eq(dst) {
            return Ok(());
        }
        let src = self.read();
        let mut out = dst.write();
        if src.len() < byte_len || out.len() < byte_len {
            return Err(SessionError::InvalidArgument(format!(
                "copy of {byte_len} bytes from {} to {} overruns a buffer ({} / {} bytes)",
                self.device,
                dst.device,
                src.len(),
                out.len()
            )));
        }
        out[..byte_len].copy_from_slice(&src[..byte_len]);
        Ok(())
    }
}

/// A named tensor: a descriptor plus (optionally) storage.
///
/// A tensor without a buffer is deferred: its slot has no known bound yet.
/// The descriptor may describe fewer bytes than the buffer holds, which is
/// how current tensors shrink within a max tensor's allocation.
#[derive(Clone, Debug)]
pub struct Tensor {
    name: String,
    desc: TensorDesc,
    buffer: Option<Buffer>,
}

impl Tensor {
    pub fn deferred(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            desc: TensorDesc::new(dtype, Shape::default()),
            buffer: None,
        }
    }

    pub fn allocate(name: impl Into<String>, desc: TensorDesc, device: Device) -> Self {
        let buffer = Buffer::alloc(device, desc.byte_len());
        Self {
            name: name.into(),
            desc,
            buffer: Some(buffer),
        }
    }

    /// A tensor over `buffer` without copying. The caller is responsible for
    /// `desc` fitting inside the buffer; binding checks it.
    pub fn view(name: impl Into<String>, desc: TensorDesc, buffer: &Buffer) -> Self {
        Self {
            name: name.into(),
            desc,
            buffer: Some(buffer.clone()),
        }
    }

    pub fn from_cpu_bytes(dtype: DType, shape: Shape, bytes: Bytes) -> Self {
        Self {
            name: String::new(),
            desc: TensorDesc::new(dtype, shape),
            buffer: Some(Buffer::from_bytes(Device::Cpu, &bytes)),
        }
    }

    pub fn from_f32(name: impl Into<String>, shape: Shape, data: &[f32]) -> Self {
        let mut tensor = Self::from_cpu_bytes(DType::F32, shape, f32_to_bytes(data));
        tensor.name = name.into();
        tensor
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn shape(&self) -> &Shape {
        &self.desc.shape
    }

    pub fn dtype(&self) -> DType {
        self.desc.dtype
    }

    pub fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    pub fn device(&self) -> Option<&Device> {
        self.buffer.as_ref().map(Buffer::device)
    }

    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Bytes needed by the current logical shape.
    pub fn byte_len(&self) -> usize {
        self.desc.byte_len()
    }

    /// Bytes actually allocated, zero when deferred.
    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, Buffer::capacity)
    }

    pub fn fits(&self, desc: &TensorDesc) -> bool {
        self.is_allocated() && desc.byte_len() <= self.capacity()
    }

    /// Rewrites the descriptor in place without touching storage.
    pub fn set_desc(&mut self, desc: TensorDesc) {
        self.desc = desc;
    }

    pub fn set_shape(&mut self, shape: Shape) {
        self.desc.format = DataFormat::from_rank(shape.rank());
        self.desc.shape = shape;
    }

    pub fn set_buffer(&mut self, buffer: Buffer) {
        self.buffer = Some(buffer);
    }

    pub fn release(&mut self) {
        self.buffer = None;
    }

    fn check_capacity(&self) -> Result<&Buffer> {
        let buffer = self.buffer.as_ref().ok_or_else(|| {
            SessionError::InvalidArgument(format!("tensor `{}` has no storage", self.name))
        })?;
        let required = self.byte_len();
        let capacity = buffer.capacity();
        if required > capacity {
            return Err(SessionError::ReshapeMismatch {
                name: self.name.clone(),
                requested: self.desc.shape.clone(),
                required,
                capacity,
            });
        }
        Ok(buffer)
    }

    /// Copies out exactly the bytes covered by the logical shape.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let buffer = self.check_capacity()?;
        let data = buffer.read();
        Ok(Bytes::copy_from_slice(&data[..self.byte_len()]))
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let buffer = self.check_capacity()?;
        if bytes.len() != self.byte_len() {
            return Err(SessionError::InvalidArgument(format!(
                "tensor `{}` expects {} bytes for shape {}, got {}",
                self.name,
                self.byte_len(),
                self.desc.shape,
                bytes.len()
            )));
        }
        buffer.write()[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        if self.dtype() != DType::F32 {
            return Err(SessionError::InvalidArgument(format!(
                "tensor `{}` is {}, not f32",
                self.name,
                self.dtype()
            )));
        }
        Ok(bytes_to_f32(&self.to_bytes()?))
    }
}

pub fn f32_to_bytes(data: &[f32]) -> Bytes {
    let mut out = Vec::with_capacity(data.len() * 4);
    for v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Bytes::from(out)
}

pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
