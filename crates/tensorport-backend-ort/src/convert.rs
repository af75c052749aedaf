use anyhow::{bail, ensure, Context, Result};
use bytes::Bytes;
use ort::{
    tensor::TensorElementType,
    value::{DynValue, ValueRef, ValueType},
};
use tensorport_core::{DType, Shape, SlotInfo, Tensor};

pub(crate) fn slot_info(name: &str, value_type: &ValueType) -> Result<SlotInfo> {
    let ValueType::Tensor { ty, shape, .. } = value_type else {
        bail!("`{name}` is not a tensor; only tensor IO is supported");
    };

    Ok(SlotInfo {
        name: name.to_string(),
        dims: shape.iter().copied().collect(),
        dtype: ort_tensor_element_to_dtype(*ty)?,
    })
}

fn ort_tensor_element_to_dtype(ty: TensorElementType) -> Result<DType> {
    match ty {
        TensorElementType::Float32 => Ok(DType::F32),
        TensorElementType::Float16 => Ok(DType::F16),
        TensorElementType::Int64 => Ok(DType::I64),
        TensorElementType::Int32 => Ok(DType::I32),
        TensorElementType::Uint8 => Ok(DType::U8),
        _ => bail!("unsupported tensor element type: {ty}"),
    }
}

/// Copies the live region of `tensor` into an ORT-owned value.
pub(crate) fn tensor_to_ort_value(tensor: &Tensor) -> Result<DynValue> {
    let bytes = tensor.to_bytes()?;
    let shape: Vec<usize> = tensor.shape().dims().to_vec();
    ensure!(
        bytes.len() == tensor.byte_len(),
        "input byte size mismatch: got {}, expected {}",
        bytes.len(),
        tensor.byte_len()
    );

    let value = match tensor.dtype() {
        DType::F32 => {
            let data = bytes_to_f32(&bytes)?;
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::I64 => {
            let data = bytes_to_i64(&bytes)?;
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::I32 => {
            let data = bytes_to_i32(&bytes)?;
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::U8 => {
            let data = bytes.to_vec();
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::F16 => bail!("f16 inputs are not supported yet"),
    };

    Ok(value)
}

pub(crate) fn ort_value_to_tensor(name: &str, value: &ValueRef<'_>) -> Result<Tensor> {
    let ValueType::Tensor { ty, shape, .. } = value.dtype() else {
        bail!("output `{name}` is not a tensor");
    };

    let dims: Vec<usize> = shape.iter().map(|d| *d as usize).collect();
    let shape = Shape::from_slice(&dims);

    let (dtype, bytes) = match *ty {
        TensorElementType::Float32 => {
            let array = value.try_extract_array::<f32>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            (DType::F32, le_bytes(slice, f32::to_le_bytes))
        }
        TensorElementType::Int64 => {
            let array = value.try_extract_array::<i64>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            (DType::I64, le_bytes(slice, i64::to_le_bytes))
        }
        TensorElementType::Int32 => {
            let array = value.try_extract_array::<i32>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            (DType::I32, le_bytes(slice, i32::to_le_bytes))
        }
        TensorElementType::Uint8 => {
            let array = value.try_extract_array::<u8>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            (DType::U8, Bytes::copy_from_slice(slice))
        }
        TensorElementType::Float16 => bail!("f16 outputs are not supported yet"),
        _ => bail!("unsupported output tensor element type: {ty}"),
    };

    Ok(Tensor::from_cpu_bytes(dtype, shape, bytes).with_name(name))
}

fn bytes_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    ensure!(bytes.len() % 4 == 0, "f32 input has invalid byte length");
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn bytes_to_i64(bytes: &[u8]) -> Result<Vec<i64>> {
    ensure!(bytes.len() % 8 == 0, "i64 input has invalid byte length");
    Ok(bytes
        .chunks_exact(8)
        .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect())
}

fn bytes_to_i32(bytes: &[u8]) -> Result<Vec<i32>> {
    ensure!(bytes.len() % 4 == 0, "i32 input has invalid byte length");
    Ok(bytes
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Tensor bytes are little-endian throughout, matching `tensorport_core::bytes_to_f32`.
fn le_bytes<T: Copy, const N: usize>(slice: &[T], to_le: impl Fn(T) -> [u8; N]) -> Bytes {
    let mut out = Vec::with_capacity(slice.len() * N);
    for v in slice {
        out.extend_from_slice(&to_le(*v));
    }
    Bytes::from(out)
}
