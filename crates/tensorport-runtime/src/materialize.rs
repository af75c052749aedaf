use tensorport_core::{Buffer, DataFormat, Device, Result, SessionError, Tensor};

/// Hands a pool output to the caller.
///
/// Host targets without `copy` get a view over the pool's storage, which is
/// overwritten by the next run. Anything else gets a fresh allocation on
/// `device` that the caller owns outright.
pub fn materialize(
    current: &Tensor,
    device: &Device,
    copy: bool,
    format: Option<DataFormat>,
) -> Result<Tensor> {
    let buffer = current.buffer().ok_or_else(|| {
        SessionError::InvalidArgument(format!(
            "output `{}` has not been produced yet",
            current.name()
        ))
    })?;

    let mut desc = current.desc().clone();
    if let Some(format) = format {
        desc.format = format;
    }

    if copy || !device.is_host() {
        let target = Buffer::alloc(device.clone(), desc.byte_len());
        buffer.copy_into(&target, desc.byte_len())?;
        return Ok(Tensor::view(current.name(), desc, &target));
    }
    Ok(Tensor::view(current.name(), desc, buffer))
}

#[cfg(test)]
mod tests {
    use tensorport_core::Shape;

    use super::*;

    fn produced() -> Tensor {
        Tensor::from_f32("y", Shape::from([1, 2]), &[0.5, 1.5])
    }

    #[test]
    fn host_without_copy_aliases() {
        let pool_tensor = produced();
        let out = materialize(&pool_tensor, &Device::Cpu, false, None).expect("alias");
        let (a, b) = (out.buffer().expect("buf"), pool_tensor.buffer().expect("buf"));
        assert_eq!(a.addr(), b.addr());
    }

    #[test]
    fn copy_flag_or_device_forces_a_copy() {
        let pool_tensor = produced();
        let pool_addr = pool_tensor.buffer().map(Buffer::addr);

        let copied = materialize(&pool_tensor, &Device::Cpu, true, None).expect("copy");
        assert_ne!(copied.buffer().map(Buffer::addr), pool_addr);
        assert_eq!(copied.to_f32_vec().expect("f32"), vec![0.5, 1.5]);

        let cuda = Device::Cuda { device_id: 0 };
        let moved = materialize(&pool_tensor, &cuda, false, Some(DataFormat::Auto)).expect("copy");
        assert_eq!(moved.device(), Some(&cuda));
        assert_eq!(moved.desc().format, DataFormat::Auto);
        assert_ne!(moved.buffer().map(Buffer::addr), pool_addr);
    }

    #[test]
    fn deferred_outputs_cannot_be_materialized() {
        let pending = Tensor::deferred("y", tensorport_core::DType::F32);
        assert!(materialize(&pending, &Device::Cpu, false, None).is_err());
    }
}
