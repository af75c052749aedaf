use std::collections::HashSet;

use tensorport_core::{
    ModelSpec, NativeSession, Result, SessionError, Shape, ShapeMap, SlotInfo, SlotKind,
    TensorSpec,
};
use tracing::{debug, warn};

/// A slot descriptor plus the shape its max tensor gets allocated at.
#[derive(Clone, Debug)]
pub struct ResolvedSlot {
    pub spec: TensorSpec,
    pub dynamic: bool,
    /// `None` defers allocation until a concrete shape is known.
    pub alloc_shape: Option<Shape>,
}

impl ResolvedSlot {
    pub fn name(&self) -> &str {
        &self.spec.name.0
    }
}

/// The model's input/output contract, in backend enumeration order.
#[derive(Clone, Debug, Default)]
pub struct Contract {
    pub inputs: Vec<ResolvedSlot>,
    pub outputs: Vec<ResolvedSlot>,
    /// Leading dimension of the first input, when it is known at load time.
    pub batch_size: Option<usize>,
}

impl Contract {
    pub fn model_spec(&self) -> ModelSpec {
        ModelSpec {
            inputs: self.inputs.iter().map(|s| s.spec.clone()).collect(),
            outputs: self.outputs.iter().map(|s| s.spec.clone()).collect(),
        }
    }

    pub fn input(&self, name: &str) -> Option<&ResolvedSlot> {
        self.inputs.iter().find(|s| s.name() == name)
    }

    pub fn output(&self, name: &str) -> Option<&ResolvedSlot> {
        self.outputs.iter().find(|s| s.name() == name)
    }
}

pub fn resolve_contract<S: NativeSession>(session: &S, max_shapes: &ShapeMap) -> Result<Contract> {
    let reported_inputs = session.inputs();
    let reported_outputs = session.outputs();
    check_unique(SlotKind::Input, &reported_inputs)?;
    check_unique(SlotKind::Output, &reported_outputs)?;

    let inputs = reported_inputs
        .iter()
        .map(|slot| resolve_input(session, slot, max_shapes))
        .collect::<Result<Vec<_>>>()?;

    let batch_size = inputs
        .first()
        .and_then(|slot| slot.alloc_shape.as_ref())
        .and_then(Shape::batch);

    let outputs = reported_outputs
        .iter()
        .map(|slot| resolve_output(slot, batch_size))
        .collect::<Vec<_>>();

    for name in max_shapes.keys() {
        if !reported_inputs.iter().any(|slot| &slot.name == name) {
            warn!(%name, "max shape given for a name that is not a model input, ignoring");
        }
    }

    debug!(
        inputs = inputs.len(),
        outputs = outputs.len(),
        ?batch_size,
        "contract resolved"
    );
    Ok(Contract {
        inputs,
        outputs,
        batch_size,
    })
}

fn check_unique(kind: SlotKind, slots: &[SlotInfo]) -> Result<()> {
    let mut seen = HashSet::with_capacity(slots.len());
    for slot in slots {
        if !seen.insert(slot.name.as_str()) {
            return Err(SessionError::LoadFailure {
                message: format!("backend reported duplicate {kind} name `{}`", slot.name),
            });
        }
    }
    Ok(())
}

fn resolve_input<S: NativeSession>(
    session: &S,
    slot: &SlotInfo,
    max_shapes: &ShapeMap,
) -> Result<ResolvedSlot> {
    let spec = TensorSpec::from_reported(&slot.name, slot.dtype, &slot.dims);
    let dynamic = spec.is_dynamic();

    let alloc_shape = match max_shapes.get(&slot.name) {
        Some(max) => {
            check_shape(&spec, max)?;
            Some(max.clone())
        }
        None if dynamic => session.default_max_shape(slot),
        // An unknown batch axis on an otherwise fixed slot defaults to one.
        None => Some(spec.shape_filled(1)),
    };

    if dynamic && alloc_shape.is_none() {
        debug!(name = %slot.name, "dynamic input without a bound, deferring allocation");
    }

    Ok(ResolvedSlot {
        spec,
        dynamic,
        alloc_shape,
    })
}

fn resolve_output(slot: &SlotInfo, batch_size: Option<usize>) -> ResolvedSlot {
    let spec = TensorSpec::from_reported(&slot.name, slot.dtype, &slot.dims);
    let dynamic = spec.is_dynamic();

    let alloc_shape = match (dynamic, batch_size) {
        (false, Some(batch)) => {
            let shape = spec.shape_filled(1);
            if spec.batch_is_fixed() {
                Some(shape)
            } else {
                Some(shape.with_batch(batch))
            }
        }
        _ => None,
    };

    ResolvedSlot {
        spec,
        dynamic,
        alloc_shape,
    }
}

/// A requested shape must keep the slot's rank and agree with every fixed non-batch dim.
pub(crate) fn check_shape(spec: &TensorSpec, shape: &Shape) -> Result<()> {
    if shape.rank() != spec.rank {
        return Err(SessionError::InvalidArgument(format!(
            "shape {shape} for `{}` has rank {}, model expects {}",
            spec.name,
            shape.rank(),
            spec.rank
        )));
    }
    for (axis, (fixed, given)) in spec.dims.iter().zip(shape.dims()).enumerate().skip(1) {
        if let Some(fixed) = fixed {
            if fixed != given {
                return Err(SessionError::InvalidArgument(format!(
                    "shape {shape} for `{}` sets axis {axis} to {given}, model fixes it at {fixed}",
                    spec.name
                )));
            }
        }
    }
    let bytes = shape
        .checked_numel()
        .and_then(|n| n.checked_mul(spec.dtype.size_bytes()));
    if bytes.is_none() {
        return Err(SessionError::InvalidArgument(format!(
            "shape {shape} for `{}` is too large to address",
            spec.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tensorport_core::{DType, Device, ErrorKind, Tensor};

    use super::*;

    struct Slots {
        inputs: Vec<SlotInfo>,
        outputs: Vec<SlotInfo>,
    }

    impl NativeSession for Slots {
        fn inputs(&self) -> Vec<SlotInfo> {
            self.inputs.clone()
        }
        fn outputs(&self) -> Vec<SlotInfo> {
            self.outputs.clone()
        }
        fn bind_input(&mut self, _name: &str, _tensor: &Tensor) -> anyhow::Result<()> {
            Ok(())
        }
        fn bind_output(&mut self, _name: &str, _device: &Device) -> anyhow::Result<()> {
            Ok(())
        }
        fn execute(&mut self) -> anyhow::Result<Vec<Tensor>> {
            Ok(Vec::new())
        }
        fn clear_bindings(&mut self) {}
    }

    fn slot(name: &str, dims: &[i64]) -> SlotInfo {
        SlotInfo {
            name: name.to_string(),
            dims: dims.to_vec(),
            dtype: DType::F32,
        }
    }

    #[test]
    fn static_slots_round_trip() {
        let session = Slots {
            inputs: vec![slot("image", &[2, 3, 32, 32])],
            outputs: vec![slot("logits", &[2, 10])],
        };
        let contract = resolve_contract(&session, &ShapeMap::new()).expect("resolve");

        let input = &contract.inputs[0];
        assert!(!input.dynamic);
        assert_eq!(input.spec.dims, vec![Some(2), Some(3), Some(32), Some(32)]);
        assert_eq!(input.alloc_shape, Some(Shape::from([2, 3, 32, 32])));
        assert_eq!(contract.batch_size, Some(2));
        assert_eq!(contract.outputs[0].alloc_shape, Some(Shape::from([2, 10])));
    }

    #[test]
    fn outputs_inherit_the_input_batch() {
        let session = Slots {
            inputs: vec![slot("x", &[-1, 4])],
            outputs: vec![slot("y", &[-1, 4])],
        };
        let max = ShapeMap::from([("x".to_string(), Shape::from([8, 4]))]);
        let contract = resolve_contract(&session, &max).expect("resolve");
        assert_eq!(contract.batch_size, Some(8));
        assert_eq!(contract.outputs[0].alloc_shape, Some(Shape::from([8, 4])));
    }

    #[test]
    fn dynamic_slots_use_override_or_defer() {
        let session = Slots {
            inputs: vec![slot("ids", &[1, -1]), slot("mask", &[1, -1])],
            outputs: vec![slot("hidden", &[1, -1, 16])],
        };
        let max = ShapeMap::from([("ids".to_string(), Shape::from([1, 128]))]);
        let contract = resolve_contract(&session, &max).expect("resolve");

        assert!(contract.inputs[0].dynamic);
        assert_eq!(contract.inputs[0].alloc_shape, Some(Shape::from([1, 128])));
        assert_eq!(contract.inputs[1].alloc_shape, None);
        assert!(contract.outputs[0].dynamic);
        assert_eq!(contract.outputs[0].alloc_shape, None);
    }

    #[test]
    fn unknown_batch_defers_outputs() {
        let session = Slots {
            inputs: vec![slot("ids", &[-1, -1])],
            outputs: vec![slot("pooled", &[-1, 16])],
        };
        let contract = resolve_contract(&session, &ShapeMap::new()).expect("resolve");
        assert_eq!(contract.batch_size, None);
        assert_eq!(contract.outputs[0].alloc_shape, None);
    }

    #[test]
    fn bad_overrides_are_rejected() {
        let session = Slots {
            inputs: vec![slot("x", &[1, -1, 8])],
            outputs: vec![],
        };
        let wrong_rank = ShapeMap::from([("x".to_string(), Shape::from([1, 64]))]);
        let err = resolve_contract(&session, &wrong_rank).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let wrong_fixed = ShapeMap::from([("x".to_string(), Shape::from([1, 64, 9]))]);
        let err = resolve_contract(&session, &wrong_fixed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let too_large = ShapeMap::from([("x".to_string(), Shape::from([1, 1 << 62, 8]))]);
        let err = resolve_contract(&session, &too_large).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn duplicate_names_fail_the_load() {
        let session = Slots {
            inputs: vec![slot("x", &[1]), slot("x", &[1])],
            outputs: vec![],
        };
        let err = resolve_contract(&session, &ShapeMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoadFailure);
    }
}
