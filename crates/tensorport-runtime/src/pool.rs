use std::collections::HashMap;

use bytes::Bytes;
use tensorport_core::{
    Buffer, Device, Result, SessionError, ShapeMap, SlotKind, Tensor, TensorDesc, TensorSpec,
};
use tracing::debug;

use crate::contract::{check_shape, Contract, ResolvedSlot};

/// Stable handle to a slot inside a [`SlotTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

/// One slot: the max tensor that owns storage and the current view bound at run time.
#[derive(Debug)]
pub struct PoolEntry {
    spec: TensorSpec,
    max: Tensor,
    current: Tensor,
    /// Bounded slots keep their allocation for life; unbounded ones grow on demand.
    bounded: bool,
}

impl PoolEntry {
    fn new(slot: &ResolvedSlot, device: &Device) -> Self {
        let name = slot.name();
        let dtype = slot.spec.dtype;
        match &slot.alloc_shape {
            Some(shape) => {
                let desc = TensorDesc::new(dtype, shape.clone());
                let buffer = Buffer::alloc(device.clone(), desc.byte_len());
                Self {
                    spec: slot.spec.clone(),
                    max: Tensor::view(name, desc.clone(), &buffer),
                    current: Tensor::view(name, desc, &buffer),
                    bounded: true,
                }
            }
            None => Self {
                spec: slot.spec.clone(),
                max: Tensor::deferred(name, dtype),
                current: Tensor::deferred(name, dtype),
                bounded: false,
            },
        }
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    pub fn max(&self) -> &Tensor {
        &self.max
    }

    pub fn current(&self) -> &Tensor {
        &self.current
    }

    pub fn is_bounded(&self) -> bool {
        self.bounded
    }

    /// Points both tensors at a fresh allocation large enough for `desc`.
    fn grow(&mut self, desc: &TensorDesc, device: &Device) {
        debug!(
            name = %self.spec.name,
            from = self.max.capacity(),
            to = desc.byte_len(),
            "growing slot storage"
        );
        let buffer = Buffer::alloc(device.clone(), desc.byte_len());
        self.max = Tensor::view(self.spec.name.0.clone(), desc.clone(), &buffer);
        self.current.set_buffer(buffer);
    }
}

#[derive(Debug, Default)]
pub struct SlotTable {
    entries: Vec<PoolEntry>,
    index: HashMap<String, SlotId>,
}

impl SlotTable {
    fn push(&mut self, entry: PoolEntry) {
        let id = SlotId(self.entries.len());
        self.index.insert(entry.spec.name.0.clone(), id);
        self.entries.push(entry);
    }

    pub fn id(&self, name: &str) -> Option<SlotId> {
        self.index.get(name).copied()
    }

    pub fn entry(&self, id: SlotId) -> &PoolEntry {
        &self.entries[id.0]
    }

    fn entry_mut(&mut self, id: SlotId) -> &mut PoolEntry {
        &mut self.entries[id.0]
    }

    pub fn current(&self, name: &str) -> Option<&Tensor> {
        self.id(name).map(|id| &self.entries[id.0].current)
    }

    pub fn current_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        let id = self.id(name)?;
        Some(&mut self.entries[id.0].current)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in backend enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &PoolEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (SlotId(i), entry))
    }

    fn clear(&mut self) {
        for entry in &mut self.entries {
            entry.current.release();
            entry.max.release();
        }
        self.entries.clear();
        self.index.clear();
    }
}

/// A run's output, checked and copied out of the backend but not yet visible.
#[derive(Debug)]
pub struct StagedOutput {
    id: SlotId,
    desc: TensorDesc,
    bytes: Bytes,
}

/// Max/current tensors for every slot, created once per loaded model.
#[derive(Debug)]
pub struct TensorPool {
    inputs: SlotTable,
    outputs: SlotTable,
    device: Device,
}

impl TensorPool {
    pub fn build(contract: &Contract, device: &Device) -> Self {
        let mut inputs = SlotTable::default();
        for slot in &contract.inputs {
            inputs.push(PoolEntry::new(slot, device));
        }
        let mut outputs = SlotTable::default();
        for slot in &contract.outputs {
            outputs.push(PoolEntry::new(slot, device));
        }
        Self {
            inputs,
            outputs,
            device: device.clone(),
        }
    }

    pub fn inputs(&self) -> &SlotTable {
        &self.inputs
    }

    pub fn outputs(&self) -> &SlotTable {
        &self.outputs
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.inputs.current_mut(name)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Rewrites current input shapes in place.
    ///
    /// All entries are validated before any is applied, so an unknown name or
    /// an oversized shape leaves every slot as it was. Bounded slots never
    /// reallocate. Returns how many slots changed.
    pub fn reshape(&mut self, shapes: &ShapeMap) -> Result<usize> {
        let mut plan = Vec::with_capacity(shapes.len());
        for (name, shape) in shapes {
            let id = self
                .inputs
                .id(name)
                .ok_or_else(|| SessionError::not_found(SlotKind::Input, name.clone()))?;
            let entry = self.inputs.entry(id);
            if entry.current.shape() == shape && entry.current.is_allocated() {
                continue;
            }

            check_shape(&entry.spec, shape)?;
            let desc = TensorDesc::new(entry.spec.dtype, shape.clone());
            if entry.bounded && desc.byte_len() > entry.max.capacity() {
                return Err(SessionError::ReshapeMismatch {
                    name: name.clone(),
                    requested: shape.clone(),
                    required: desc.byte_len(),
                    capacity: entry.max.capacity(),
                });
            }
            plan.push((id, desc));
        }

        let changed = plan.len();
        let device = self.device.clone();
        for (id, desc) in plan {
            let entry = self.inputs.entry_mut(id);
            if !entry.max.fits(&desc) {
                entry.grow(&desc, &device);
            }
            debug!(name = %entry.spec.name, shape = %desc.shape, "input reshaped");
            entry.current.set_desc(desc);
        }
        Ok(changed)
    }

    /// Validates one produced output against its slot and copies it out.
    pub fn stage_output(&self, id: SlotId, produced: &Tensor) -> Result<StagedOutput> {
        let entry = self.outputs.entry(id);
        if produced.dtype() != entry.spec.dtype {
            return Err(SessionError::ExecutionFailure {
                message: format!(
                    "output `{}` came back as {}, model declares {}",
                    entry.spec.name,
                    produced.dtype(),
                    entry.spec.dtype
                ),
            });
        }
        if produced.shape().rank() != entry.spec.rank {
            return Err(SessionError::ExecutionFailure {
                message: format!(
                    "output `{}` came back with shape {}, model declares rank {}",
                    entry.spec.name,
                    produced.shape(),
                    entry.spec.rank
                ),
            });
        }
        let desc = TensorDesc::new(produced.dtype(), produced.shape().clone());
        if desc.checked_byte_len().is_none() {
            return Err(SessionError::ExecutionFailure {
                message: format!(
                    "output `{}` came back with unaddressable shape {}",
                    entry.spec.name,
                    produced.shape()
                ),
            });
        }
        Ok(StagedOutput {
            id,
            desc,
            bytes: produced.to_bytes()?,
        })
    }

    /// Makes a staged output visible through the slot's current tensor.
    pub fn commit_output(&mut self, staged: StagedOutput) -> Result<()> {
        let device = self.device.clone();
        let entry = self.outputs.entry_mut(staged.id);
        if !entry.max.fits(&staged.desc) {
            entry.grow(&staged.desc, &device);
        }
        entry.current.set_desc(staged.desc);
        entry.current.write_bytes(&staged.bytes)
    }

    /// Releases every tensor and forgets all slots.
    pub fn clear(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }
}
