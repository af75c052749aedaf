use std::collections::HashMap;

use tensorport_core::{NativeSession, Result, SessionError, SlotKind, Tensor};
use tracing::{debug, error};

use crate::contract::{check_shape, Contract, ResolvedSlot};
use crate::pool::TensorPool;

/// Binds every slot, executes, and commits outputs into the pool.
///
/// Outputs are staged first and only committed once all of them check out,
/// so a failed run never leaves a half-updated set of output tensors.
pub(crate) fn run_once<S: NativeSession>(
    native: &mut S,
    contract: &Contract,
    pool: &mut TensorPool,
    external: &HashMap<String, Tensor>,
) -> Result<()> {
    native.clear_bindings();
    let result = bind_and_execute(native, contract, pool, external);
    native.clear_bindings();
    let produced = result?;

    if produced.len() != contract.outputs.len() {
        return Err(SessionError::ExecutionFailure {
            message: format!(
                "backend returned {} outputs, model declares {}",
                produced.len(),
                contract.outputs.len()
            ),
        });
    }

    let staged = contract
        .outputs
        .iter()
        .zip(&produced)
        .map(|(slot, tensor)| {
            let id = pool
                .outputs()
                .id(slot.name())
                .ok_or_else(|| SessionError::not_found(SlotKind::Output, slot.name()))?;
            pool.stage_output(id, tensor)
        })
        .collect::<Result<Vec<_>>>()?;

    for output in staged {
        pool.commit_output(output)?;
    }
    Ok(())
}

fn bind_and_execute<S: NativeSession>(
    native: &mut S,
    contract: &Contract,
    pool: &TensorPool,
    external: &HashMap<String, Tensor>,
) -> Result<Vec<Tensor>> {
    for slot in &contract.inputs {
        let name = slot.name();
        let tensor = match external.get(name) {
            Some(tensor) => {
                debug!(%name, "binding external input");
                tensor
            }
            None => pool
                .inputs()
                .current(name)
                .ok_or_else(|| SessionError::not_found(SlotKind::Input, name))?,
        };
        check_bindable(slot, tensor)?;
        backend_call("bind input", name, native.bind_input(name, tensor))?;
    }

    for slot in &contract.outputs {
        let name = slot.name();
        backend_call("bind output", name, native.bind_output(name, pool.device()))?;
    }

    backend_call("execute", "", native.execute())
}

/// Bind-time contract checks. Capacity is the last line of defence for
/// tensors whose shape changed outside of reshape.
fn check_bindable(slot: &ResolvedSlot, tensor: &Tensor) -> Result<()> {
    let name = slot.name();
    if tensor.dtype() != slot.spec.dtype {
        return Err(SessionError::InvalidArgument(format!(
            "input `{name}` is {}, model expects {}",
            tensor.dtype(),
            slot.spec.dtype
        )));
    }
    if !tensor.is_allocated() {
        return Err(SessionError::InvalidArgument(format!(
            "input `{name}` has no data; reshape it or bind an external tensor"
        )));
    }
    check_shape(&slot.spec, tensor.shape())?;
    if tensor.byte_len() > tensor.capacity() {
        return Err(SessionError::ReshapeMismatch {
            name: name.to_string(),
            requested: tensor.shape().clone(),
            required: tensor.byte_len(),
            capacity: tensor.capacity(),
        });
    }
    Ok(())
}

/// The single point where backend errors turn into session errors.
fn backend_call<T>(stage: &str, slot: &str, result: anyhow::Result<T>) -> Result<T> {
    result.map_err(|err| {
        let err = if slot.is_empty() {
            err.context(stage.to_string())
        } else {
            err.context(format!("{stage} `{slot}`"))
        };
        error!(error = %format!("{err:#}"), "backend call failed");
        SessionError::execution(&err)
    })
}
