mod cli;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use cli::{Cli, Command, ModelArgs};
use tensorport_backend_ort::OrtBackend;
use tensorport_core::{
    DType, InferenceParam, ModelSpec, Shape, ShapeMap, Tensor, TensorDesc, TensorSpec,
};
use tensorport_runtime::{Inference, InferenceRegistry, SessionWorker};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect { model } => {
            init_logging(&model.log);
            inspect(model)
        }
        Command::Run { model, reshape } => {
            init_logging(&model.log);
            run(model, reshape.into_iter().collect()).await
        }
    }
}

fn init_logging(log: &str) {
    std::env::set_var("RUST_LOG", log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

fn registry() -> InferenceRegistry {
    let mut reg = InferenceRegistry::new();
    reg.register("onnxruntime", OrtBackend::new);
    reg
}

fn load(args: ModelArgs) -> Result<Box<dyn Inference>> {
    let mut param = InferenceParam::from_path(&args.model).with_device(args.device);
    for shard in args.external_data {
        param = param.with_external_data(shard);
    }
    for (name, shape) in args.max_shape {
        param = param.with_max_shape(name, shape);
    }

    let mut session = registry().create(&args.backend, param)?;
    session
        .init()
        .with_context(|| format!("failed to load {}", args.model.display()))?;
    tracing::info!(backend = session.backend_name(), "model loaded");
    Ok(session)
}

fn inspect(args: ModelArgs) -> Result<()> {
    let session = load(args)?;
    let spec = session.model_spec().context("session lost its model")?;
    print_contract(&spec);
    Ok(())
}

async fn run(args: ModelArgs, shapes: ShapeMap) -> Result<()> {
    let session = load(args)?;
    let spec = session.model_spec().context("session lost its model")?;

    let mut reshape = ShapeMap::new();
    let mut inputs = Vec::with_capacity(spec.inputs.len());
    for input in &spec.inputs {
        let shape = shapes
            .get(&input.name.0)
            .cloned()
            .unwrap_or_else(|| input.shape_filled(1));
        if input.is_dynamic() || !input.batch_is_fixed() {
            reshape.insert(input.name.0.clone(), shape.clone());
        }
        inputs.push((input.name.clone(), zeros(input, shape)?));
    }

    let (handle, join) = SessionWorker::spawn(0, session, 1);
    let response = handle.infer(reshape, inputs, Vec::new()).await;
    drop(handle);
    join.await.context("worker panicked")??;
    let response = response?;

    for (name, tensor) in &response.outputs {
        println!("{name}: {} {}{}", tensor.dtype(), tensor.shape(), preview(tensor));
    }
    println!(
        "queued {}us, backend {}us",
        response.timings.queued_us, response.timings.backend_us
    );
    Ok(())
}

fn zeros(spec: &TensorSpec, shape: Shape) -> Result<Tensor> {
    let len = TensorDesc::new(spec.dtype, shape.clone())
        .checked_byte_len()
        .with_context(|| format!("shape {shape} for `{}` is too large", spec.name))?;
    let bytes = Bytes::from(vec![0u8; len]);
    Ok(Tensor::from_cpu_bytes(spec.dtype, shape, bytes).with_name(&spec.name.0))
}

fn preview(tensor: &Tensor) -> String {
    if tensor.dtype() != DType::F32 {
        return String::new();
    }
    match tensor.to_f32_vec() {
        Ok(values) => {
            let head: Vec<String> = values.iter().take(8).map(|v| format!("{v:.4}")).collect();
            let more = if values.len() > 8 { ", ..." } else { "" };
            format!(" [{}{more}]", head.join(", "))
        }
        Err(_) => String::new(),
    }
}

fn print_contract(spec: &ModelSpec) {
    println!("inputs:");
    for slot in &spec.inputs {
        println!("  {}", describe(slot));
    }
    println!("outputs:");
    for slot in &spec.outputs {
        println!("  {}", describe(slot));
    }
}

fn describe(slot: &TensorSpec) -> String {
    let dims: Vec<String> = slot
        .dims
        .iter()
        .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
        .collect();
    format!(
        "{} {} [{}] {:?}{}",
        slot.name,
        slot.dtype,
        dims.join(", "),
        slot.format,
        if slot.is_dynamic() { " dynamic" } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_marks_unknown_dims() {
        let slot = TensorSpec::from_reported("tokens", DType::I64, &[-1, 128]);
        assert_eq!(describe(&slot), "tokens i64 [?, 128] NC");
    }

    #[test]
    fn zero_inputs_cover_the_shape() {
        let slot = TensorSpec::from_reported("x", DType::F32, &[1, 3]);
        let tensor = zeros(&slot, Shape::from([2, 3])).unwrap();
        assert_eq!(tensor.name(), "x");
        assert_eq!(tensor.to_f32_vec().unwrap(), vec![0.0; 6]);

        assert!(zeros(&slot, Shape::from([1 << 62, 3])).is_err());
    }

    #[test]
    fn registry_knows_onnxruntime() {
        assert_eq!(registry().names(), vec!["onnxruntime".to_string()]);
    }
}
