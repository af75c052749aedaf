use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tensorport_core::{Device, Shape};

#[derive(Parser, Debug)]
#[command(
    name = "tensorport",
    version,
    about = "Load ONNX models and run them through a tensor pool"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a model and print its input/output contract
    Inspect {
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Load a model, run it once on zero-filled inputs and print the outputs
    Run {
        #[command(flatten)]
        model: ModelArgs,

        /// Concrete input shape for this run (repeatable), e.g. tokens=1x64
        #[arg(long, value_parser = parse_named_shape)]
        reshape: Vec<(String, Shape)>,
    },
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Path to ONNX model file
    #[arg(long)]
    pub model: PathBuf,

    /// External weight file next to the model (repeatable); forces path loading
    #[arg(long)]
    pub external_data: Vec<PathBuf>,

    /// Upper bound for a dynamic input (repeatable), e.g. images=8x3x224x224
    #[arg(long, value_parser = parse_named_shape)]
    pub max_shape: Vec<(String, Shape)>,

    /// Device for inference (cpu or cuda:N)
    #[arg(long, default_value = "cpu", value_parser = parse_device)]
    pub device: Device,

    /// Backend to load the model with
    #[arg(long, default_value = "onnxruntime")]
    pub backend: String,

    /// Log level (RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log: String,
}

pub fn parse_device(raw: &str) -> Result<Device> {
    if raw.eq_ignore_ascii_case("cpu") {
        return Ok(Device::Cpu);
    }

    if let Some(rest) = raw.strip_prefix("cuda:") {
        let device_id: u32 = rest.parse().context("invalid cuda device id")?;
        return Ok(Device::Cuda { device_id });
    }

    bail!("unsupported device: {raw} (expected cpu or cuda:N)");
}

/// `name=1x3x128`
pub fn parse_named_shape(raw: &str) -> Result<(String, Shape)> {
    let (name, dims) = raw
        .split_once('=')
        .with_context(|| format!("expected name=DIMS, got `{raw}`"))?;
    if name.is_empty() {
        bail!("missing tensor name in `{raw}`");
    }
    let dims = dims
        .split('x')
        .map(|d| {
            d.trim()
                .parse::<usize>()
                .with_context(|| format!("bad dimension `{d}` in `{raw}`"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((name.to_string(), Shape::from(dims)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devices() {
        assert_eq!(parse_device("CPU").unwrap(), Device::Cpu);
        assert_eq!(
            parse_device("cuda:1").unwrap(),
            Device::Cuda { device_id: 1 }
        );
        assert!(parse_device("cuda:x").is_err());
        assert!(parse_device("tpu").is_err());
    }

    #[test]
    fn named_shapes() {
        let (name, shape) = parse_named_shape("images=8x3x224x224").unwrap();
        assert_eq!(name, "images");
        assert_eq!(shape, Shape::from([8, 3, 224, 224]));

        assert!(parse_named_shape("images").is_err());
        assert!(parse_named_shape("=1x2").is_err());
        assert!(parse_named_shape("x=1x-1").is_err());
    }

    #[test]
    fn run_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "tensorport",
            "run",
            "--model",
            "m.onnx",
            "--max-shape",
            "a=4x8",
            "--max-shape",
            "b=4",
            "--reshape",
            "a=2x8",
        ])
        .unwrap();
        let Command::Run { model, reshape } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(model.max_shape.len(), 2);
        assert_eq!(model.device, Device::Cpu);
        assert_eq!(reshape, vec![("a".to_string(), Shape::from([2, 8]))]);
    }
}
