#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, ensure, Context, Result};
use tensorport_core::{
    bytes_to_f32, DType, Device, NativeBackend, NativeSession, NativeSource, SessionOptions,
    Shape, SlotInfo, Tensor,
};

/// Knobs and a journal shared between a test and the sessions it creates.
#[derive(Default)]
pub struct Probe {
    pub events: Mutex<Vec<String>>,
    pub fail_execute: AtomicBool,
    pub corrupt_last_output: AtomicBool,
}

impl Probe {
    pub fn log(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// A backend whose "models" are text files:
///
/// ```text
/// input  x f32 1,-1
/// output y f32 1,-1
/// ```
///
/// Every output is the first input times two, with the first input's shape.
/// A line reading `reject` makes session creation fail.
pub struct FakeBackend {
    pub probe: Arc<Probe>,
}

impl FakeBackend {
    pub fn new() -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

pub struct FakeSession {
    probe: Arc<Probe>,
    inputs: Vec<SlotInfo>,
    outputs: Vec<SlotInfo>,
    bound_inputs: Vec<(String, Shape, Vec<f32>)>,
    bound_outputs: Vec<String>,
}

impl NativeBackend for FakeBackend {
    type Session = FakeSession;

    fn name(&self) -> &'static str {
        "fake"
    }

    fn create_session(
        &self,
        source: NativeSource<'_>,
        _device: &Device,
        _options: &SessionOptions,
    ) -> Result<Self::Session> {
        let text = match source {
            NativeSource::Buffer(bytes) => {
                self.probe.log("load:buffer");
                String::from_utf8(bytes.to_vec()).context("model is not utf-8")?
            }
            NativeSource::Path(path) => {
                self.probe.log("load:path");
                std::fs::read_to_string(path).context("failed to open model")?
            }
        };

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line == "reject" {
                bail!("model rejected: unsupported opset");
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            ensure!(parts.len() == 4, "bad model line `{line}`");
            let dtype = match parts[2] {
                "f32" => DType::F32,
                "i64" => DType::I64,
                other => bail!("unsupported dtype {other}"),
            };
            let dims = parts[3]
                .split(',')
                .map(|d| d.parse::<i64>().context("bad dim"))
                .collect::<Result<Vec<_>>>()?;
            let slot = SlotInfo {
                name: parts[1].to_string(),
                dims,
                dtype,
            };
            match parts[0] {
                "input" => inputs.push(slot),
                "output" => outputs.push(slot),
                other => bail!("unknown slot kind {other}"),
            }
        }

        Ok(FakeSession {
            probe: self.probe.clone(),
            inputs,
            outputs,
            bound_inputs: Vec::new(),
            bound_outputs: Vec::new(),
        })
    }
}

impl NativeSession for FakeSession {
    fn inputs(&self) -> Vec<SlotInfo> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<SlotInfo> {
        self.outputs.clone()
    }

    fn bind_input(&mut self, name: &str, tensor: &Tensor) -> Result<()> {
        self.probe.log(format!("bind_input:{name}"));
        let data = bytes_to_f32(&tensor.to_bytes()?);
        self.bound_inputs
            .push((name.to_string(), tensor.shape().clone(), data));
        Ok(())
    }

    fn bind_output(&mut self, name: &str, _device: &Device) -> Result<()> {
        self.bound_outputs.push(name.to_string());
        Ok(())
    }

    fn execute(&mut self) -> Result<Vec<Tensor>> {
        self.probe.log("execute");
        if self.probe.fail_execute.load(Ordering::SeqCst) {
            bail!("kernel launch failed");
        }
        let (_, shape, data) = self.bound_inputs.first().context("no inputs bound")?;
        let doubled: Vec<f32> = data.iter().map(|v| v * 2.0).collect();

        let corrupt = self.probe.corrupt_last_output.load(Ordering::SeqCst);
        let last = self.bound_outputs.len().saturating_sub(1);
        Ok(self
            .bound_outputs
            .iter()
            .enumerate()
            .map(|(i, name)| {
                if corrupt && i == last {
                    let bytes = vec![0u8; shape.numel()].into();
                    Tensor::from_cpu_bytes(DType::U8, shape.clone(), bytes).with_name(name.clone())
                } else {
                    Tensor::from_f32(name.clone(), shape.clone(), &doubled)
                }
            })
            .collect())
    }

    fn clear_bindings(&mut self) {
        self.bound_inputs.clear();
        self.bound_outputs.clear();
        self.probe.log("clear_bindings");
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.probe.log("drop_session");
    }
}

pub fn model_file(text: &str) -> tempfile::NamedTempFile {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

pub const STATIC_MODEL: &str = "input x f32 1,4\noutput y f32 1,4\n";
pub const DYNAMIC_MODEL: &str = "input tokens f32 1,-1\noutput hidden f32 1,-1\n";
pub const TWO_OUTPUT_MODEL: &str = "input x f32 1,2\noutput a f32 1,2\noutput b f32 1,2\n";
