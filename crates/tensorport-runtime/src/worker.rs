use std::time::Instant;

use anyhow::Result;
use tensorport_core::{IOName, ShapeMap, Tensor};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{Inference, InferenceRequest, InferenceResponse, OutputRequest, Timings};

#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<InferenceRequest>,
}

impl WorkerHandle {
    pub async fn infer(
        &self,
        shapes: ShapeMap,
        inputs: Vec<(IOName, Tensor)>,
        outputs: Vec<OutputRequest>,
    ) -> Result<InferenceResponse> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let request = InferenceRequest {
            shapes,
            inputs,
            outputs,
            enqueued_at: Instant::now(),
            resp_tx,
        };
        self.tx
            .send(request)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let response = resp_rx
            .await
            .map_err(|_| anyhow::anyhow!("worker dropped"))??;
        Ok(response)
    }
}

/// Owns one session and serves requests strictly one after another.
///
/// Backend execution blocks, so the worker lives on a blocking thread.
pub struct SessionWorker {
    pub id: u32,
    pub inbox: mpsc::Receiver<InferenceRequest>,
    pub inference: Box<dyn Inference>,
}

impl SessionWorker {
    /// `inference` must already be initialized.
    pub fn spawn(
        id: u32,
        inference: Box<dyn Inference>,
        capacity: usize,
    ) -> (WorkerHandle, JoinHandle<Result<()>>) {
        let (tx, inbox) = mpsc::channel(capacity);
        let worker = SessionWorker {
            id,
            inbox,
            inference,
        };
        let join = tokio::task::spawn_blocking(move || worker.run());
        (WorkerHandle { tx }, join)
    }

    /// Runs until every handle is dropped, then tears the session down.
    pub fn run(mut self) -> Result<()> {
        info!(worker_id = self.id, "worker started");
        while let Some(request) = self.inbox.blocking_recv() {
            let InferenceRequest {
                shapes,
                inputs,
                outputs,
                enqueued_at,
                resp_tx,
            } = request;
            let queued_us = enqueued_at.elapsed().as_micros() as u64;

            let result = self.serve(&shapes, inputs, outputs).map(|(outputs, backend_us)| {
                InferenceResponse {
                    outputs,
                    timings: Timings {
                        queued_us,
                        backend_us,
                    },
                }
            });
            if let Err(err) = &result {
                warn!(worker_id = self.id, error = %err, "request failed");
            }
            let _ = resp_tx.send(result);
        }
        self.inference.deinit();
        info!(worker_id = self.id, "worker stopped");
        Ok(())
    }

    fn serve(
        &mut self,
        shapes: &ShapeMap,
        inputs: Vec<(IOName, Tensor)>,
        outputs: Vec<OutputRequest>,
    ) -> tensorport_core::Result<(Vec<(IOName, Tensor)>, u64)> {
        let ran = self.reshape_bind_run(shapes, inputs);
        // External inputs are only borrowed for the one run.
        self.inference.clear_input_tensors();
        let backend_us = ran?;

        let wanted = if outputs.is_empty() {
            self.inference
                .model_spec()
                .map(|spec| {
                    spec.outputs
                        .into_iter()
                        .map(|s| OutputRequest::host(s.name.0))
                        .collect()
                })
                .unwrap_or_default()
        } else {
            outputs
        };

        // Copies, since the next run overwrites pool storage.
        let mut produced = Vec::with_capacity(wanted.len());
        for out in wanted {
            let tensor = self
                .inference
                .output_tensor(&out.name.0, &out.device, true, out.format)?;
            produced.push((out.name, tensor));
        }
        Ok((produced, backend_us))
    }

    fn reshape_bind_run(
        &mut self,
        shapes: &ShapeMap,
        inputs: Vec<(IOName, Tensor)>,
    ) -> tensorport_core::Result<u64> {
        if !shapes.is_empty() {
            self.inference.reshape(shapes)?;
        }
        for (name, tensor) in inputs {
            self.inference.set_input_tensor(&name.0, tensor)?;
        }
        let t0 = Instant::now();
        self.inference.run()?;
        Ok(t0.elapsed().as_micros() as u64)
    }
}
