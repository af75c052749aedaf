mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{FakeBackend, DYNAMIC_MODEL, STATIC_MODEL};
use tensorport_core::{IOName, InferenceParam, Shape, ShapeMap, Tensor};
use tensorport_runtime::{InferenceSession, OutputRequest, SessionWorker, WorkerHandle};
use tokio::task::JoinHandle;

type Spawned = (WorkerHandle, JoinHandle<anyhow::Result<()>>, Arc<common::Probe>);

fn spawn(text: &'static str, max: Option<(&str, [usize; 2])>) -> Spawned {
    let (backend, probe) = FakeBackend::new();
    let mut param = InferenceParam::from_buffer(Bytes::from_static(text.as_bytes()));
    if let Some((name, shape)) = max {
        param = param.with_max_shape(name, shape);
    }
    let mut session = InferenceSession::new(backend, param);
    session.init().expect("init");
    let (handle, join) = SessionWorker::spawn(0, Box::new(session), 8);
    (handle, join, probe)
}

#[tokio::test(flavor = "multi_thread")]
async fn serves_requests_in_order() {
    let (handle, join, probe) = spawn(DYNAMIC_MODEL, Some(("tokens", [1, 16])));

    for len in [4usize, 8, 2] {
        let data: Vec<f32> = (0..len).map(|i| i as f32).collect();
        let shapes = ShapeMap::from([("tokens".to_string(), Shape::from([1, len]))]);
        let input = Tensor::from_f32("tokens", Shape::from([1, len]), &data);

        let response = handle
            .infer(shapes, vec![(IOName("tokens".into()), input)], Vec::new())
            .await
            .expect("infer");

        let (name, hidden) = &response.outputs[0];
        assert_eq!(name.0, "hidden");
        assert_eq!(hidden.shape(), &Shape::from([1, len]));
        assert_eq!(hidden.to_f32_vec().expect("f32")[len - 1], 2.0 * (len - 1) as f32);
    }

    drop(handle);
    join.await.expect("join").expect("worker");
    assert!(probe.position("drop_session").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn errors_come_back_to_the_caller() {
    let (handle, join, _) = spawn(STATIC_MODEL, None);

    let err = handle
        .infer(
            ShapeMap::new(),
            Vec::new(),
            vec![OutputRequest::host("missing")],
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing"));

    // The worker keeps serving after a failed request.
    let response = handle
        .infer(ShapeMap::new(), Vec::new(), vec![OutputRequest::host("y")])
        .await
        .expect("infer");
    assert_eq!(response.outputs[0].1.shape(), &Shape::from([1, 4]));

    drop(handle);
    join.await.expect("join").expect("worker");
}
