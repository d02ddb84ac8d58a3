//! Shared helpers for the server integration tests.

#![allow(dead_code)]

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use http_body_util::BodyExt;
use orchid_core::domain::setup::{Job, Setup, Step};
use orchid_engine::{EngineConfig, LocalDispatcher};
use orchid_server::api::{AppState, create_router};
use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestApp {
    pub dir: TempDir,
    pub app: Router,
    pub dispatcher: LocalDispatcher,
}

fn step(script: &str) -> Step {
    Step {
        machine: "local".to_string(),
        script: script.to_string(),
        args: Vec::new(),
    }
}

fn job(id: &str, scripts: &[&str]) -> Job {
    Job {
        id: id.to_string(),
        steps: scripts.iter().map(|s| step(s)).collect(),
    }
}

/// Builds a router over a scratch configuration root with three jobs:
/// `build` succeeds, `broken` fails in its second step, `slow` sleeps.
pub async fn build_test_app(secret: Option<&str>) -> TestApp {
    let dir = TempDir::new().unwrap();
    let scripts = dir.path().join("scripts");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::write(scripts.join("ok.sh"), "#!/bin/bash\necho hello\necho world\n").unwrap();
    std::fs::write(scripts.join("fail.sh"), "#!/bin/bash\necho broken\nexit 1\n").unwrap();
    std::fs::write(scripts.join("slow.sh"), "#!/bin/bash\necho waiting\nexec sleep 30\n").unwrap();

    let setup = Setup {
        machines: Vec::new(),
        jobs: vec![
            job("build", &["ok.sh"]),
            job("broken", &["ok.sh", "fail.sh"]),
            job("slow", &["slow.sh"]),
        ],
        scripts: vec!["fail.sh".into(), "ok.sh".into(), "slow.sh".into()],
    };

    let mut config = EngineConfig::new(dir.path());
    config.poll_interval = Duration::from_millis(10);

    let dispatcher = LocalDispatcher::open(config, setup).await.unwrap();
    let app = create_router(AppState::new(
        dispatcher.clone(),
        secret.map(str::to_string),
    ));

    TestApp {
        dir,
        app,
        dispatcher,
    }
}

pub async fn send(app: &Router, method: Method, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri).await
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri).await
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json<T: DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Waits until no execution is running in the dispatcher
pub async fn wait_idle(dispatcher: &LocalDispatcher) {
    for _ in 0..500 {
        if dispatcher.running().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("executions still running: {:?}", dispatcher.running());
}
