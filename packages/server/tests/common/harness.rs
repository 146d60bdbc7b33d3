//! Test harness that runs the real router against an engine with a
//! recording transport. No network: requests go through `oneshot`.

use std::sync::Arc;

use arbiter::testing::RecordingTransport;
use arbiter::{ArbiterError, Engine, EngineConfig, EngineHandle};
use arbiter_server::server::build_app;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tower::ServiceExt;

pub struct TestHarness {
    pub engine: EngineHandle,
    pub transport: Arc<RecordingTransport>,
    pub task: JoinHandle<Result<(), ArbiterError>>,
    router: Router,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let transport = Arc::new(RecordingTransport::new());
        let (engine, task) = Engine::builder(transport.clone())
            .with_config(config)
            .build()
            .expect("test engine config is valid")
            .start();
        let router = build_app(engine.clone());

        Self {
            engine,
            transport,
            task,
            router,
        }
    }

    /// Send one request and return the status with the parsed JSON body
    /// (`Value::Null` when the body is empty).
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        let response = self.router.clone().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }

    /// Send one request and hand back the raw response, for streaming bodies.
    pub async fn raw(&self, request: Request<Body>) -> axum::response::Response {
        self.router.clone().oneshot(request).await.expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post<T: Serialize>(&self, uri: &str, body: &T) -> (StatusCode, Value) {
        let json = serde_json::to_value(body).expect("serializable body");
        self.request(Method::POST, uri, Some(json)).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, None).await
    }
}
