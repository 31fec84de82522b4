//! Shared fixtures for SCV integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use siege_catalog::{Catalog, Manager, Options, RocksCatalog, Target};
use siege_core::{BearerToken, Role, Stage, TargetId};
use siege_scv::{create_router, index, ScvConfig, ScvService, ScvState, StreamFiles};
use siege_store::MemoryKv;

pub const SCV_NAME: &str = "scv-test";
pub const SCV_PASSWORD: &str = "scv-secret";
pub const OWNER: &str = "alice@example.com";

pub struct TestScv {
    pub router: Router,
    pub service: Arc<ScvService<RocksCatalog>>,
    pub catalog: Arc<RocksCatalog>,
    pub manager_token: String,
    pub target: TargetId,
    _dir: TempDir,
}

pub async fn setup() -> TestScv {
    setup_with(|_| {}).await
}

pub async fn setup_with(tweak: impl FnOnce(&mut ScvConfig)) -> TestScv {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(RocksCatalog::open(dir.path().join("catalog")).unwrap());

    let manager_token = BearerToken::generate().as_str().to_string();
    catalog
        .insert_manager(&Manager {
            email: OWNER.into(),
            password_hash: String::new(),
            token: Some(manager_token.clone()),
            role: Role::Manager,
            weight: 1.0,
        })
        .await
        .unwrap();

    let target = TargetId::generate();
    let mut options = Options::new();
    options.insert("steps_per_frame".into(), Value::from(50_000));
    catalog
        .insert_target(&Target {
            id: target,
            owner: OWNER.into(),
            creation_date: 0.0,
            engines: vec!["openmm".into()],
            stage: Stage::Public,
            options,
            weight: 1.0,
            shards: Vec::new(),
        })
        .await
        .unwrap();

    let mut config = ScvConfig {
        name: SCV_NAME.into(),
        password: SCV_PASSWORD.into(),
        data_dir: dir.path().join("scv"),
        ..ScvConfig::default()
    };
    tweak(&mut config);

    let index = index::open(MemoryKv::new()).unwrap();
    let files = StreamFiles::open(config.streams_dir()).await.unwrap();
    let service = Arc::new(ScvService::new(config, index, files, Arc::clone(&catalog)));
    let router = create_router(ScvState::new(Arc::clone(&service)));

    TestScv {
        router,
        service,
        catalog,
        manager_token,
        target,
        _dir: dir,
    }
}

pub fn b64(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

pub fn json_request(method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

pub async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(router, request).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

impl TestScv {
    pub fn manager(&self) -> Option<&str> {
        Some(self.manager_token.as_str())
    }

    pub async fn create_stream(&self) -> String {
        let body = serde_json::json!({
            "target_id": self.target.to_string(),
            "files": {
                "system.xml.b64": b64("<system/>"),
                "integrator.xml": b64("<integrator/>"),
            },
        });
        let (status, reply) = send_json(
            &self.router,
            json_request(Method::POST, "/streams", self.manager(), Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{reply}");
        reply["stream_id"].as_str().unwrap().to_string()
    }

    pub async fn activate(&self) -> (StatusCode, Value) {
        let body = serde_json::json!({
            "target_id": self.target.to_string(),
            "engine": "openmm",
            "user": "donor-1",
        });
        send_json(
            &self.router,
            json_request(Method::POST, "/streams/activate", Some(SCV_PASSWORD), Some(body)),
        )
        .await
    }

    pub async fn activate_token(&self) -> String {
        let (status, reply) = self.activate().await;
        assert_eq!(status, StatusCode::OK, "{reply}");
        reply["token"].as_str().unwrap().to_string()
    }

    pub async fn info(&self, stream_id: &str) -> Value {
        let (status, reply) = send_json(
            &self.router,
            json_request(
                Method::GET,
                &format!("/streams/info/{stream_id}"),
                self.manager(),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{reply}");
        reply
    }

    pub async fn frame(&self, token: &str, body: &Value) -> (StatusCode, Value) {
        send_json(
            &self.router,
            json_request(Method::PUT, "/core/frame", Some(token), Some(body.clone())),
        )
        .await
    }

    pub async fn core_start(&self, token: &str) -> Value {
        let (status, reply) = send_json(
            &self.router,
            json_request(Method::GET, "/core/start", Some(token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{reply}");
        reply
    }
}
