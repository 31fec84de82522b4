//! A command center wired to in-process SCVs over one shared catalog.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use siege_catalog::{RocksCatalog, ScvRecord};
use siege_cc::{create_router, CcConfig, CcState, CommandCenter, ScvClient, ScvResponse};
use siege_scv::{index, ScvConfig, ScvService, ScvState, StreamFiles};
use siege_store::MemoryKv;

pub const CLUSTER_SECRET: &str = "cluster-secret";
pub const ADMIN: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "hunter2";
pub const MAX_FAILS: u32 = 3;

pub type Cc = CommandCenter<RocksCatalog, RouterScvClient>;

/// Routes SCV requests to in-process routers. SCVs marked down answer
/// with a transport failure.
#[derive(Default)]
pub struct RouterScvClient {
    routers: Mutex<HashMap<String, Router>>,
    down: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RouterScvClient {
    pub fn attach(&self, name: &str, router: Router) {
        self.routers.lock().insert(name.to_string(), router);
    }

    pub fn set_down(&self, name: &str, down: bool) {
        let mut set = self.down.lock();
        if down {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    /// Number of requests sent to `name` on `path`.
    pub fn calls_to(&self, name: &str, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(n, p)| n == name && p == path)
            .count()
    }
}

#[async_trait]
impl ScvClient for RouterScvClient {
    async fn request(
        &self,
        scv: &ScvRecord,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ScvResponse {
        self.calls.lock().push((scv.name.clone(), path.to_string()));
        if self.down.lock().contains(&scv.name) {
            return ScvResponse::transport("connection refused");
        }
        let Some(router) = self.routers.lock().get(&scv.name).cloned() else {
            return ScvResponse::transport("no route to host");
        };
        let (status, body) = send_json(
            &router,
            json_request(method, path, Some(&scv.password), body.cloned()),
        )
        .await;
        ScvResponse::new(status.as_u16(), body)
    }
}

pub struct Shard {
    pub name: String,
    pub host: String,
    pub router: Router,
    pub service: Arc<ScvService<RocksCatalog>>,
}

pub struct Cluster {
    pub router: Router,
    pub cc: Arc<Cc>,
    pub catalog: Arc<RocksCatalog>,
    pub scvs: Arc<RouterScvClient>,
    pub shards: Vec<Shard>,
    pub admin_token: String,
    _dir: TempDir,
}

/// A command center with `shards` registered SCVs.
pub async fn cluster(shards: usize) -> Cluster {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(RocksCatalog::open(dir.path().join("catalog")).unwrap());
    let scvs = Arc::new(RouterScvClient::default());

    let config = CcConfig {
        data_dir: dir.path().join("cc"),
        cluster_secret: CLUSTER_SECRET.into(),
        max_fails: MAX_FAILS,
        scv_scheme: "http".into(),
        admin_email: Some(ADMIN.into()),
        admin_password: Some(ADMIN_PASSWORD.into()),
        ..CcConfig::default()
    };
    let cc = Arc::new(CommandCenter::new(
        config,
        Arc::clone(&catalog),
        Arc::clone(&scvs),
    ));
    assert!(cc.bootstrap_admin().await.unwrap());
    let router = create_router(CcState::new(Arc::clone(&cc)));

    let mut attached = Vec::new();
    for i in 0..shards {
        let name = format!("scv-{i}");
        let config = ScvConfig {
            name: name.clone(),
            password: format!("{name}-password"),
            external_host: format!("{name}.test:8443"),
            data_dir: dir.path().join(&name),
            cluster_secret: CLUSTER_SECRET.into(),
            ..ScvConfig::default()
        };
        let host = config.external_host.clone();
        let index = index::open(MemoryKv::new()).unwrap();
        let files = StreamFiles::open(config.streams_dir()).await.unwrap();
        let service = Arc::new(ScvService::new(config, index, files, Arc::clone(&catalog)));
        service.register().await.unwrap();
        let scv_router = siege_scv::create_router(ScvState::new(Arc::clone(&service)));
        scvs.attach(&name, scv_router.clone());
        attached.push(Shard {
            name,
            host,
            router: scv_router,
            service,
        });
    }
    cc.refresh_directory().await.unwrap();

    let (status, reply) = send_json(
        &router,
        json_request(
            Method::POST,
            "/managers/auth",
            None,
            Some(json!({"email": ADMIN, "password": ADMIN_PASSWORD})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{reply}");
    let admin_token = reply["token"].as_str().unwrap().to_string();

    Cluster {
        router,
        cc,
        catalog,
        scvs,
        shards: attached,
        admin_token,
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

pub async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

impl Cluster {
    pub async fn call(&self, method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        send_json(&self.router, json_request(method, uri, auth, body)).await
    }

    pub async fn ok(&self, method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> Value {
        let (status, reply) = self.call(method, uri, auth, body).await;
        assert_eq!(status, StatusCode::OK, "{uri}: {reply}");
        reply
    }

    /// Create a manager through the admin and log them in.
    pub async fn manager(&self, email: &str, weight: f64) -> String {
        self.ok(
            Method::POST,
            "/managers",
            Some(&self.admin_token),
            Some(json!({"email": email, "password": "pw", "weight": weight})),
        )
        .await;
        let reply = self
            .ok(
                Method::POST,
                "/managers/auth",
                None,
                Some(json!({"email": email, "password": "pw"})),
            )
            .await;
        reply["token"].as_str().unwrap().to_string()
    }

    pub async fn engine_key(&self, engine: &str) -> String {
        let reply = self
            .ok(
                Method::POST,
                "/engines/keys",
                Some(&self.admin_token),
                Some(json!({"engine": engine})),
            )
            .await;
        reply["key"].as_str().unwrap().to_string()
    }

    pub async fn target(&self, manager_token: &str, stage: &str, weight: f64) -> String {
        let reply = self
            .ok(
                Method::POST,
                "/targets",
                Some(manager_token),
                Some(json!({
                    "engines": ["openmm"],
                    "stage": stage,
                    "weight": weight,
                    "options": {"steps_per_frame": 50_000},
                })),
            )
            .await;
        reply["target_id"].as_str().unwrap().to_string()
    }

    /// Create a stream of `target` on shard `shard` and refresh the directory.
    pub async fn stream(&self, shard: usize, manager_token: &str, target: &str) -> String {
        let body = json!({
            "target_id": target,
            "files": {
                "system.xml.b64": b64("<system/>"),
                "integrator.xml.b64": b64("<integrator/>"),
            },
        });
        let (status, reply) = send_json(
            &self.shards[shard].router,
            json_request(Method::POST, "/streams", Some(manager_token), Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{reply}");
        self.cc.refresh_directory().await.unwrap();
        reply["stream_id"].as_str().unwrap().to_string()
    }

    pub async fn assign(&self, engine_key: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = json_request(Method::POST, "/core/assign", None, body);
        request
            .headers_mut()
            .insert("engine-key", engine_key.parse().unwrap());
        send_json(&self.router, request).await
    }

    /// Shard an assignment URL points at.
    pub fn shard_of(&self, url: &str) -> &Shard {
        self.shards
            .iter()
            .find(|s| url == format!("http://{}/core/start", s.host))
            .unwrap_or_else(|| panic!("no shard serves {url}"))
    }

    /// End an assignment's lease so the stream goes back in its queue.
    pub async fn release(&self, assignment: &Value) {
        let shard = self.shard_of(assignment["url"].as_str().unwrap());
        let token = assignment["token"].as_str().unwrap();
        let (status, reply) = send_json(
            &shard.router,
            json_request(Method::PUT, "/core/stop", Some(token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{reply}");
    }
}

impl Cluster {
    /// `GET /core/start` for an assignment on the shard that issued it.
    pub async fn start(&self, assignment: &Value) -> Value {
        let shard = self.shard_of(assignment["url"].as_str().unwrap());
        let token = assignment["token"].as_str().unwrap();
        let (status, reply) = send_json(
            &shard.router,
            json_request(Method::GET, "/core/start", Some(token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{reply}");
        reply
    }
}
