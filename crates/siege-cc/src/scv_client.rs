//! HTTP client for command center to SCV requests.
//!
//! Requests never fail at the type level: a transport failure is reported
//! as a response with status [`TRANSPORT_FAILURE`], so callers treat it like
//! any other server-side failure when counting SCV faults.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::Method;
use serde_json::{json, Value};

use siege_catalog::ScvRecord;

use crate::error::{ApiError, Result};

/// Status synthesized when an SCV could not be reached at all.
pub const TRANSPORT_FAILURE: u16 = 599;

/// Reply of an SCV.
#[derive(Debug, Clone, PartialEq)]
pub struct ScvResponse {
    /// HTTP status, or [`TRANSPORT_FAILURE`].
    pub status: u16,
    /// JSON body, `Value::Null` when the body was empty or not JSON.
    pub body: Value,
}

impl ScvResponse {
    /// Build a response.
    #[must_use]
    pub const fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// A synthesized transport failure.
    #[must_use]
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::new(TRANSPORT_FAILURE, json!({ "error": message.to_string() }))
    }

    /// 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// 5xx or transport failure: counts against the SCV.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.status >= 500
    }

    /// The `error` field of the envelope, or a description of the status.
    #[must_use]
    pub fn error_message(&self) -> String {
        self.body
            .get("error")
            .and_then(Value::as_str)
            .map_or_else(|| format!("scv returned status {}", self.status), str::to_string)
    }
}

/// Trait for SCV communication.
///
/// Abstracts the transport so tests can route requests to in-process SCVs
/// or script failures.
#[async_trait]
pub trait ScvClient: Send + Sync {
    /// Send a request to `path` on an SCV, authenticated with its shared
    /// password.
    async fn request(
        &self,
        scv: &ScvRecord,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ScvResponse;
}

/// HTTP client for SCVs.
#[derive(Debug, Clone)]
pub struct HttpScvClient {
    client: reqwest::Client,
    scheme: String,
}

impl HttpScvClient {
    /// Create a client reaching SCVs over `scheme` (`https` or `http`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(scheme: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ApiError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, scheme))
    }

    /// Create a client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, scheme: impl Into<String>) -> Self {
        Self {
            client,
            scheme: scheme.into(),
        }
    }

    /// Full URL of `path` on an SCV.
    #[must_use]
    pub fn url(&self, scv: &ScvRecord, path: &str) -> String {
        format!("{}://{}{path}", self.scheme, scv.host)
    }
}

#[async_trait]
impl ScvClient for HttpScvClient {
    async fn request(
        &self,
        scv: &ScvRecord,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ScvResponse {
        let mut request = self
            .client
            .request(method, self.url(scv, path))
            .header(reqwest::header::AUTHORIZATION, &scv.password);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(scv = %scv.name, path, error = %e, "SCV unreachable");
                return ScvResponse::transport(e);
            }
        };
        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(bytes) => ScvResponse::new(status, serde_json::from_slice(&bytes).unwrap_or(Value::Null)),
            Err(e) => ScvResponse::transport(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(host: String) -> ScvRecord {
        ScvRecord {
            name: "scv-1".to_string(),
            host,
            password: "scv-secret".to_string(),
        }
    }

    #[test]
    fn classification() {
        assert!(ScvResponse::new(200, Value::Null).is_success());
        assert!(!ScvResponse::new(400, Value::Null).is_failure());
        assert!(ScvResponse::new(503, Value::Null).is_failure());
        assert!(ScvResponse::transport("refused").is_failure());
        assert_eq!(
            ScvResponse::new(400, json!({"error": "no streams available"})).error_message(),
            "no streams available"
        );
        assert_eq!(
            ScvResponse::new(502, Value::Null).error_message(),
            "scv returned status 502"
        );
    }

    #[tokio::test]
    async fn sends_password_and_body() {
        let server = MockServer::start().await;
        let body = json!({"target_id": "t", "engine": "openmm"});
        Mock::given(method("POST"))
            .and(path("/streams/activate"))
            .and(header("authorization", "scv-secret"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "abc"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpScvClient::new("http", Duration::from_secs(1)).unwrap();
        let scv = record(server.address().to_string());
        let reply = client
            .request(&scv, Method::POST, "/streams/activate", Some(&body))
            .await;
        assert!(reply.is_success());
        assert_eq!(reply.body["token"], "abc");
    }

    #[tokio::test]
    async fn unreachable_scv_is_a_transport_failure() {
        let server = MockServer::start().await;
        let host = server.address().to_string();
        drop(server);

        let client = HttpScvClient::new("http", Duration::from_millis(200)).unwrap();
        let reply = client.request(&record(host), Method::GET, "/", None).await;
        assert_eq!(reply.status, TRANSPORT_FAILURE);
        assert!(reply.is_failure());
    }

    #[test]
    fn url_uses_scheme_and_host() {
        let client = HttpScvClient::new("https", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url(&record("scv.example.org:8443".to_string()), "/core/start"),
            "https://scv.example.org:8443/core/start"
        );
    }
}
