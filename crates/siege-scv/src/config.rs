//! SCV configuration.
//!
//! Every field has a default; [`ScvConfig::from_env`] overlays environment
//! variables on top of them.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for one SCV process.
#[derive(Debug, Clone, Deserialize)]
pub struct ScvConfig {
    /// Shard name, embedded in every stream id it creates.
    #[serde(default = "ScvConfig::default_name")]
    pub name: String,

    /// Listen address (e.g., "0.0.0.0:8080").
    #[serde(default = "ScvConfig::default_listen_addr")]
    pub listen_addr: String,

    /// Host (and port) cores and the CC use to reach this SCV.
    #[serde(default = "ScvConfig::default_external_host")]
    pub external_host: String,

    /// Shared password the CC presents on `/streams/activate`.
    #[serde(default)]
    pub password: String,

    /// Root for the stream index and stream files.
    #[serde(default = "ScvConfig::default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the command center.
    #[serde(default = "ScvConfig::default_cc_url")]
    pub cc_url: String,

    /// Secret for the CC internal catalog endpoint.
    #[serde(default)]
    pub cluster_secret: String,

    /// Lease extension granted by each heartbeat.
    #[serde(default = "ScvConfig::default_heartbeat_increment")]
    pub heartbeat_increment_seconds: u64,

    /// Period of the heartbeat expiry sweep.
    #[serde(default = "ScvConfig::default_heartbeat_sweep")]
    pub heartbeat_sweep_millis: u64,

    /// Period of the stale lock sweep.
    #[serde(default = "ScvConfig::default_scruffy_period")]
    pub scruffy_period_millis: u64,

    /// Age after which a held lock is considered abandoned.
    #[serde(default = "ScvConfig::default_scruffy_max_age")]
    pub scruffy_max_age_seconds: u64,

    /// How long a handler waits for a stream lock.
    #[serde(default = "ScvConfig::default_lock_deadline")]
    pub lock_deadline_millis: u64,

    /// Maximum request body size in bytes.
    #[serde(default = "ScvConfig::default_max_body")]
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    #[serde(default = "ScvConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// PEM certificate for in-process TLS.
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,

    /// PEM private key for in-process TLS.
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
}

impl ScvConfig {
    fn default_name() -> String {
        "scv-local".to_string()
    }

    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_external_host() -> String {
        "localhost:8080".to_string()
    }

    fn default_data_dir() -> PathBuf {
        PathBuf::from("/data/siege-scv")
    }

    fn default_cc_url() -> String {
        "http://localhost:9090".to_string()
    }

    const fn default_heartbeat_increment() -> u64 {
        900
    }

    const fn default_heartbeat_sweep() -> u64 {
        1000
    }

    const fn default_scruffy_period() -> u64 {
        2000
    }

    const fn default_scruffy_max_age() -> u64 {
        3
    }

    const fn default_lock_deadline() -> u64 {
        100
    }

    const fn default_max_body() -> usize {
        64 * 1024 * 1024
    }

    const fn default_request_timeout() -> u64 {
        60
    }

    /// Load configuration from environment variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SCV_NAME") {
            config.name = val;
        }
        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("SCV_EXTERNAL_HOST") {
            config.external_host = val;
        }
        if let Ok(val) = std::env::var("SCV_PASSWORD") {
            config.password = val;
        }
        if let Ok(val) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CC_URL") {
            config.cc_url = val;
        }
        if let Ok(val) = std::env::var("CLUSTER_SECRET") {
            config.cluster_secret = val;
        }
        parse_env("HEARTBEAT_INCREMENT_SECONDS", &mut config.heartbeat_increment_seconds);
        parse_env("HEARTBEAT_SWEEP_MILLIS", &mut config.heartbeat_sweep_millis);
        parse_env("SCRUFFY_PERIOD_MILLIS", &mut config.scruffy_period_millis);
        parse_env("SCRUFFY_MAX_AGE_SECONDS", &mut config.scruffy_max_age_seconds);
        parse_env("LOCK_DEADLINE_MILLIS", &mut config.lock_deadline_millis);
        parse_env("MAX_BODY_BYTES", &mut config.max_body_bytes);
        parse_env("REQUEST_TIMEOUT_SECONDS", &mut config.request_timeout_seconds);
        if let Ok(val) = std::env::var("TLS_CERT_PATH") {
            config.tls_cert_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("TLS_KEY_PATH") {
            config.tls_key_path = Some(PathBuf::from(val));
        }

        config
    }

    /// Check settings that have no usable default.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        siege_core::validate_scv_name(&self.name).map_err(|e| e.to_string())?;
        if self.password.is_empty() {
            return Err("SCV_PASSWORD must be set".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }

    /// Directory of the stream index database.
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    /// Root of the on-disk stream store.
    #[must_use]
    pub fn streams_dir(&self) -> PathBuf {
        self.data_dir.join("streams")
    }

    /// Heartbeat lease extension in seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn heartbeat_increment(&self) -> f64 {
        self.heartbeat_increment_seconds as f64
    }

    /// Lock acquisition deadline.
    #[must_use]
    pub const fn lock_deadline(&self) -> Duration {
        Duration::from_millis(self.lock_deadline_millis)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(val) = std::env::var(key) {
        match val.parse() {
            Ok(n) => *slot = n,
            Err(_) => tracing::warn!(key, value = %val, "Ignoring unparseable setting"),
        }
    }
}

impl Default for ScvConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            listen_addr: Self::default_listen_addr(),
            external_host: Self::default_external_host(),
            password: String::new(),
            data_dir: Self::default_data_dir(),
            cc_url: Self::default_cc_url(),
            cluster_secret: String::new(),
            heartbeat_increment_seconds: Self::default_heartbeat_increment(),
            heartbeat_sweep_millis: Self::default_heartbeat_sweep(),
            scruffy_period_millis: Self::default_scruffy_period(),
            scruffy_max_age_seconds: Self::default_scruffy_max_age(),
            lock_deadline_millis: Self::default_lock_deadline(),
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}
