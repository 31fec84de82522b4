//! Command center configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for the command center.
#[derive(Debug, Clone, Deserialize)]
pub struct CcConfig {
    /// Listen address (e.g., "0.0.0.0:9090").
    #[serde(default = "CcConfig::default_listen_addr")]
    pub listen_addr: String,

    /// Directory of the catalog database.
    #[serde(default = "CcConfig::default_data_dir")]
    pub data_dir: PathBuf,

    /// Secret SCVs present on the internal catalog endpoint.
    #[serde(default)]
    pub cluster_secret: String,

    /// Failed SCV requests in a row before the SCV counts as offline.
    #[serde(default = "CcConfig::default_max_fails")]
    pub max_fails: u32,

    /// Period of the wholesale shard directory refresh.
    #[serde(default = "CcConfig::default_directory_refresh")]
    pub directory_refresh_seconds: u64,

    /// Period of the SCV liveness ping.
    #[serde(default = "CcConfig::default_scv_ping")]
    pub scv_ping_millis: u64,

    /// Connect timeout for requests to SCVs.
    #[serde(default = "CcConfig::default_scv_connect_timeout")]
    pub scv_connect_timeout_millis: u64,

    /// URL scheme used to reach SCVs and handed to cores.
    #[serde(default = "CcConfig::default_scv_scheme")]
    pub scv_scheme: String,

    /// Email of the bootstrap admin.
    #[serde(default)]
    pub admin_email: Option<String>,

    /// Password of the bootstrap admin.
    #[serde(default)]
    pub admin_password: Option<String>,

    /// Maximum request body size in bytes.
    #[serde(default = "CcConfig::default_max_body")]
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    #[serde(default = "CcConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// PEM certificate for in-process TLS.
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,

    /// PEM private key for in-process TLS.
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
}

impl CcConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:9090".to_string()
    }

    fn default_data_dir() -> PathBuf {
        PathBuf::from("/data/siege-cc")
    }

    const fn default_max_fails() -> u32 {
        5
    }

    const fn default_directory_refresh() -> u64 {
        60
    }

    const fn default_scv_ping() -> u64 {
        2000
    }

    const fn default_scv_connect_timeout() -> u64 {
        2000
    }

    fn default_scv_scheme() -> String {
        "https".to_string()
    }

    const fn default_max_body() -> usize {
        1024 * 1024
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    /// Load configuration from environment variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CLUSTER_SECRET") {
            config.cluster_secret = val;
        }
        parse_env("MAX_FAILS", &mut config.max_fails);
        parse_env("DIRECTORY_REFRESH_SECONDS", &mut config.directory_refresh_seconds);
        parse_env("SCV_PING_MILLIS", &mut config.scv_ping_millis);
        parse_env("SCV_CONNECT_TIMEOUT_MILLIS", &mut config.scv_connect_timeout_millis);
        if let Ok(val) = std::env::var("SCV_SCHEME") {
            config.scv_scheme = val;
        }
        config.admin_email = std::env::var("ADMIN_EMAIL").ok().filter(|v| !v.is_empty());
        config.admin_password = std::env::var("ADMIN_PASSWORD").ok().filter(|v| !v.is_empty());
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
        if self.cluster_secret.is_empty() {
            return Err("CLUSTER_SECRET must be set".to_string());
        }
        if self.max_fails == 0 {
            return Err("MAX_FAILS must be at least 1".to_string());
        }
        if self.admin_email.is_some() != self.admin_password.is_some() {
            return Err("ADMIN_EMAIL and ADMIN_PASSWORD must be set together".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }

    /// Directory of the catalog database.
    #[must_use]
    pub fn catalog_dir(&self) -> PathBuf {
        self.data_dir.join("catalog")
    }

    /// Get the directory refresh period as a `Duration`.
    #[must_use]
    pub const fn directory_refresh(&self) -> Duration {
        Duration::from_secs(self.directory_refresh_seconds)
    }

    /// Get the SCV ping period as a `Duration`.
    #[must_use]
    pub const fn scv_ping(&self) -> Duration {
        Duration::from_millis(self.scv_ping_millis)
    }

    /// Get the SCV connect timeout as a `Duration`.
    #[must_use]
    pub const fn scv_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.scv_connect_timeout_millis)
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

impl Default for CcConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            data_dir: Self::default_data_dir(),
            cluster_secret: String::new(),
            max_fails: Self::default_max_fails(),
            directory_refresh_seconds: Self::default_directory_refresh(),
            scv_ping_millis: Self::default_scv_ping(),
            scv_connect_timeout_millis: Self::default_scv_connect_timeout(),
            scv_scheme: Self::default_scv_scheme(),
            admin_email: None,
            admin_password: None,
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CcConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:9090");
        assert_eq!(config.max_fails, 5);
        assert_eq!(config.directory_refresh(), Duration::from_secs(60));
        assert_eq!(config.scv_ping(), Duration::from_millis(2000));
        assert_eq!(config.scv_scheme, "https");
    }

    #[test]
    fn validate_requires_secret() {
        let mut config = CcConfig::default();
        assert!(config.validate().is_err());
        config.cluster_secret = "s".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_pairs() {
        let mut config = CcConfig {
            cluster_secret: "s".to_string(),
            admin_email: Some("root@example.com".to_string()),
            ..CcConfig::default()
        };
        assert!(config.validate().is_err());
        config.admin_password = Some("pw".to_string());
        assert!(config.validate().is_ok());
        config.tls_key_path = Some(PathBuf::from("key.pem"));
        assert!(config.validate().is_err());
    }
}
