//! Configuration loading and validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AuthzError, Result};

/// What to do when a background refresh fails after a stale scope was already served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmRefreshPolicy {
    /// Fail the request
    #[default]
    #[serde(alias = "fail")]
    FailRequest,
    /// Return the result computed with the stale scope
    #[serde(alias = "degrade")]
    DegradeToStale,
}

/// TLS parameters for the policy engine transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Policy engine connection and enforcement settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Enforcement switch; when off every check passes without contacting the engine
    #[serde(default)]
    pub enable: bool,

    /// Engine base URLs, tried in order
    #[serde(default)]
    pub address: Vec<String>,

    #[serde(default)]
    pub app_code: String,

    #[serde(default)]
    pub app_secret: String,

    #[serde(default = "default_system_id")]
    pub system_id: String,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub warm_refresh_policy: WarmRefreshPolicy,
}

fn default_system_id() -> String {
    "bk_cmdb".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enable: false,
            address: Vec::new(),
            app_code: String::new(),
            app_secret: String::new(),
            system_id: default_system_id(),
            tls: TlsConfig::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            warm_refresh_policy: WarmRefreshPolicy::default(),
        }
    }
}

impl AuthConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject an enabled config that cannot reach or authenticate to the engine
    pub fn validate(&self) -> Result<()> {
        if !self.enable {
            return Ok(());
        }
        if self.address.is_empty() {
            return Err(missing("address"));
        }
        if let Some(bad) = self
            .address
            .iter()
            .find(|a| !(a.starts_with("http://") || a.starts_with("https://")))
        {
            return Err(AuthzError::Config(format!(
                "policy engine address {bad:?} must start with http:// or https://"
            )));
        }
        if self.app_code.is_empty() {
            return Err(missing("app_code"));
        }
        if self.app_secret.is_empty() {
            return Err(missing("app_secret"));
        }
        if self.system_id.is_empty() {
            return Err(missing("system_id"));
        }
        if self.tls.cert_file.is_some() != self.tls.key_file.is_some() {
            return Err(AuthzError::Config(
                "tls cert_file and key_file must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `AUTHZ_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(enable) = lookup("AUTHZ_ENABLE") {
            self.enable = enable.parse().map_err(|_| {
                AuthzError::Config(format!("AUTHZ_ENABLE must be true or false, got {enable:?}"))
            })?;
        }
        if let Some(address) = lookup("AUTHZ_ADDRESS") {
            self.address = address
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(code) = lookup("AUTHZ_APP_CODE") {
            self.app_code = code;
        }
        if let Some(secret) = lookup("AUTHZ_APP_SECRET") {
            self.app_secret = secret;
        }
        Ok(())
    }
}

fn missing(field: &str) -> AuthzError {
    AuthzError::Config(format!("auth.{field} is required when authorization is enabled"))
}

/// Which policy engine implementation the gateway talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Iam,
    Memory,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl ServerSection {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl GatewayConfig {
    /// Parse a TOML document
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| AuthzError::Config(format!("invalid config: {e}")))
    }

    /// Load from an optional file, then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };

        config.auth.apply_env()?;
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.server.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend == Backend::Iam {
            self.auth.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert!(!config.auth.enable);
        assert_eq!(config.auth.system_id, "bk_cmdb");
        assert_eq!(config.auth.warm_refresh_policy, WarmRefreshPolicy::FailRequest);
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = GatewayConfig::from_toml(
            r#"
            backend = "iam"

            [server]
            port = 9000

            [auth]
            enable = true
            address = ["http://iam.local:8080"]
            app_code = "cmdb"
            app_secret = "secret"
            warm_refresh_policy = "degrade"

            [auth.tls]
            insecure_skip_verify = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(config.auth.enable);
        assert_eq!(config.auth.warm_refresh_policy, WarmRefreshPolicy::DegradeToStale);
        assert!(config.auth.tls.insecure_skip_verify);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "backend = \"memory\"\n[server]\nhost = \"127.0.0.1\"\nlog_level = \"debug\""
        )
        .unwrap();

        let config = GatewayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.log_level, "debug");
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = GatewayConfig::load(Some(path.as_path())).unwrap_err();
        assert!(matches!(err, AuthzError::Io(_)));
    }

    #[test]
    fn test_enabled_requires_credentials() {
        let mut auth = AuthConfig {
            enable: true,
            address: vec!["http://iam".to_string()],
            ..Default::default()
        };
        assert!(matches!(auth.validate(), Err(AuthzError::Config(_))));

        auth.app_code = "cmdb".to_string();
        auth.app_secret = "secret".to_string();
        assert!(auth.validate().is_ok());

        auth.address = vec!["iam:8080".to_string()];
        assert!(auth.validate().is_err());
    }

    #[test]
    fn test_memory_backend_skips_auth_validation() {
        let config = GatewayConfig {
            backend: Backend::Memory,
            auth: AuthConfig {
                enable: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("AUTHZ_ENABLE", "true"),
            ("AUTHZ_ADDRESS", "http://a:1, http://b:2"),
            ("AUTHZ_APP_CODE", "code"),
        ]
        .into_iter()
        .collect();

        let mut auth = AuthConfig::default();
        auth.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert!(auth.enable);
        assert_eq!(auth.address, vec!["http://a:1", "http://b:2"]);
        assert_eq!(auth.app_code, "code");

        let bad: HashMap<&str, &str> = [("AUTHZ_ENABLE", "yes")].into_iter().collect();
        assert!(auth.apply_overrides(|k| bad.get(k).map(|v| v.to_string())).is_err());
    }
}
