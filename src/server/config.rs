//! Server configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed to call the API with credentials; empty means a
    /// permissive policy (development).
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

/// Identity provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Direct JWKS endpoint; takes precedence when set
    #[serde(default)]
    pub jwks_url: Option<String>,
    /// AWS region, used together with `user_pool_id` to derive the
    /// Cognito JWKS endpoint
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub user_pool_id: Option<String>,
}

impl AuthConfig {
    /// The JWKS endpoint: the explicit URL, or derived from region and
    /// user-pool id.
    pub fn resolve_jwks_url(&self) -> anyhow::Result<String> {
        if let Some(url) = &self.jwks_url {
            return Ok(url.clone());
        }
        match (&self.region, &self.user_pool_id) {
            (Some(region), Some(pool)) => Ok(format!(
                "https://cognito-idp.{region}.amazonaws.com/{pool}/.well-known/jwks.json"
            )),
            _ => anyhow::bail!(
                "auth configuration incomplete: set auth.jwks_url, or both auth.region and auth.user_pool_id"
            ),
        }
    }
}

/// Command history storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/history.db")
}

/// Per-session metrics push settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between metrics pushes to each connected session
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_jwks_url_wins() {
        let config = AuthConfig {
            jwks_url: Some("https://keys.example.com/jwks.json".to_string()),
            region: Some("eu-west-1".to_string()),
            user_pool_id: Some("eu-west-1_abc".to_string()),
        };
        assert_eq!(
            config.resolve_jwks_url().unwrap(),
            "https://keys.example.com/jwks.json"
        );
    }

    #[test]
    fn jwks_url_derived_from_region_and_pool() {
        let config = AuthConfig {
            jwks_url: None,
            region: Some("eu-west-1".to_string()),
            user_pool_id: Some("eu-west-1_abc".to_string()),
        };
        assert_eq!(
            config.resolve_jwks_url().unwrap(),
            "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_abc/.well-known/jwks.json"
        );
    }

    #[test]
    fn incomplete_auth_config_is_rejected() {
        let config = AuthConfig::default();
        assert!(config.resolve_jwks_url().is_err());
    }

    #[test]
    fn defaults_are_sensible() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 5000);
        assert_eq!(MetricsConfig::default().interval_secs, 1);
        assert_eq!(
            HistoryConfig::default().database_path,
            PathBuf::from("data/history.db")
        );
    }
}
