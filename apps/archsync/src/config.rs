//! # Configuration
//!
//! Settings are layered, later layers winning:
//!
//! 1. Built-in defaults
//! 2. `archsync.toml` (the `--config` path, or `./archsync.toml` if present)
//! 3. Environment variables
//! 4. CLI flags (applied by the CLI module)
//!
//! ## File Format
//!
//! ```toml
//! [client]
//! base_url = "http://127.0.0.1:8080"
//! api_key = "secret"
//! timeout_secs = 30
//! can_overwrite = true
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! rate_limit = 100
//! cors_origins = ["http://localhost:3000"]
//!
//! [server.schema]
//! ec2 = ["instanceType", "ami"]
//! ```
//!
//! ## Environment Variables
//!
//! - `ARCHSYNC_URL`: client base URL
//! - `ARCHSYNC_API_KEY`: bearer key, sent by the client and required by the server
//! - `ARCHSYNC_RATE_LIMIT`: server requests per second (0 disables)
//! - `ARCHSYNC_CORS_ORIGINS`: comma-separated origins, or `*`

use archsync_core::{ArchsyncError, ResourceSchema};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "archsync.toml";

/// Default requests per second for the development server.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

// =============================================================================
// CONFIG SECTIONS
// =============================================================================

/// Everything `archsync.toml` can hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

/// How the CLI reaches the version store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Whether this principal may force an apply over a newer version.
    pub can_overwrite: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: None,
            timeout_secs: 30,
            can_overwrite: true,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The development server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests per second; 0 disables rate limiting.
    pub rate_limit: u32,
    /// `None` allows localhost only; `["*"]` allows every origin.
    pub cors_origins: Option<Vec<String>>,
    /// When set, every route except `/health` requires this bearer key.
    pub api_key: Option<String>,
    /// Allowed property names per resource type.
    pub schema: ResourceSchema,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            rate_limit: DEFAULT_RATE_LIMIT,
            cors_origins: None,
            api_key: None,
            schema: ResourceSchema::default(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// LOADING
// =============================================================================

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ArchsyncError> {
        toml::from_str(raw)
            .map_err(|e| ArchsyncError::InvalidInput(format!("invalid configuration: {e}")))
    }

    /// Read a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ArchsyncError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ArchsyncError::InvalidInput(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults, then the file, then the process environment.
    ///
    /// An explicit `path` must exist; the implicit `./archsync.toml` is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ArchsyncError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply environment overrides through `lookup`. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("ARCHSYNC_URL") {
            self.client.base_url = url;
        }
        if let Some(key) = var("ARCHSYNC_API_KEY") {
            self.client.api_key = Some(key.clone());
            self.server.api_key = Some(key);
        }
        if let Some(raw) = var("ARCHSYNC_RATE_LIMIT") {
            match raw.trim().parse() {
                Ok(rate) => self.server.rate_limit = rate,
                Err(e) => tracing::warn!("Ignoring ARCHSYNC_RATE_LIMIT '{}': {}", raw, e),
            }
        }
        if let Some(raw) = var("ARCHSYNC_CORS_ORIGINS") {
            self.server.cors_origins = Some(
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
