//! Controller configuration with layered loading.
//!
//! Loading precedence (highest wins):
//! 1. Environment variables (`OFFLINE_CACHE_*`)
//! 2. TOML config file (if `OFFLINE_CACHE_CONFIG` is set)
//! 3. Built-in defaults

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::{BucketName, CleanupScope};
use crate::classify::DEFAULT_FONT_HOSTS;
use crate::sync::{DEFAULT_SYNC_ENDPOINT, DEFAULT_SYNC_TAG};

mod validation;

pub use validation::ConfigError;

/// Environment variable naming a TOML config file.
pub const CONFIG_FILE_ENV: &str = "OFFLINE_CACHE_CONFIG";

/// Prefix for per-field environment overrides.
pub const ENV_PREFIX: &str = "OFFLINE_CACHE_";

/// Everything the controller needs to know about the site it caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Application part of the bucket name.
    #[serde(default = "default_app")]
    pub app: String,

    /// Bucket version; bump to invalidate every cached entry.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Origin the controller is registered for. Relative manifest paths,
    /// the offline document and the sync endpoint resolve against it.
    #[serde(default = "default_origin")]
    pub origin: Url,

    /// Paths fetched and stored at install, in order.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Document served when a navigation fails and nothing else is cached.
    /// Must be listed in `precache`.
    #[serde(default = "default_offline_document")]
    pub offline_document: String,

    /// Cross-origin hosts whose requests are still intercepted.
    #[serde(default = "default_font_hosts")]
    pub font_hosts: Vec<String>,

    /// When set, activation only deletes superseded buckets with this prefix.
    #[serde(default)]
    pub cleanup_prefix: Option<String>,

    /// Activate as soon as install completes.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,

    #[serde(default = "default_sync_endpoint")]
    pub sync_endpoint: String,

    /// Per-request origin timeout in milliseconds.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,
}

fn default_app() -> String {
    "copycash".into()
}

fn default_version() -> u32 {
    1
}

fn default_origin() -> Url {
    Url::parse("http://localhost:8080").expect("static origin is valid")
}

fn default_precache() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/manifest.json",
        "/favicon.png",
        "/icons/apple-icon-180.png",
        "/css/critical.css",
        "/scripts/critical.js",
        "/offline.html",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_offline_document() -> String {
    "/offline.html".into()
}

fn default_font_hosts() -> Vec<String> {
    DEFAULT_FONT_HOSTS.iter().map(|h| h.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_sync_tag() -> String {
    DEFAULT_SYNC_TAG.into()
}

fn default_sync_endpoint() -> String {
    DEFAULT_SYNC_ENDPOINT.into()
}

fn default_network_timeout_ms() -> u64 {
    10_000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            app: default_app(),
            version: default_version(),
            origin: default_origin(),
            precache: default_precache(),
            offline_document: default_offline_document(),
            font_hosts: default_font_hosts(),
            cleanup_prefix: None,
            skip_waiting: true,
            sync_tag: default_sync_tag(),
            sync_endpoint: default_sync_endpoint(),
            network_timeout_ms: default_network_timeout_ms(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::LoadFailed`] if a source cannot be read or
    /// parsed, or [`ConfigError::Invalid`] if the result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var(CONFIG_FILE_ENV) {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["config"])
                .map(|key| key.as_str().to_lowercase().into()),
        );

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn bucket_name(&self) -> BucketName {
        BucketName::new(self.app.clone(), self.version)
    }

    pub fn cleanup_scope(&self) -> CleanupScope {
        match &self.cleanup_prefix {
            Some(prefix) => CleanupScope::Prefix(prefix.clone()),
            None => CleanupScope::All,
        }
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    /// Resolves a site path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin.join(path).map_err(|e| ConfigError::Invalid {
            field: "path".into(),
            reason: format!("{path:?} cannot be resolved against {}: {e}", self.origin),
        })
    }

    /// The pre-cache manifest as absolute URLs, in order.
    pub fn precache_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn offline_document_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.offline_document)
    }

    pub fn sync_endpoint_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.sync_endpoint)
    }
}
