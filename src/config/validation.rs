//! Configuration validation rules.

use thiserror::Error;

use super::ControllerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

impl ControllerConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if:
    /// - `app` is empty or `version` is 0
    /// - `origin` is not an `http`/`https` URL with a host
    /// - `precache` is empty or holds an entry that is not an absolute path
    /// - `offline_document` is not one of the `precache` entries
    /// - `sync_tag` is empty or `network_timeout_ms` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.is_empty() {
            return Err(invalid("app", "must not be empty"));
        }
        if self.version == 0 {
            return Err(invalid("version", "must be at least 1"));
        }

        if !matches!(self.origin.scheme(), "http" | "https") || self.origin.host_str().is_none() {
            return Err(invalid(
                "origin",
                format!("{} is not an http(s) origin", self.origin),
            ));
        }

        if self.precache.is_empty() {
            return Err(invalid("precache", "must list at least one path"));
        }
        if let Some(bad) = self.precache.iter().find(|p| !p.starts_with('/')) {
            return Err(invalid(
                "precache",
                format!("{bad:?} is not an absolute path"),
            ));
        }
        if !self.precache.contains(&self.offline_document) {
            return Err(invalid(
                "offline_document",
                format!("{:?} must also be listed in precache", self.offline_document),
            ));
        }

        if self.sync_tag.is_empty() {
            return Err(invalid("sync_tag", "must not be empty"));
        }
        if self.network_timeout_ms == 0 {
            return Err(invalid("network_timeout_ms", "must be greater than 0"));
        }

        Ok(())
    }
}
