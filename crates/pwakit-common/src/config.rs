//! Worker configuration

use crate::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Configuration for one offline worker instance.
///
/// Every field has a default, so a config file only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the worker serves; relative paths resolve against it.
    pub origin: String,

    /// Name of the current cache. Embeds the version tag.
    pub cache_name: String,

    /// Paths pre-cached at install, in order.
    pub manifest: Vec<String>,

    /// Durable store database name
    pub db_name: String,

    /// Durable store object store name
    pub store_name: String,

    /// Path of the counter mutation endpoint.
    pub mutation_path: String,

    /// Substrings identifying external avatar image hosts.
    pub avatar_hosts: Vec<String>,

    /// Local image served in place of an unreachable avatar.
    pub placeholder_path: String,

    /// Body of the synthetic 503 when no total has been seen yet.
    pub offline_total: String,

    /// Message posted to page clients after a full replay.
    pub processed_message: String,

    /// Directory holding the durable store.
    pub data_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000/".to_string(),
            cache_name: "pwa-demo-v1".to_string(),
            manifest: vec![
                "/".to_string(),
                "/demo.css".to_string(),
                "/demo.js".to_string(),
                "/images/avatar.jpg".to_string(),
                "/images/birthday-192.jpg".to_string(),
            ],
            db_name: "my-db".to_string(),
            store_name: "my-store".to_string(),
            mutation_path: "/total".to_string(),
            avatar_hosts: vec!["githubusercontent.com".to_string()],
            placeholder_path: "/images/avatar.jpg".to_string(),
            offline_total: "0".to_string(),
            processed_message: "queued actions were processed".to_string(),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pwakit"),
        }
    }
}

impl WorkerConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading worker config");
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the worker relies on.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(CommonError::config("cache_name must not be empty"));
        }
        if !self.mutation_path.starts_with('/') {
            return Err(CommonError::config(format!(
                "mutation_path must start with '/': {}",
                self.mutation_path
            )));
        }
        if !self.placeholder_path.starts_with('/') {
            return Err(CommonError::config(format!(
                "placeholder_path must start with '/': {}",
                self.placeholder_path
            )));
        }
        let origin = self.origin_url()?;
        if origin.cannot_be_a_base() {
            return Err(CommonError::config(format!(
                "origin cannot be a base URL: {}",
                self.origin
            )));
        }
        Ok(())
    }

    /// The origin as a parsed URL.
    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin)
            .map_err(|e| CommonError::config(format!("invalid origin {}: {}", self.origin, e)))
    }

    /// Resolve a path (or absolute URL) against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin_url()?
            .join(path)
            .map_err(|e| CommonError::config(format!("cannot resolve {}: {}", path, e)))
    }

    /// Absolute URL of the mutation endpoint.
    pub fn mutation_url(&self) -> Result<Url> {
        self.resolve(&self.mutation_path)
    }

    /// Absolute URL of the placeholder avatar.
    pub fn placeholder_url(&self) -> Result<Url> {
        self.resolve(&self.placeholder_path)
    }

    /// File backing the durable store.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite3", self.db_name))
    }
}
