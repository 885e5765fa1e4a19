//! Configuration Management
//!
//! Handles persistent configuration storage for cloudgraph.

use crate::client::transport::DEFAULT_MAX_CONNECTIONS;
use crate::client::PoolConfig;
use crate::resource::DEFAULT_CHUNK_SIZE;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_REGION: &str = "us-east-1";
const REGION_ENV_VARS: &[&str] = &["AWS_REGION", "AWS_DEFAULT_REGION"];

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default region
    #[serde(default)]
    pub region: Option<String>,
    /// Gateway endpoint for the HTTP transport
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Replay fixtures to use instead of a live endpoint
    #[serde(default)]
    pub fixtures: Option<PathBuf>,
    /// Concurrent connections per service client
    #[serde(default)]
    pub max_pool_connections: Option<usize>,
    /// Batch size for chunked describe calls
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudgraph").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse a config document, falling back to defaults when malformed
    pub fn parse(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed config: {}", e);
            Self::default()
        })
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            anyhow::bail!("No config directory on this platform");
        };
        self.save_to(&path)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::info!("Saved config to {}", path.display());

        Ok(())
    }

    /// Get effective region (CLI > config > environment > default)
    pub fn effective_region(&self, cli: Option<&str>) -> String {
        self.effective_region_with(cli, |var| std::env::var(var).ok())
    }

    fn effective_region_with<F>(&self, cli: Option<&str>, env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        cli.map(|s| s.to_string())
            .or_else(|| self.region.clone())
            .or_else(|| {
                REGION_ENV_VARS
                    .iter()
                    .find_map(|var| env(var).filter(|v| !v.is_empty()))
            })
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    /// Connection pool sizing for every client
    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self
                .max_pool_connections
                .unwrap_or(DEFAULT_MAX_CONNECTIONS)
                .max(1),
        }
    }

    pub fn effective_chunk_size(&self, cli: Option<usize>) -> usize {
        cli.or(self.chunk_size).unwrap_or(DEFAULT_CHUNK_SIZE).max(1)
    }

    /// Set region and save
    pub fn set_region(&mut self, region: &str) -> Result<()> {
        self.region = Some(region.to_string());
        self.save()
    }
}
