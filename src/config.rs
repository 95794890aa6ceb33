//! Application Configuration
//!
//! This module provides configuration management for the application,
//! supporting YAML configuration files with sensible defaults. The admin
//! bootstrap credentials are the one section without a default: startup
//! aborts when they are missing.

use crate::store::meta_writer::DEFAULT_POOL_WIDTH;
use crate::store::pathing::DEFAULT_MAX_FILENAME_LENGTH;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

const CONFIG_PATH: &str = "strongbox.yaml";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata writer configuration
    #[serde(default)]
    pub meta_writer: MetaWriterConfig,
    /// Bootstrap admin credentials; startup fails when absent
    #[serde(default)]
    pub admin: Option<AdminConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Maximum upload size in bytes
    pub max_upload_bytes: u64,
}

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory under which all repositories live
    pub root: String,
    /// Maximum length of a single path segment; longer encoded names are
    /// split into nested directories
    pub max_filename_length: usize,
}

/// Metadata writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaWriterConfig {
    /// Maximum number of concurrent background metadata flushes
    pub pool_width: usize,
}

/// Bootstrap admin tenant credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// The admin repository's tenant UUID (doubles as its access key)
    pub uuid: Uuid,
    /// The admin tenant's HMAC secret
    pub secret: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Path to the log4rs configuration file
    pub config_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9720,
            workers: 4,
            max_upload_bytes: 1073741824, // 1GB
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "./data".to_string(),
            max_filename_length: DEFAULT_MAX_FILENAME_LENGTH,
        }
    }
}

impl Default for MetaWriterConfig {
    fn default() -> Self {
        Self {
            pool_width: DEFAULT_POOL_WIDTH,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "strongbox_log.yaml".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            meta_writer: MetaWriterConfig::default(),
            admin: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file, use defaults if not found
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        if Path::new(CONFIG_PATH).exists() {
            let content = fs::read_to_string(CONFIG_PATH)?;
            let config: AppConfig = serde_yaml::from_str(&content)?;
            info!("Loaded configuration from {}", CONFIG_PATH);
            Ok(config)
        } else {
            warn!("Config file {} not found, using defaults", CONFIG_PATH);
            Ok(Self::default())
        }
    }
}
