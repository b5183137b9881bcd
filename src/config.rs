//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_QUEUE_CAPACITY, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The queue capacity and the retention window for finished jobs are
//! deliberately configuration-driven: neither has a universally right
//! value, so both must be tunable per deployment.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Job queue and retention configuration.
///
/// ## Fields:
/// - `capacity`: maximum number of queued jobs before submissions are
///   rejected with a retry-later response (the backpressure bound)
/// - `retention_hours`: how long finished/failed/canceled jobs stay
///   queryable before the cleanup task evicts them
/// - `cleanup_interval_hours`: how often the cleanup task sweeps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
    pub retention_hours: u64,
    pub cleanup_interval_hours: u64,
}

/// Storage adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding uploaded media and produced transcripts
    pub data_dir: String,
}

/// Transcriber subprocess configuration.
///
/// ## Fields:
/// - `command`: path to the GPU transcriber executable
/// - `model`: model name passed through to the transcriber
/// - `output_format`: "txt" or "json"
/// - `work_dir`: scratch directory for staged inputs and outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub command: String,
    pub model: String,
    pub output_format: String,
    pub work_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            queue: QueueConfig {
                capacity: 8,               // One GPU; deep queues only hide latency
                retention_hours: 48,
                cleanup_interval_hours: 1,
            },
            storage: StorageConfig {
                data_dir: "data".to_string(),
            },
            engine: EngineConfig {
                command: "transcribe-gpu".to_string(),
                model: "medium".to_string(),    // Good balance of accuracy and speed
                output_format: "txt".to_string(),
                work_dir: "work".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and APP_* environment
    /// variables, plus the HOST/PORT overrides deployment platforms set.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Example: APP_QUEUE_CAPACITY becomes queue.capacity
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense. Catching these
    /// at startup beats discovering them when the first job arrives.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.queue.capacity == 0 {
            return Err(anyhow::anyhow!("Queue capacity must be greater than 0"));
        }

        if self.queue.retention_hours == 0 {
            return Err(anyhow::anyhow!("Job retention must be at least one hour"));
        }

        if self.queue.cleanup_interval_hours == 0 {
            return Err(anyhow::anyhow!("Cleanup interval must be at least one hour"));
        }

        if self.engine.command.trim().is_empty() {
            return Err(anyhow::anyhow!("Engine command cannot be empty"));
        }

        if !matches!(self.engine.output_format.as_str(), "txt" | "json") {
            return Err(anyhow::anyhow!(
                "Engine output format must be 'txt' or 'json', got '{}'",
                self.engine.output_format
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config
    /// updates). Only the fields present in the JSON are touched.
    ///
    /// Note that the queue capacity and storage/engine paths are fixed at
    /// process start; updating them here affects reporting, not the
    /// already-constructed queue and adapters.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(queue) = partial_config.get("queue") {
            if let Some(capacity) = queue.get("capacity").and_then(|v| v.as_u64()) {
                self.queue.capacity = capacity as usize;
            }
            if let Some(retention) = queue.get("retention_hours").and_then(|v| v.as_u64()) {
                self.queue.retention_hours = retention;
            }
            if let Some(interval) = queue.get("cleanup_interval_hours").and_then(|v| v.as_u64()) {
                self.queue.cleanup_interval_hours = interval;
            }
        }

        if let Some(engine) = partial_config.get("engine") {
            if let Some(model) = engine.get("model").and_then(|v| v.as_str()) {
                self.engine.model = model.to_string();
            }
            if let Some(format) = engine.get("output_format").and_then(|v| v.as_str()) {
                self.engine.output_format = format.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.queue.capacity, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.queue.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.output_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"queue": {"capacity": 32}, "engine": {"model": "large"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.queue.capacity, 32);
        assert_eq!(config.engine.model, "large");
        // Untouched fields keep their values
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        let json = r#"{"engine": {"output_format": "pdf"}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
