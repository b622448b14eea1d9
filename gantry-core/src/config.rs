// Configuration surface consumed from an external loader

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Logger verbosity. Debug (or finer) implies development mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Response compression settings. Read-only here; the compressing
/// middleware lives outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 6,
        }
    }
}

/// Server settings handed to the application at startup. Loading (file,
/// environment overlay) is an external collaborator's job; the core only
/// reads these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:8080`.
    pub address: String,
    /// Graceful-shutdown budget in seconds.
    pub shutdown_timeout_secs: u64,
    pub log_level: LogLevel,
    #[serde(default)]
    pub compression: CompressionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            shutdown_timeout_secs: 30,
            log_level: LogLevel::Info,
            compression: CompressionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Development mode is implied by debug-level logging.
    pub fn development(&self) -> bool {
        matches!(self.log_level, LogLevel::Debug | LogLevel::Trace)
    }

    /// JSON snapshot with sensitive-looking values masked, for the
    /// `/_config` dev endpoint.
    pub fn masked(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        mask_value(&mut value);
        value
    }
}

const SENSITIVE_MARKERS: [&str; 4] = ["secret", "password", "token", "key"];

fn mask_value(value: &mut Value) {
    if let Value::Object(map) = value {
        for (name, entry) in map.iter_mut() {
            let lowered = name.to_ascii_lowercase();
            if SENSITIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
                *entry = Value::String("***".to_string());
            } else {
                mask_value(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_follows_log_level() {
        let mut config = ServerConfig::default();
        assert!(!config.development());
        config.log_level = LogLevel::Debug;
        assert!(config.development());
    }

    #[test]
    fn test_shutdown_timeout_conversion() {
        let config = ServerConfig {
            shutdown_timeout_secs: 5,
            ..Default::default()
        };
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_masking_hides_sensitive_keys() {
        let mut value = serde_json::json!({
            "address": "0.0.0.0:80",
            "api_token": "s3cr3t",
            "nested": { "db_password": "hunter2", "pool": 4 }
        });
        mask_value(&mut value);
        assert_eq!(value["api_token"], "***");
        assert_eq!(value["nested"]["db_password"], "***");
        assert_eq!(value["nested"]["pool"], 4);
        assert_eq!(value["address"], "0.0.0.0:80");
    }
}
