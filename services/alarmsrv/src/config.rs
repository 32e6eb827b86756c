//! AlarmSrv Configuration
//!
//! Loaded with figment: built-in defaults, then the YAML file, then
//! `ALARMSRV_` environment variables (`ALARMSRV_MAIL__FROM_ADDRESS=...`).

use crate::error::Result;
use crate::logging::LoggingConfig;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "ALARMSRV_CONFIG";

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config/alarmsrv.yaml";

/// Alarm service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// Outgoing notification email settings
    pub mail: MailConfig,
    /// Notification template lookup
    pub templates: TemplatesConfig,
    /// Evaluation limits
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Notification email settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Sender address
    pub from_address: String,
    /// Prepended to the event display (`Event Alert: DV-12`)
    pub subject_prefix: String,
    /// Named template for the plain-text body
    pub plain_template: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from_address: "noreply@localhost.com".to_string(),
            subject_prefix: "Event Alert: ".to_string(),
            plain_template: "mail.txt".to_string(),
        }
    }
}

/// Template directory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Directory holding named notification templates
    pub dir: PathBuf,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("templates"),
        }
    }
}

/// Save-time limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum alarm formula length
    pub formula_max_len: usize,
    /// Maximum monitor lookup length
    pub lookup_max_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            formula_max_len: 255,
            lookup_max_len: voltage_lookup::DEFAULT_MAX_LEN,
        }
    }
}

impl AlarmConfig {
    /// Load from `$ALARMSRV_CONFIG` or `config/alarmsrv.yaml`
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    /// Load from a specific file; a missing file leaves the defaults in place
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Figment::from(Serialized::defaults(AlarmConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("ALARMSRV_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Generate default configuration file
    pub fn generate_default_config() -> String {
        let config = Self::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate config file".to_string())
    }
}
