//! Engine settings
//!
//! Settings are read from a JSON file (by default
//! `<config dir>/profilegate/settings.json`) and then overridden by
//! `PROFILEGATE_*` environment variables.

use crate::tracing_support::{TracingConfig, TracingFormat};
use profilegate_host::loader::DEFAULT_FUEL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Application name used for default paths
pub const APP_NAME: &str = "profilegate";

/// Settings file name inside the application config directory
pub const SETTINGS_FILE: &str = "settings.json";

pub const ENV_PLUGIN_DIRS: &str = "PROFILEGATE_PLUGIN_DIRS";
pub const ENV_AUDIT_LOG: &str = "PROFILEGATE_AUDIT_LOG";
pub const ENV_LOG_LEVEL: &str = "PROFILEGATE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "PROFILEGATE_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("Invalid log format '{0}'")]
    InvalidFormat(String),
}

/// Logging section of the settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`; RUST_LOG when unset
    pub level: Option<String>,
    pub format: TracingFormat,
}

impl LogSettings {
    pub fn tracing_config(&self) -> Result<TracingConfig, SettingsError> {
        let level = self
            .level
            .as_deref()
            .map(|l| {
                l.parse::<tracing::Level>()
                    .map_err(|_| SettingsError::InvalidLevel(l.to_string()))
            })
            .transpose()?;
        Ok(TracingConfig {
            level,
            format: self.format,
            ..TracingConfig::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directories scanned for `.wasm` validators
    pub plugin_dirs: Vec<PathBuf>,
    /// JSONL audit log; auditing is off when unset
    pub audit_log: Option<PathBuf>,
    /// Role that bypasses profile rules
    pub super_admin_role: Option<String>,
    /// Fuel granted to each validator call
    pub validator_fuel: u64,
    pub log: LogSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            plugin_dirs: profilegate_host::default_plugin_dirs(APP_NAME),
            audit_log: None,
            super_admin_role: None,
            validator_fuel: DEFAULT_FUEL,
            log: LogSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default settings file location for an application
    pub fn default_path(app_name: &str) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(app_name).join(SETTINGS_FILE))
    }

    /// Load the application's settings file if present, defaults otherwise,
    /// then apply environment overrides
    pub fn default_for_app(app_name: &str) -> Result<Self, SettingsError> {
        let mut settings = match Self::default_path(app_name) {
            Some(path) if path.exists() => Self::load(&path)?,
            _ => Self::default(),
        };
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), SettingsError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any variable source
    pub fn apply_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), SettingsError> {
        if let Some(dirs) = var(ENV_PLUGIN_DIRS) {
            self.plugin_dirs = std::env::split_paths(&dirs).collect();
        }
        if let Some(path) = var(ENV_AUDIT_LOG) {
            self.audit_log = Some(PathBuf::from(path));
        }
        if let Some(level) = var(ENV_LOG_LEVEL) {
            level
                .parse::<tracing::Level>()
                .map_err(|_| SettingsError::InvalidLevel(level.clone()))?;
            self.log.level = Some(level);
        }
        if let Some(format) = var(ENV_LOG_FORMAT) {
            self.log.format = serde_json::from_value(serde_json::Value::String(format.clone()))
                .map_err(|_| SettingsError::InvalidFormat(format))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            r#"{"audit_log": "/var/log/profilegate/audit.jsonl", "log": {"format": "json"}}"#,
        )
        .unwrap();

        let settings = EngineSettings::load(&path).unwrap();
        assert_eq!(
            settings.audit_log,
            Some(PathBuf::from("/var/log/profilegate/audit.jsonl"))
        );
        assert_eq!(settings.log.format, TracingFormat::Json);
        assert_eq!(settings.validator_fuel, DEFAULT_FUEL);
    }

    #[test]
    fn test_load_errors() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            EngineSettings::load(temp.path().join("missing.json")),
            Err(SettingsError::Read { .. })
        ));

        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            EngineSettings::load(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_AUDIT_LOG, "/tmp/audit.jsonl"),
            (ENV_LOG_LEVEL, "debug"),
            (ENV_LOG_FORMAT, "compact"),
        ]
        .into_iter()
        .collect();

        let mut settings = EngineSettings::default();
        settings
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.audit_log, Some(PathBuf::from("/tmp/audit.jsonl")));
        assert_eq!(settings.log.format, TracingFormat::Compact);
        let config = settings.log.tracing_config().unwrap();
        assert_eq!(config.level, Some(tracing::Level::DEBUG));
    }

    #[test]
    fn test_invalid_level_override() {
        let mut settings = EngineSettings::default();
        let err = settings
            .apply_overrides(|k| (k == ENV_LOG_LEVEL).then(|| "loud".to_string()))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidLevel(l) if l == "loud"));
    }
}
