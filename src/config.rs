//! Tool settings for the `cm` binary
//!
//! These are settings of the tool itself, read from the environment, as
//! opposed to the per-project `cm.yaml` handled by [`crate::model`].
//!
//! # Environment Variables
//!
//! - `CM_LOG_LEVEL`: trace|debug|info|warn|error - default: "warn"
//! - `CM_RUNTIME`: auto|docker|podman - overrides `runtime.backend` of the project
//! - `CM_CACHE_DIR`: asset cache directory, relative to the project - default: ".cm-cache"
//! - `CM_DOWNLOAD_TIMEOUT`: asset download timeout in seconds - default: "300"

use crate::cache::{is_valid_cache_dir, DEFAULT_CACHE_DIR};
use crate::runtime::RuntimeBackend;
use crate::util::logging::try_parse_level;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LOG_LEVEL: &str = "warn";
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const MAX_DOWNLOAD_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid {variable} value '{value}': {reason}")]
    InvalidValue {
        variable: String,
        value: String,
        reason: String,
    },

    #[error("Settings validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicConfig {
    pub log_level: String,

    /// Backend forced from the environment, if any
    pub runtime: Option<RuntimeBackend>,

    /// Asset cache directory, relative to the project directory
    pub cache_dir: PathBuf,

    pub download_timeout_secs: u64,
}

impl Default for MagicConfig {
    /// Settings from `CM_*` environment variables, defaults where unset
    ///
    /// Unparseable values are kept as-is where possible so [`Self::validate`]
    /// can report them; a malformed timeout falls back to its default.
    fn default() -> Self {
        let log_level = env::var("CM_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        let runtime = env::var("CM_RUNTIME")
            .ok()
            .and_then(|value| RuntimeBackend::parse(&value));

        let cache_dir = env::var("CM_CACHE_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

        let download_timeout_secs = env::var("CM_DOWNLOAD_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS);

        Self {
            log_level,
            runtime,
            cache_dir,
            download_timeout_secs,
        }
    }
}

impl MagicConfig {
    /// Like [`Default::default`], but rejects a `CM_RUNTIME` that names no backend
    pub fn from_env() -> Result<Self, SettingsError> {
        if let Ok(value) = env::var("CM_RUNTIME") {
            if RuntimeBackend::parse(&value).is_none() {
                return Err(SettingsError::InvalidValue {
                    variable: "CM_RUNTIME".to_string(),
                    value,
                    reason: "expected auto, docker or podman".to_string(),
                });
            }
        }
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.download_timeout_secs == 0 {
            return Err(SettingsError::ValidationFailed(
                "Download timeout must be at least 1 second".to_string(),
            ));
        }
        if self.download_timeout_secs > MAX_DOWNLOAD_TIMEOUT_SECS {
            return Err(SettingsError::ValidationFailed(
                "Download timeout cannot exceed 1 hour".to_string(),
            ));
        }

        if try_parse_level(&self.log_level).is_none() {
            return Err(SettingsError::ValidationFailed(format!(
                "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if !is_valid_cache_dir(&self.cache_dir) {
            return Err(SettingsError::ValidationFailed(format!(
                "Cache directory '{}' must be relative to the project and stay inside it",
                self.cache_dir.display()
            )));
        }

        Ok(())
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Cache directory in the `/`-separated form used inside build files
    pub fn cache_dir_str(&self) -> String {
        self.cache_dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Backend to use for a project, honouring the environment override
    pub fn effective_runtime(&self, project_backend: RuntimeBackend) -> RuntimeBackend {
        self.runtime.unwrap_or(project_backend)
    }

    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("log_level".to_string(), self.log_level.clone());
        map.insert(
            "runtime".to_string(),
            self.runtime
                .map(|r| r.to_string())
                .unwrap_or_else(|| "(project setting)".to_string()),
        );
        map.insert("cache_dir".to_string(), self.cache_dir_str());
        map.insert(
            "download_timeout_secs".to_string(),
            self.download_timeout_secs.to_string(),
        );
        map
    }
}

impl fmt::Display for MagicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "container-magic settings:")?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        match self.runtime {
            Some(runtime) => writeln!(f, "  Runtime: {} (from CM_RUNTIME)", runtime)?,
            None => writeln!(f, "  Runtime: from project")?,
        }
        writeln!(f, "  Cache Dir: {}", self.cache_dir_str())?;
        writeln!(f, "  Download Timeout: {}s", self.download_timeout_secs)?;
        Ok(())
    }
}
