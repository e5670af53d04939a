//! Layered configuration loader for the vetting engine.
//!
//! Precedence (later layers override earlier):
//! 1. Defaults (`EngineConfig::default()`)
//! 2. File config (`config.toml` under the vetting home)
//! 3. Environment overrides (`VETTING_*` variables)
//!
//! ## Example
//!
//! ```no_run
//! use vetting_core::config_loader::ConfigLoader;
//! use std::path::PathBuf;
//!
//! let config = ConfigLoader::new()
//!     .with_vetting_home(PathBuf::from("/tmp/vetting"))
//!     .load()
//!     .expect("Failed to load config");
//! ```

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::config_types::EngineConfig;
use crate::config_types::EngineConfigLayer;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_ENV_PREFIX: &str = "VETTING";

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("I/O error loading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Config validation error: {0}")]
    Validation(String),

    #[error("Invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: String,
    },
}

/// Builder for layered configuration loading.
pub struct ConfigLoader {
    vetting_home: Option<PathBuf>,
    env_prefix: String,
    env_vars: Option<HashMap<String, String>>,
    skip_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            vetting_home: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            env_vars: None,
            skip_file: false,
            skip_env: false,
        }
    }

    /// Set the vetting home directory explicitly.
    ///
    /// If not set, it is taken from `$VETTING_HOME`, defaulting to
    /// `~/.vetting`.
    pub fn with_vetting_home(mut self, path: PathBuf) -> Self {
        self.vetting_home = Some(path);
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Read overrides from `vars` instead of the process environment.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn skip_file_layer(mut self) -> Self {
        self.skip_file = true;
        self
    }

    pub fn skip_env_layer(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load configuration with all enabled layers, then validate it.
    pub fn load(self) -> Result<EngineConfig, ConfigLoadError> {
        let mut config = EngineConfig::default();

        if !self.skip_file {
            let home = self.resolve_vetting_home()?;
            Self::load_from_file(&home)?.apply_to(&mut config);
        }

        if !self.skip_env {
            self.env_layer()?.apply_to(&mut config);
        }

        validate(&config)?;
        Ok(config)
    }

    /// Priority: explicit builder value, `$VETTING_HOME`, `~/.vetting`.
    pub fn resolve_vetting_home(&self) -> Result<PathBuf, ConfigLoadError> {
        if let Some(ref path) = self.vetting_home {
            return Ok(path.clone());
        }

        if let Some(path) = self.env_var(&format!("{}_HOME", self.env_prefix)) {
            return Ok(PathBuf::from(path));
        }

        dirs::home_dir()
            .map(|home| home.join(".vetting"))
            .ok_or_else(|| {
                ConfigLoadError::Validation("Cannot determine home directory".to_string())
            })
    }

    /// Read `config.toml` from `home`. A missing file is an empty layer.
    pub fn load_from_file(home: &Path) -> Result<EngineConfigLayer, ConfigLoadError> {
        let config_path = home.join(CONFIG_FILE_NAME);

        let contents = match std::fs::read_to_string(&config_path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("config.toml not found at {:?}, using defaults", config_path);
                return Ok(EngineConfigLayer::default());
            }
            Err(e) => return Err(ConfigLoadError::Io(e)),
        };

        let layer: EngineConfigLayer = toml::from_str(&contents)?;
        for key in layer.extra.keys() {
            tracing::warn!(key = %key, path = ?config_path, "ignoring unknown config key");
        }
        Ok(layer)
    }

    fn env_var(&self, name: &str) -> Option<String> {
        let value = match &self.env_vars {
            Some(vars) => vars.get(name).cloned(),
            None => env::var(name).ok(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    fn env_layer(&self) -> Result<EngineConfigLayer, ConfigLoadError> {
        let prefix = &self.env_prefix;
        let mut layer = EngineConfigLayer::default();

        for (suffix, slot) in [
            ("BASE_URL", &mut layer.base_url),
            ("LOCALE", &mut layer.locale),
            ("SESSION_ID", &mut layer.session_id),
        ] {
            let var = format!("{prefix}_{suffix}");
            if let Some(value) = self.env_var(&var) {
                tracing::debug!("Applying env override: {}", var);
                *slot = Some(value);
            }
        }

        for (suffix, slot) in [
            ("DISPATCH_DELAY_MS", &mut layer.dispatch_delay_ms),
            ("REQUEST_TIMEOUT_MS", &mut layer.request_timeout_ms),
            ("ROW_REFRESH_TIMEOUT_MS", &mut layer.row_refresh_timeout_ms),
            ("QUIET_INTERVAL_MS", &mut layer.quiet_interval_ms),
            ("STATUS_POLL_INTERVAL_MS", &mut layer.status_poll_interval_ms),
        ] {
            let var = format!("{prefix}_{suffix}");
            if let Some(value) = self.env_var(&var) {
                let parsed = value.trim().parse::<u64>().map_err(|_| {
                    ConfigLoadError::InvalidEnvValue {
                        var: var.clone(),
                        value: value.clone(),
                        expected: "a whole number of milliseconds".to_string(),
                    }
                })?;
                tracing::debug!("Applying env override: {}={}", var, parsed);
                *slot = Some(parsed);
            }
        }

        let dashboard_var = format!("{prefix}_DASHBOARD");
        if let Some(value) = self.env_var(&dashboard_var) {
            match value.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => layer.dashboard = Some(true),
                "false" | "0" | "no" | "off" => layer.dashboard = Some(false),
                _ => {
                    return Err(ConfigLoadError::InvalidEnvValue {
                        var: dashboard_var,
                        value,
                        expected: "true/false, 1/0, yes/no, on/off".to_string(),
                    });
                }
            }
        }

        Ok(layer)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject settings the engine cannot run with.
pub fn validate(config: &EngineConfig) -> Result<(), ConfigLoadError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigLoadError::Validation(format!("base_url '{}': {e}", config.base_url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigLoadError::Validation(format!(
            "base_url must be http or https, got '{}'",
            url.scheme()
        )));
    }
    if config.locale.trim().is_empty() {
        return Err(ConfigLoadError::Validation(
            "locale must not be empty".to_string(),
        ));
    }
    for (name, value) in [
        ("request_timeout_ms", config.request_timeout_ms),
        ("row_refresh_timeout_ms", config.row_refresh_timeout_ms),
        ("status_poll_interval_ms", config.status_poll_interval_ms),
    ] {
        if value == 0 {
            return Err(ConfigLoadError::Validation(format!(
                "{name} must be greater than zero"
            )));
        }
    }
    if config.event_capacity == 0 {
        return Err(ConfigLoadError::Validation(
            "event_capacity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
