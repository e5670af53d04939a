//! Types used to define the fields of [`crate::config_loader::ConfigLoader`]
//! output.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/cldr-apps/api/";
pub const DEFAULT_LOCALE: &str = "en";

/// Runtime settings for one vetting engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root of the vetting API. Endpoints are joined onto it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Locale whose rows are being vetted.
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Session identifier sent with every request, if the server requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Delay before each request serializer dispatch cycle.
    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,

    /// Limit for queued requests that do not carry their own timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Limit for single-row refreshes and status polls.
    #[serde(default = "default_row_refresh_timeout_ms")]
    pub row_refresh_timeout_ms: u64,

    /// How long after the last vote started or finished the engine still
    /// reports itself busy.
    #[serde(default = "default_quiet_interval_ms")]
    pub quiet_interval_ms: u64,

    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,

    /// Ask single-row refreshes to include dashboard data.
    #[serde(default)]
    pub dashboard: bool,

    /// Capacity of the engine event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

fn default_dispatch_delay_ms() -> u64 {
    3
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_row_refresh_timeout_ms() -> u64 {
    60_000
}

fn default_quiet_interval_ms() -> u64 {
    3_000
}

fn default_status_poll_interval_ms() -> u64 {
    15_000
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            locale: default_locale(),
            session_id: None,
            dispatch_delay_ms: default_dispatch_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            row_refresh_timeout_ms: default_row_refresh_timeout_ms(),
            quiet_interval_ms: default_quiet_interval_ms(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
            dashboard: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn row_refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.row_refresh_timeout_ms)
    }

    pub fn quiet_interval(&self) -> Duration {
        Duration::from_millis(self.quiet_interval_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}

/// One configuration layer. Unset fields leave the layer below untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfigLayer {
    pub base_url: Option<String>,
    pub locale: Option<String>,
    pub session_id: Option<String>,
    pub dispatch_delay_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub row_refresh_timeout_ms: Option<u64>,
    pub quiet_interval_ms: Option<u64>,
    pub status_poll_interval_ms: Option<u64>,
    pub dashboard: Option<bool>,
    pub event_capacity: Option<usize>,

    /// Keys this version does not understand, kept so they can be reported.
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl EngineConfigLayer {
    pub fn apply_to(self, config: &mut EngineConfig) {
        if let Some(v) = self.base_url {
            config.base_url = v;
        }
        if let Some(v) = self.locale {
            config.locale = v;
        }
        if self.session_id.is_some() {
            config.session_id = self.session_id;
        }
        if let Some(v) = self.dispatch_delay_ms {
            config.dispatch_delay_ms = v;
        }
        if let Some(v) = self.request_timeout_ms {
            config.request_timeout_ms = v;
        }
        if let Some(v) = self.row_refresh_timeout_ms {
            config.row_refresh_timeout_ms = v;
        }
        if let Some(v) = self.quiet_interval_ms {
            config.quiet_interval_ms = v;
        }
        if let Some(v) = self.status_poll_interval_ms {
            config.status_poll_interval_ms = v;
        }
        if let Some(v) = self.dashboard {
            config.dashboard = v;
        }
        if let Some(v) = self.event_capacity {
            config.event_capacity = v;
        }
    }
}
