use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

/// Process configuration, read once at startup and handed to each component by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Tables are queried unqualified; select their schema with the connection search path,
    /// e.g. `?options=-c%20search_path%3Dstock`.
    pub database_url: String,
    pub sync: SyncConfig,
    pub hyper_sage: HyperSageConfig,
    /// Present only when the cost lookup is enabled.
    pub sage: Option<SageConfig>,
    pub alert: AlertConfig,
    pub metrics_addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Sleep between two processing cycles.
    pub interval: Duration,
    pub cost_lookup_enabled: bool,
    /// Consecutive failed cycles tolerated before alerting.
    pub max_consecutive_failures: u32,
    pub pause_policy: PausePolicy,
}

/// Optional per-adjustment circuit breaker layered on top of alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PausePolicy {
    /// Pause the offending adjustment when an alert fires, and run the resume sweep each cycle.
    pub pause_on_alert: bool,
    /// How long a paused adjustment waits before it becomes eligible again.
    pub cool_down: Duration,
}

impl Default for PausePolicy {
    fn default() -> Self {
        Self {
            pause_on_alert: false,
            cool_down: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperSageConfig {
    pub uri: String,
    pub adjustments_path: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Fixed `reference` label sent with every adjustment.
    pub reference_label: String,
    pub accept_invalid_certs: bool,
}

impl HyperSageConfig {
    pub fn adjustments_endpoint(&self) -> String {
        format!("{}{}", self.uri, self.adjustments_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SageConfig {
    pub stock_uri: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertConfig {
    pub sender: String,
    pub receiver: String,
    pub subject: String,
    pub postmark_token: String,
    pub postmark_uri: String,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup (environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let cost_lookup_enabled = vars.parsed_bool("COST_LOOKUP_ENABLED", false)?;
        let accept_invalid_certs = vars.parsed_bool("ACCEPT_INVALID_CERTS", false)?;

        let sync = SyncConfig {
            interval: Duration::from_secs(vars.parsed("SYNC_INTERVAL_SECS", 10u64)?),
            cost_lookup_enabled,
            max_consecutive_failures: vars.parsed("MAX_CONSECUTIVE_FAILURES", 5u32)?,
            pause_policy: PausePolicy {
                pause_on_alert: vars.parsed_bool("PAUSE_ON_ALERT", false)?,
                cool_down: Duration::from_secs(vars.parsed("ADJUSTMENT_PAUSE_SECS", 3600u64)?),
            },
        };

        let hyper_sage = HyperSageConfig {
            uri: vars.required("HYPERSAGE_URI")?,
            adjustments_path: vars
                .optional("HYPERSAGE_ADJUSTMENTS_PATH")
                .unwrap_or_else(|| "/api/stock/adjustment".to_string()),
            api_key: vars.required("HYPERSAGE_API_KEY")?,
            timeout: Duration::from_secs(vars.parsed("HYPERSAGE_TIMEOUT_SECS", 30u64)?),
            reference_label: vars
                .optional("HYPERSAGE_REFERENCE_LABEL")
                .unwrap_or_else(|| "Winegum Stock Adjustment".to_string()),
            accept_invalid_certs,
        };

        let sage = if cost_lookup_enabled {
            Some(SageConfig {
                stock_uri: vars.required("SAGE_STOCK_URI")?,
                user: vars.required("SAGE_USER")?,
                password: vars.required("SAGE_PASSWORD")?,
                timeout: Duration::from_secs(vars.parsed("SAGE_TIMEOUT_SECS", 30u64)?),
                accept_invalid_certs,
            })
        } else {
            None
        };

        let alert = AlertConfig {
            sender: vars.required("ALERT_SENDER")?,
            receiver: vars.required("ALERT_RECEIVER")?,
            subject: vars
                .optional("ALERT_SUBJECT")
                .unwrap_or_else(|| "Sage adjustment errors".to_string()),
            postmark_token: vars.required("POSTMARK_TOKEN")?,
            postmark_uri: vars
                .optional("POSTMARK_URI")
                .unwrap_or_else(|| "https://api.postmarkapp.com".to_string()),
            timeout: Duration::from_secs(vars.parsed("ALERT_TIMEOUT_SECS", 30u64)?),
        };

        Ok(Self {
            database_url: vars.required("DATABASE_URL")?,
            sync,
            hyper_sage,
            sage,
            alert,
            metrics_addr: vars.parsed(
                "METRICS_ADDR",
                SocketAddr::from(([0, 0, 0, 0], 3000)),
            )?,
        })
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn parsed<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(var) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { var, value }),
            None => Ok(default),
        }
    }

    fn parsed_bool(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(var) {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid { var, value }),
            },
            None => Ok(default),
        }
    }
}
