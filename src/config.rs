/*!
 * I/O Configuration
 *
 * Process-wide knobs for the alertable socket layer, swapped atomically so
 * readers never block on a writer.
 *
 * ## Sources
 *
 * - `IoConfig::default()`
 * - `IoConfig::from_env()`: `ALERTABLE_CONNECT_TIMEOUT`,
 *   `ALERTABLE_TRANSMIT_TIMEOUT`, `ALERTABLE_TRANSMIT_CHUNK`,
 *   `ALERTABLE_SLOW_CALL_MS`, `ALERTABLE_TRACE_JSON`
 * - `IoConfig::from_json(..)`
 */

use crate::core::errors::ConfigError;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Where a wait without its own socket option takes its deadline from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutSource {
    /// Wait until the event, an alert, or a signal
    #[default]
    Infinite,
    /// Borrow the socket's `SO_SNDTIMEO`
    SendTimeout,
}

impl TimeoutSource {
    fn parse(key: &'static str, value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "infinite" | "none" => Ok(Self::Infinite),
            "send_timeout" | "send" => Ok(Self::SendTimeout),
            _ => Err(ConfigError::InvalidValue {
                key,
                value: value.to_string(),
            }),
        }
    }
}

/// Default bytes handed to one `sendfile` call
pub const DEFAULT_TRANSMIT_CHUNK: usize = 64 * 1024;

/// Default threshold above which a blocking call is reported as slow
pub const DEFAULT_SLOW_CALL_MS: u64 = 1000;

/// Alertable socket layer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IoConfig {
    /// Deadline of a connect wait (default: infinite)
    pub connect_timeout: TimeoutSource,

    /// Deadline of a blocking file transmit (default: infinite)
    pub transmit_timeout: TimeoutSource,

    /// Bytes per send when the caller does not choose (default: 64 KiB)
    pub transmit_chunk_size: usize,

    /// Blocking calls longer than this are logged as slow (default: 1s)
    pub slow_call_ms: u64,

    /// JSON log output from `init_tracing`
    pub trace_json: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            connect_timeout: TimeoutSource::Infinite,
            transmit_timeout: TimeoutSource::Infinite,
            transmit_chunk_size: DEFAULT_TRANSMIT_CHUNK,
            slow_call_ms: DEFAULT_SLOW_CALL_MS,
            trace_json: false,
        }
    }
}

static GLOBAL: OnceLock<ArcSwap<IoConfig>> = OnceLock::new();

fn global_cell() -> &'static ArcSwap<IoConfig> {
    GLOBAL.get_or_init(|| ArcSwap::from_pointee(IoConfig::default()))
}

fn env_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes" | "on")
}

impl IoConfig {
    /// Snapshot of the process-wide configuration
    pub fn global() -> Arc<IoConfig> {
        global_cell().load_full()
    }

    /// Replace the process-wide configuration
    pub fn install(self) -> Result<(), ConfigError> {
        self.validate()?;
        global_cell().store(Arc::new(self));
        Ok(())
    }

    /// Put the process-wide configuration back to defaults
    pub fn reset_global() {
        global_cell().store(Arc::new(IoConfig::default()));
    }

    /// Defaults overridden by `ALERTABLE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` over an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("ALERTABLE_CONNECT_TIMEOUT") {
            config.connect_timeout = TimeoutSource::parse("ALERTABLE_CONNECT_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("ALERTABLE_TRANSMIT_TIMEOUT") {
            config.transmit_timeout = TimeoutSource::parse("ALERTABLE_TRANSMIT_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("ALERTABLE_TRANSMIT_CHUNK") {
            config.transmit_chunk_size =
                v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "ALERTABLE_TRANSMIT_CHUNK",
                    value: v.clone(),
                })?;
        }
        if let Some(v) = lookup("ALERTABLE_SLOW_CALL_MS") {
            config.slow_call_ms = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "ALERTABLE_SLOW_CALL_MS",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("ALERTABLE_TRACE_JSON") {
            config.trace_json = env_flag(&v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.transmit_chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "transmit_chunk_size",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Slow-call threshold as a duration
    #[inline]
    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_ms)
    }
}
