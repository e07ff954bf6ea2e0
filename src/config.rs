//! Connection and manager configuration.
//!
//! Both structs have working defaults, deserialize from JSON with every
//! field optional, and can be overlaid from `OSTRICH_*` environment
//! variables. Durations are expressed in milliseconds outside the crate.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::relay::backoff::sanitize_jitter;
use crate::relay::{RelayError, RelayResult};

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Time allowed for the TCP, TLS and WebSocket handshake.
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    /// First reconnect delay.
    #[serde(rename = "reconnect_delay_ms", with = "millis")]
    pub reconnect_delay: Duration,
    /// Upper bound on the reconnect delay.
    #[serde(rename = "max_reconnect_delay_ms", with = "millis")]
    pub max_reconnect_delay: Duration,
    /// Fraction of each delay that is randomized, in `[0, 1]`.
    pub jitter: f64,
    /// Reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Capacity of the inbound message broadcast. Slow consumers that fall
    /// further behind than this lose the oldest messages.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            jitter: 0.25,
            max_reconnect_attempts: 0,
            channel_capacity: 1024,
        }
    }
}

/// Relay manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Settings applied to every connection.
    pub relay: RelayConfig,
    /// How long a subscription waits for every relay's EOSE before a
    /// synthesized one is emitted.
    #[serde(rename = "eose_timeout_ms", with = "millis")]
    pub eose_timeout: Duration,
    /// How long a publish waits for each relay's OK.
    #[serde(rename = "publish_timeout_ms", with = "millis")]
    pub publish_timeout: Duration,
    /// Verify ids and signatures of inbound events before delivery.
    pub verify_signatures: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            eose_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
            verify_signatures: true,
        }
    }
}

impl ManagerConfig {
    /// Loads defaults overlaid with environment variables.
    ///
    /// Optional:
    /// - `OSTRICH_CONNECT_TIMEOUT_MS`
    /// - `OSTRICH_RECONNECT_DELAY_MS`
    /// - `OSTRICH_MAX_RECONNECT_DELAY_MS`
    /// - `OSTRICH_RECONNECT_JITTER` (fraction, e.g. `0.25`)
    /// - `OSTRICH_MAX_RECONNECT_ATTEMPTS` (0 = unlimited)
    /// - `OSTRICH_CHANNEL_CAPACITY`
    /// - `OSTRICH_EOSE_TIMEOUT_MS`
    /// - `OSTRICH_PUBLISH_TIMEOUT_MS`
    /// - `OSTRICH_VERIFY_SIGNATURES` (`true`/`false`)
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ManagerConfig::from_env`] with a custom variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let set_millis = |key: &str, target: &mut Duration| {
            if let Some(ms) = parse_var::<u64>(&lookup, key) {
                *target = Duration::from_millis(ms);
            }
        };
        set_millis("OSTRICH_CONNECT_TIMEOUT_MS", &mut config.relay.connect_timeout);
        set_millis("OSTRICH_RECONNECT_DELAY_MS", &mut config.relay.reconnect_delay);
        set_millis(
            "OSTRICH_MAX_RECONNECT_DELAY_MS",
            &mut config.relay.max_reconnect_delay,
        );
        set_millis("OSTRICH_EOSE_TIMEOUT_MS", &mut config.eose_timeout);
        set_millis("OSTRICH_PUBLISH_TIMEOUT_MS", &mut config.publish_timeout);

        if let Some(jitter) = parse_var::<f64>(&lookup, "OSTRICH_RECONNECT_JITTER") {
            config.relay.jitter = sanitize_jitter(jitter);
        }
        if let Some(attempts) = parse_var(&lookup, "OSTRICH_MAX_RECONNECT_ATTEMPTS") {
            config.relay.max_reconnect_attempts = attempts;
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, "OSTRICH_CHANNEL_CAPACITY") {
            config.relay.channel_capacity = capacity.max(1);
        }
        if let Some(verify) = parse_var(&lookup, "OSTRICH_VERIFY_SIGNATURES") {
            config.verify_signatures = verify;
        }

        tracing::info!(
            connect_timeout_ms = config.relay.connect_timeout.as_millis(),
            max_reconnect_delay_ms = config.relay.max_reconnect_delay.as_millis(),
            eose_timeout_ms = config.eose_timeout.as_millis(),
            publish_timeout_ms = config.publish_timeout.as_millis(),
            verify_signatures = config.verify_signatures,
            "relay manager configuration loaded"
        );
        config
    }

    /// Loads a JSON configuration file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| RelayError::Config(format!("{}: {e}", path.display())))
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "ignoring unparseable configuration value");
    }
    parsed
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
