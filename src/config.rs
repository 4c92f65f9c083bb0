//! Ambient client configuration: a plain `serde`-derived struct with
//! literal defaults, optionally overridden from a TOML file on disk.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CmError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long to wait for the TCP handshake before giving up on an
    /// endpoint.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How long without any inbound frame before the connection is treated
    /// as dead.
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,

    /// Initial reconnect backoff; doubles on each consecutive failure.
    #[serde(with = "duration_secs")]
    pub initial_backoff: Duration,

    /// Ceiling for the exponential backoff sequence.
    #[serde(with = "duration_secs")]
    pub max_backoff: Duration,

    /// Whether to keep retrying after the very first connect attempt fails.
    pub auto_retry: bool,

    /// When unset (the default), jobs pending at disconnect are silently
    /// dropped. When set, each pending job's callback is invoked with a
    /// synthetic `CmError::Disconnected` so callers never wait forever.
    pub reject_pending_on_disconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(1),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(120),
            auto_retry: true,
            reject_pending_on_disconnect: false,
        }
    }
}

impl ClientConfig {
    /// Loads overrides from a TOML file, starting from [`ClientConfig::default`]
    /// for any field the file omits.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CmError::Protocol(format!("reading config file: {e}")))?;
        toml::from_str(&text).map_err(|e| CmError::Protocol(format!("parsing config file: {e}")))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_one_second_timeouts_with_auto_retry() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.idle_timeout, Duration::from_secs(1));
        assert_eq!(config.initial_backoff, Duration::from_secs(1));
        assert!(config.auto_retry);
        assert!(!config.reject_pending_on_disconnect);
    }

    #[test]
    fn toml_overrides_merge_onto_defaults() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!(
            "cm-client-test-config-{:?}.toml",
            std::thread::current().id()
        ));
        std::fs::write(&path, "auto_retry = false\nreject_pending_on_disconnect = true\n")
            .unwrap();

        let config = ClientConfig::from_toml_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(!config.auto_retry);
        assert!(config.reject_pending_on_disconnect);
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
    }
}
