//! Configuration for peers and for the directory.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// Display name used when none is configured.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// Configuration for one overlay peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// `host:port` of the directory service.
    pub directory_addr: String,

    /// Name attached to every locally authored line.
    pub display_name: String,

    /// Address the child listener binds to. Port 0 picks an ephemeral port.
    #[serde(with = "socket_addr_serde")]
    pub listen_addr: SocketAddr,

    /// Address advertised to the directory. When unset, the local address of
    /// the directory connection is used.
    pub advertise_addr: Option<IpAddr>,

    /// How often the parent link is probed.
    #[serde(with = "duration_ms_serde")]
    pub health_check_interval: Duration,

    /// Attempts at reading the socket status before the check counts as failed.
    pub health_check_retries: u32,

    /// Upper bound on one directory round trip.
    #[serde(with = "duration_ms_serde")]
    pub directory_timeout: Duration,

    /// Upper bound on connecting to one parent candidate.
    #[serde(with = "duration_ms_serde")]
    pub connect_timeout: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            directory_addr: "127.0.0.1:9480".to_string(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            advertise_addr: None,
            health_check_interval: Duration::from_secs(1),
            health_check_retries: 5,
            directory_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

impl OverlayConfig {
    /// Config pointing at the given directory, defaults elsewhere.
    pub fn for_directory(directory_addr: impl Into<String>) -> Self {
        Self {
            directory_addr: directory_addr.into(),
            ..Self::default()
        }
    }

    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), NetworkError> {
        save_json(self, path)
    }

    /// Load config from a JSON file, or return defaults if the file is
    /// missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        load_json_or_default(path, "overlay")
    }
}

/// Configuration for the directory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Address to accept requests on. Port 0 picks an ephemeral port.
    #[serde(with = "socket_addr_serde")]
    pub listen_addr: SocketAddr,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }
}

impl DirectoryConfig {
    pub fn load_or_default(path: &Path) -> Self {
        load_json_or_default(path, "directory")
    }
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<(), NetworkError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn load_json_or_default<T>(path: &Path, what: &str) -> T
where
    T: Default + for<'de> Deserialize<'de>,
{
    if path.exists() {
        match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<T>(&data) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Corrupt {what} config file, using defaults: {e}");
                }
            },
            Err(e) => {
                tracing::warn!("Cannot read {what} config file, using defaults: {e}");
            }
        }
    }
    T::default()
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OverlayConfig::default();
        assert_eq!(config.display_name, "Anonymous");
        assert_eq!(config.listen_addr.port(), 0);
        assert_eq!(config.health_check_retries, 5);
        assert_eq!(config.health_check_interval, Duration::from_secs(1));
        assert!(config.advertise_addr.is_none());
    }

    #[test]
    fn test_config_serialize_roundtrip() {
        let mut config = OverlayConfig::for_directory("10.1.1.1:7000");
        config.advertise_addr = Some("10.1.1.2".parse().unwrap());
        config.directory_timeout = Duration::from_millis(1500);

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: OverlayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.directory_addr, "10.1.1.1:7000");
        assert_eq!(deserialized.advertise_addr, config.advertise_addr);
        assert_eq!(deserialized.directory_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: OverlayConfig =
            serde_json::from_str(r#"{"display_name": "erin"}"#).unwrap();
        assert_eq!(config.display_name, "erin");
        assert_eq!(config.health_check_retries, 5);
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("peer.json");

        let mut original = OverlayConfig::default();
        original.display_name = "frank".to_string();
        original.health_check_retries = 9;
        original.save_to_file(&path).unwrap();

        let loaded = OverlayConfig::load_or_default(&path);
        assert_eq!(loaded.display_name, "frank");
        assert_eq!(loaded.health_check_retries, 9);
    }

    #[test]
    fn test_config_load_missing_or_corrupt_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert_eq!(DirectoryConfig::load_or_default(&missing).listen_addr.port(), 0);

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        let config = OverlayConfig::load_or_default(&corrupt);
        assert_eq!(config.display_name, DEFAULT_DISPLAY_NAME);
    }
}
