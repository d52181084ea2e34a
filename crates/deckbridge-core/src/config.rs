//! TOML configuration for both ends of the bridge.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::protocol::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TICK_INTERVAL_MS, PanelGeometry};

/// Configuration for the device session server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port on the loopback interface.
    pub port: u16,
    /// Interval between button/render passes.
    pub tick_interval_ms: u64,
    /// Shared payload directory. `None` uses the system temp dir.
    pub payload_dir: Option<PathBuf>,
    /// Number of simulated panels to create.
    pub simulated_panels: usize,
    /// Geometry of simulated panels.
    pub geometry: PanelGeometry,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            payload_dir: None,
            simulated_panels: 1,
            geometry: PanelGeometry::default(),
        }
    }
}

impl ServerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load(path.as_ref())?;
        check_geometry(&config.geometry, path.as_ref())?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save(self, path.as_ref())
    }
}

/// Configuration for the client proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Shared payload directory, must match the server's.
    pub payload_dir: Option<PathBuf>,
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
    /// Geometry assumed for announced panels.
    pub geometry: PanelGeometry,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            payload_dir: None,
            connect_attempts: 5,
            geometry: PanelGeometry::default(),
        }
    }
}

impl ClientConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load(path.as_ref())?;
        check_geometry(&config.geometry, path.as_ref())?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save(self, path.as_ref())
    }
}

fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

fn check_geometry(geometry: &PanelGeometry, path: &Path) -> Result<()> {
    geometry
        .validate()
        .with_context(|| format!("Invalid geometry in config {}", path.display()))
}

fn save<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.toml");
        let config = ServerConfig {
            port: 4321,
            simulated_panels: 3,
            payload_dir: Some(tmp.path().join("payloads")),
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = ServerConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.port, 4321);
        assert_eq!(loaded.simulated_panels, 3);
        assert_eq!(loaded.payload_dir, config.payload_dir);
        assert_eq!(loaded.geometry, PanelGeometry::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("client.toml");
        std::fs::write(&path, "port = 9000\n[geometry]\ncolumns = 5\nrows = 3\nbutton_pixels = 72\n").unwrap();

        let config = ClientConfig::load_from_file(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.geometry.columns, 5);
        assert_eq!(config.address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ServerConfig::load_from_file(tmp.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn test_degenerate_geometry_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.toml");
        std::fs::write(&path, "[geometry]\ncolumns = 8\nrows = 4\nbutton_pixels = 0\n").unwrap();
        let err = ServerConfig::load_from_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("buttons have no pixels"));

        let path = tmp.path().join("client.toml");
        std::fs::write(&path, "[geometry]\ncolumns = 300\nrows = 300\nbutton_pixels = 1\n").unwrap();
        let err = ClientConfig::load_from_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("too many buttons"));
    }

    #[test]
    fn test_tick_interval_never_zero() {
        let config = ServerConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }
}
