//! Persisted remoting settings (`remoting-config.cfg`).
//!
//! The file is JSON, human-editable, and populates a [`Config`]:
//!
//! ```json
//! {
//!   "ice-servers": [{ "url": "stun:stun.l.google.com:19302", "username": "", "credential": "" }],
//!   "diagnostic-options": ["stats-collector"],
//!   "signaling": { "ip": "0.0.0.0", "port": 9999 },
//!   "encoder-bandwidth-kbps": -1,
//!   "port-range": { "min-port": 50100, "max-port": 50100 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::{BITRATE_SET_BY_CLIENT, IceServerConfig, PortRange, SignalingConfig};
use crate::{Config, DiagnosticOptions, IsarError, Result};

/// Conventional file name.
pub const SETTINGS_FILE_NAME: &str = "remoting-config.cfg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerEntry {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingEntry {
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u32,
}

impl Default for SignalingEntry {
    fn default() -> Self {
        Self { ip: default_ip(), port: default_port() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PortRangeEntry {
    pub min_port: u32,
    pub max_port: u32,
}

impl Default for PortRangeEntry {
    fn default() -> Self {
        Self { min_port: 50100, max_port: 50100 }
    }
}

/// Contents of `remoting-config.cfg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemotingSettings {
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerEntry>,
    #[serde(default)]
    pub diagnostic_options: Vec<String>,
    #[serde(default)]
    pub signaling: SignalingEntry,
    #[serde(default = "default_bandwidth")]
    pub encoder_bandwidth_kbps: i32,
    #[serde(default)]
    pub port_range: PortRangeEntry,
}

fn default_ip() -> String {
    Ipv4Addr::UNSPECIFIED.to_string()
}

fn default_port() -> u32 {
    9999
}

fn default_bandwidth() -> i32 {
    BITRATE_SET_BY_CLIENT
}

fn default_ice_servers() -> Vec<IceServerEntry> {
    vec![IceServerEntry {
        url: "stun:stun.l.google.com:19302".to_string(),
        username: String::new(),
        credential: String::new(),
    }]
}

impl Default for RemotingSettings {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            diagnostic_options: Vec::new(),
            signaling: SignalingEntry::default(),
            encoder_bandwidth_kbps: default_bandwidth(),
            port_range: PortRangeEntry::default(),
        }
    }
}

impl RemotingSettings {
    /// Reads and normalizes a settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| IsarError::file_open(path, e))?;
        let mut settings = Self::from_json(&text).map_err(|err| match err {
            IsarError::ConfigParse { source, .. } => {
                IsarError::ConfigParse { context: path.display().to_string(), source }
            }
            other => other,
        })?;
        settings.normalize();
        debug!(path = %path.display(), port = settings.signaling.port, "Loaded remoting settings");
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Normalizes and writes the settings as pretty JSON.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.normalize();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| IsarError::file_open(path, e))?;
        debug!(path = %path.display(), "Saved remoting settings");
        Ok(())
    }

    /// Repairs values the settings editor never writes.
    pub fn normalize(&mut self) {
        if self.encoder_bandwidth_kbps == 0 {
            warn!("Encoder bandwidth cannot be 0, defaulting to {}", BITRATE_SET_BY_CLIENT);
            self.encoder_bandwidth_kbps = BITRATE_SET_BY_CLIENT;
        }
        if self.port_range.min_port > self.port_range.max_port {
            warn!(
                min = self.port_range.min_port,
                max = self.port_range.max_port,
                "Minimum port above maximum port, using the maximum for both"
            );
            self.port_range.min_port = self.port_range.max_port;
        }
    }

    pub fn diagnostics(&self) -> DiagnosticOptions {
        self.diagnostic_options.iter().fold(DiagnosticOptions::DISABLED, |acc, name| match name.as_str() {
            "tracing" => acc | DiagnosticOptions::TRACING,
            "event-log" => acc | DiagnosticOptions::EVENT_LOG,
            "stats-collector" => acc | DiagnosticOptions::STATS_COLLECTOR,
            other => {
                warn!(option = other, "Ignoring unknown diagnostic option");
                acc
            }
        })
    }

    /// Overlays these settings on `config`.
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        let ip: Ipv4Addr = self.signaling.ip.parse().map_err(|_| {
            IsarError::config(crate::ConfigIssue::SignalingIp, format!("'{}' is not an IPv4 address", self.signaling.ip))
        })?;
        config.ice_servers = self
            .ice_servers
            .iter()
            .map(|entry| IceServerConfig {
                url: entry.url.clone(),
                username: entry.username.clone(),
                password: entry.credential.clone(),
            })
            .collect();
        config.diagnostic_options = self.diagnostics();
        config.signaling_config = SignalingConfig { suggested_ipv4: ip, port: self.signaling.port };
        config.render_config.encoder_bitrate_kbps = self.encoder_bandwidth_kbps;
        config.port_range = PortRange { min_port: self.port_range.min_port, max_port: self.port_range.max_port };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "ice-servers": [{ "url": "turn:relay.example:3478", "username": "u", "credential": "p" }],
        "diagnostic-options": ["stats-collector", "event-log"],
        "signaling": { "ip": "192.168.1.20", "port": 9000 },
        "encoder-bandwidth-kbps": 25000,
        "port-range": { "min-port": 50100, "max-port": 50110 }
    }"#;

    #[test]
    fn sample_file_populates_config() {
        let settings = RemotingSettings::from_json(SAMPLE).unwrap();
        let mut config = Config::default();
        settings.apply_to(&mut config).unwrap();

        assert_eq!(config.signaling_config.port, 9000);
        assert_eq!(config.signaling_config.suggested_ipv4, Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(config.ice_servers[0].password, "p");
        assert_eq!(config.render_config.encoder_bitrate_kbps, 25000);
        assert_eq!(config.port_range, PortRange { min_port: 50100, max_port: 50110 });
        assert!(config.diagnostic_options.contains(DiagnosticOptions::STATS_COLLECTOR));
        assert!(config.diagnostic_options.contains(DiagnosticOptions::EVENT_LOG));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings = RemotingSettings::from_json("{}").unwrap();
        assert_eq!(settings, RemotingSettings::default());
        assert_eq!(settings.signaling.port, 9999);
        assert_eq!(settings.port_range, PortRangeEntry { min_port: 50100, max_port: 50100 });
    }

    #[test]
    fn load_normalizes_editor_mistakes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "encoder-bandwidth-kbps": 0, "port-range": {{ "min-port": 50200, "max-port": 50100 }} }}"#)
            .unwrap();
        let settings = RemotingSettings::load(file.path()).unwrap();
        assert_eq!(settings.encoder_bandwidth_kbps, -1);
        assert_eq!(settings.port_range.min_port, 50100);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        let mut settings = RemotingSettings::from_json(SAMPLE).unwrap();
        settings.save(&path).unwrap();
        assert_eq!(RemotingSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn file_errors_map_to_their_codes() {
        let dir = tempfile::tempdir().unwrap();
        let missing = RemotingSettings::load(dir.path().join("absent.cfg")).unwrap_err();
        assert_eq!(missing.code(), crate::ErrorCode::FileOpen);

        let broken = dir.path().join("broken.cfg");
        std::fs::write(&broken, "{ not json").unwrap();
        let parse = RemotingSettings::load(&broken).unwrap_err();
        assert_eq!(parse.code(), crate::ErrorCode::ConfigParse);
    }

    #[test]
    fn bad_ip_is_a_signaling_error() {
        let settings =
            RemotingSettings { signaling: SignalingEntry { ip: "localhost".into(), port: 1 }, ..Default::default() };
        let err = settings.apply_to(&mut Config::default()).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::ConfigSignalingIpInvalidOrMissing);
    }
}
