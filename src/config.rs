//! Connection configuration and its validation.
//!
//! [`Config`] mirrors `IsarConfig`. Validation runs in `create_connection`
//! and rejects out-of-range values instead of clamping them.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

use crate::{CodecType, ConfigIssue, DeviceType, DiagnosticOptions, IsarError, Result};

/// Highest accepted encoder bitrate in kbps.
pub const MAX_BITRATE_KBPS: i32 = 100_000;

/// Bitrate value that leaves the choice to the client.
pub const BITRATE_SET_BY_CLIENT: i32 = -1;

/// A STUN or TURN server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl IceServerConfig {
    fn validate(&self) -> Result<()> {
        let scheme = self.url.split(':').next().unwrap_or_default();
        match scheme {
            "stun" => Ok(()),
            "turn" | "turns" if self.username.is_empty() => {
                Err(IsarError::invalid_argument("ice_servers", format!("{} needs a username", self.url)))
            }
            "turn" | "turns" => Ok(()),
            _ => Err(IsarError::invalid_argument("ice_servers", format!("unsupported url '{}'", self.url))),
        }
    }
}

/// Stream render parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub num_views: u32,
    /// [`BITRATE_SET_BY_CLIENT`] or 1..=[`MAX_BITRATE_KBPS`].
    pub encoder_bitrate_kbps: i32,
    pub framerate: u32,
    pub depth_enabled: bool,
    pub pose_prediction_enabled: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 2064,
            height: 2208,
            num_views: 2,
            encoder_bitrate_kbps: BITRATE_SET_BY_CLIENT,
            framerate: 90,
            depth_enabled: false,
            pose_prediction_enabled: true,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(IsarError::invalid_argument("render_config", format!("{}x{}", self.width, self.height)));
        }
        if !(1..=2).contains(&self.num_views) {
            return Err(IsarError::invalid_argument("num_views", self.num_views.to_string()));
        }
        if self.framerate == 0 {
            return Err(IsarError::invalid_argument("framerate", "zero framerate"));
        }
        validate_bitrate(self.encoder_bitrate_kbps)
    }
}

pub(crate) fn validate_bitrate(kbps: i32) -> Result<()> {
    if kbps == BITRATE_SET_BY_CLIENT || (1..=MAX_BITRATE_KBPS).contains(&kbps) {
        Ok(())
    } else {
        Err(IsarError::invalid_argument("encoder_bitrate_kbps", format!("{kbps} kbps")))
    }
}

/// Where the signaling provider should listen or connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingConfig {
    pub suggested_ipv4: Ipv4Addr,
    pub port: u32,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self { suggested_ipv4: Ipv4Addr::UNSPECIFIED, port: 9999 }
    }
}

impl SignalingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65535).contains(&self.port) {
            return Err(IsarError::config(ConfigIssue::SignalingPort, format!("port {}", self.port)));
        }
        Ok(())
    }
}

/// Local media port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub min_port: u32,
    pub max_port: u32,
}

impl PortRange {
    /// Bounds every port range must lie within.
    pub const ALLOWED: RangeInclusive<u32> = 1024..=65535;

    pub fn validate(&self) -> Result<()> {
        for (name, port) in [("min_port", self.min_port), ("max_port", self.max_port)] {
            if !Self::ALLOWED.contains(&port) {
                return Err(IsarError::invalid_argument("port_range", format!("{name} {port} outside 1024..=65535")));
            }
        }
        if self.min_port > self.max_port {
            return Err(IsarError::invalid_argument(
                "port_range",
                format!("min_port {} above max_port {}", self.min_port, self.max_port),
            ));
        }
        Ok(())
    }

    pub fn ports(&self) -> RangeInclusive<u32> {
        self.min_port..=self.max_port
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self { min_port: *Self::ALLOWED.start(), max_port: *Self::ALLOWED.end() }
    }
}

/// Connection configuration (`IsarConfig`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub friendly_name: String,
    /// Negotiated with the remote; never forced.
    pub codec_preference: CodecType,
    pub diagnostic_options: DiagnosticOptions,
    pub ice_servers: Vec<IceServerConfig>,
    pub render_config: RenderConfig,
    pub signaling_config: SignalingConfig,
    pub device_type: DeviceType,
    pub port_range: PortRange,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            friendly_name: "isar".to_string(),
            codec_preference: CodecType::Auto,
            diagnostic_options: DiagnosticOptions::DISABLED,
            ice_servers: Vec::new(),
            render_config: RenderConfig::default(),
            signaling_config: SignalingConfig::default(),
            device_type: DeviceType::Pc,
            port_range: PortRange::default(),
        }
    }
}

impl Config {
    /// Checks every section; the first problem wins.
    pub fn validate(&self) -> Result<()> {
        self.port_range.validate()?;
        self.signaling_config.validate()?;
        self.render_config.validate()?;
        for server in &self.ice_servers {
            server.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_ports(min_port: u32, max_port: u32) -> Config {
        Config { port_range: PortRange { min_port, max_port }, ..Config::default() }
    }

    #[test]
    fn port_range_boundaries() {
        assert!(with_ports(1024, 65535).validate().is_ok());
        assert!(with_ports(1024, 1024).validate().is_ok());
        assert!(with_ports(65535, 65535).validate().is_ok());

        for (min, max) in [(1023, 2000), (2000, 65536), (1023, 65536), (0, 0)] {
            let err = with_ports(min, max).validate().unwrap_err();
            assert!(matches!(err, IsarError::InvalidArgument { argument: "port_range", .. }), "{min}..{max}");
        }
    }

    #[test]
    fn inverted_port_range_is_rejected_not_clamped() {
        let config = with_ports(50101, 50100);
        assert!(config.validate().is_err());
        assert_eq!(config.port_range.min_port, 50101);
    }

    #[test]
    fn signaling_port_zero_is_a_config_error() {
        let config = Config { signaling_config: SignalingConfig { port: 0, ..Default::default() }, ..Default::default() };
        assert_eq!(config.validate().unwrap_err().code(), crate::ErrorCode::ConfigSignalingPortInvalidOrMissing);
    }

    #[test]
    fn bitrate_accepts_client_choice_and_range() {
        assert!(validate_bitrate(-1).is_ok());
        assert!(validate_bitrate(1).is_ok());
        assert!(validate_bitrate(MAX_BITRATE_KBPS).is_ok());
        assert!(validate_bitrate(0).is_err());
        assert!(validate_bitrate(MAX_BITRATE_KBPS + 1).is_err());
    }

    #[test]
    fn turn_requires_username() {
        let mut config = Config::default();
        config.ice_servers.push(IceServerConfig { url: "turn:relay.example:3478".into(), ..Default::default() });
        assert!(config.validate().is_err());
        config.ice_servers[0].username = "user".into();
        assert!(config.validate().is_ok());
        config.ice_servers.push(IceServerConfig { url: "http://nope".into(), ..Default::default() });
        assert!(config.validate().is_err());
    }
}
