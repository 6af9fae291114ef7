//! Connection, device and codec enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use crate::{IsarError, Result};

abi_enum! {
    /// Connection lifecycle state.
    pub enum ConnectionState: u32 {
        Disconnected = 0,
        Connecting = 1,
        Connected = 2,
        Closing = 3,
        Failed = 4,
    }
}

impl ConnectionState {
    /// CONNECTING or CONNECTED.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Failed => "FAILED",
        };
        f.write_str(text)
    }
}

abi_enum! {
    /// Video codec. `Auto` lets negotiation pick.
    pub enum CodecType: u32 {
        Auto = 0,
        H264 = 1,
        H265 = 2,
        Vp8 = 3,
        Vp9 = 4,
        Av1 = 5,
        H265_10Bit = 6,
        Av1_10Bit = 7,
    }
}

impl CodecType {
    pub fn as_str(self) -> &'static str {
        match self {
            CodecType::Auto => "AUTO",
            CodecType::H264 => "H264",
            CodecType::H265 => "H265",
            CodecType::Vp8 => "VP8",
            CodecType::Vp9 => "VP9",
            CodecType::Av1 => "AV1",
            CodecType::H265_10Bit => "H265_10BIT",
            CodecType::Av1_10Bit => "AV1_10BIT",
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecType {
    type Err = IsarError;

    fn from_str(s: &str) -> Result<Self> {
        CodecType::ALL
            .iter()
            .copied()
            .find(|codec| codec.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| IsarError::invalid_argument("codec", format!("unknown codec '{s}'")))
    }
}

abi_enum! {
    /// Data channel scheduling priority.
    pub enum ChannelPriority: u32 {
        Low = 0,
        Med = 1,
        High = 2,
    }
}

impl ChannelPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelPriority::Low => "LOW",
            ChannelPriority::Med => "MED",
            ChannelPriority::High => "HIGH",
        }
    }
}

impl FromStr for ChannelPriority {
    type Err = IsarError;

    fn from_str(s: &str) -> Result<Self> {
        ChannelPriority::ALL
            .iter()
            .copied()
            .find(|priority| priority.as_str() == s)
            .ok_or_else(|| IsarError::invalid_argument("priority", format!("unknown priority '{s}'")))
    }
}

abi_enum! {
    /// Kind of device on either end of the stream.
    pub enum DeviceType: i32 {
        Undefined = -1,
        Ar = 0,
        Vr = 1,
        Mr = 2,
        Pc = 3,
    }
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Undefined => "UNDEFINED",
            DeviceType::Ar => "AR",
            DeviceType::Vr => "VR",
            DeviceType::Mr => "MR",
            DeviceType::Pc => "PC",
        }
    }

    /// Devices that can blend the camera feed behind rendered content.
    pub fn supports_passthrough(self) -> bool {
        matches!(self, DeviceType::Vr | DeviceType::Mr)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = IsarError;

    fn from_str(s: &str) -> Result<Self> {
        DeviceType::ALL
            .iter()
            .copied()
            .find(|device| device.as_str() == s)
            .ok_or_else(|| IsarError::invalid_argument("device", format!("unknown device '{s}'")))
    }
}

/// Diagnostics bitmask.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DiagnosticOptions(u32);

impl DiagnosticOptions {
    pub const DISABLED: DiagnosticOptions = DiagnosticOptions(0);
    pub const TRACING: DiagnosticOptions = DiagnosticOptions(1);
    pub const EVENT_LOG: DiagnosticOptions = DiagnosticOptions(2);
    pub const STATS_COLLECTOR: DiagnosticOptions = DiagnosticOptions(4);

    const KNOWN: u32 = 0b111;

    /// Builds options from raw bits, dropping unknown flags.
    pub fn from_bits_truncate(bits: u32) -> Self {
        DiagnosticOptions(bits & Self::KNOWN)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: DiagnosticOptions) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for DiagnosticOptions {
    type Output = DiagnosticOptions;

    fn bitor(self, rhs: Self) -> Self {
        DiagnosticOptions(self.0 | rhs.0)
    }
}

/// Which side of the stream a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Renders and pushes frames; offers the session.
    Server,
    /// Displays frames and pushes poses and input; answers.
    Client,
}

/// Media tracks a transport carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
    Camera,
    Microphone,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
            TrackKind::Camera => "camera",
            TrackKind::Microphone => "microphone",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_names_parse_back() {
        for codec in CodecType::ALL {
            assert_eq!(codec.as_str().parse::<CodecType>().unwrap(), *codec);
        }
        assert_eq!("h265_10bit".parse::<CodecType>().unwrap(), CodecType::H265_10Bit);
        assert!("mpeg2".parse::<CodecType>().is_err());
    }

    #[test]
    fn diagnostic_flags_combine() {
        let options = DiagnosticOptions::TRACING | DiagnosticOptions::STATS_COLLECTOR;
        assert!(options.contains(DiagnosticOptions::TRACING));
        assert!(!options.contains(DiagnosticOptions::EVENT_LOG));
        assert!(!options.contains(DiagnosticOptions::DISABLED));
        assert_eq!(DiagnosticOptions::from_bits_truncate(0xFF).bits(), 7);
    }

    #[test]
    fn passthrough_needs_an_immersive_device() {
        assert!(DeviceType::Vr.supports_passthrough());
        assert!(DeviceType::Mr.supports_passthrough());
        assert!(!DeviceType::Pc.supports_passthrough());
        assert!(!DeviceType::Ar.supports_passthrough());
    }
}
