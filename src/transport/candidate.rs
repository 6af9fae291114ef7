//! ICE candidates as relayed by the signaling provider.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{IsarError, Result};

/// A candidate line plus the media section it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: i32,
    pub candidate: String,
}

impl IceCandidate {
    pub fn new(sdp_mid: impl Into<String>, sdp_mline_index: i32, candidate: impl Into<String>) -> Self {
        Self { sdp_mid: sdp_mid.into(), sdp_mline_index, candidate: candidate.into() }
    }

    pub fn parse(&self) -> Result<CandidateLine> {
        self.candidate.parse()
    }
}

/// The fields of an `a=candidate` attribute this core uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLine {
    pub foundation: String,
    pub component: u32,
    pub transport: String,
    pub priority: u32,
    pub address: String,
    pub port: u32,
    pub kind: String,
}

impl FromStr for CandidateLine {
    type Err = IsarError;

    fn from_str(s: &str) -> Result<Self> {
        let line = s.trim().strip_prefix("a=").unwrap_or(s.trim());
        let body = line
            .strip_prefix("candidate:")
            .ok_or_else(|| IsarError::sdp_parse(format!("not a candidate: '{s}'")))?;
        let fields: Vec<&str> = body.split_whitespace().collect();
        if fields.len() < 8 || fields[6] != "typ" {
            return Err(IsarError::sdp_parse(format!("truncated candidate: '{s}'")));
        }
        let number = |index: usize, name: &str| -> Result<u32> {
            fields[index]
                .parse()
                .map_err(|_| IsarError::sdp_parse(format!("bad candidate {name} '{}'", fields[index])))
        };
        Ok(CandidateLine {
            foundation: fields[0].to_string(),
            component: number(1, "component")?,
            transport: fields[2].to_ascii_lowercase(),
            priority: number(3, "priority")?,
            address: fields[4].to_string(),
            port: number(5, "port")?,
            kind: fields[7].to_string(),
        })
    }
}

impl fmt::Display for CandidateLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation, self.component, self.transport, self.priority, self.address, self.port, self.kind
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_webrtc_style_lines() {
        let line: CandidateLine =
            "a=candidate:842163049 1 UDP 1677729535 203.0.113.7 50100 typ srflx raddr 10.0.0.2 rport 50100"
                .parse()
                .unwrap();
        assert_eq!(line.transport, "udp");
        assert_eq!(line.port, 50100);
        assert_eq!(line.kind, "srflx");
    }

    #[test]
    fn display_parses_back() {
        let line = CandidateLine {
            foundation: "1".into(),
            component: 1,
            transport: "loopback".into(),
            priority: 2_130_706_431,
            address: "127.0.0.1".into(),
            port: 50_100,
            kind: "host".into(),
        };
        assert_eq!(line.to_string().parse::<CandidateLine>().unwrap(), line);
    }

    #[test]
    fn malformed_lines_are_sdp_errors() {
        for bad in ["", "candidate:", "candidate:1 1 udp x 1.2.3.4 5 typ host", "candidate:1 1 udp 1 1.2.3.4 5 host"] {
            assert_eq!(bad.parse::<CandidateLine>().unwrap_err().code(), crate::ErrorCode::SdpParse, "{bad}");
        }
    }
}
