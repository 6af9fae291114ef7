//! Session descriptions.
//!
//! The description is SDP shaped text carried inside a small JSON envelope
//! (`{"type":"offer","sdp":"..."}`). Besides the usual `v=`/`o=`/`s=`/`t=`
//! lines and one `m=` line per track, it carries `a=isar-*` attributes with
//! everything negotiation needs:
//!
//! | attribute | meaning |
//! |---|---|
//! | `isar-version:<major.minor.patch>` | sender version |
//! | `isar-device:<AR\|VR\|MR\|PC\|UNDEFINED>` | sender device type |
//! | `isar-render:<w> <h> <views> <kbps> <fps> <depth> <prediction>` | render config |
//! | `isar-codecs:<codec> ...` | codecs the sender can handle, preferred first |
//! | `isar-codec-preference:<codec>` | configured preference |
//! | `isar-codec:<codec>` | codec chosen by the answerer |
//! | `isar-camera` | sender provides a camera track |
//! | `isar-channel:<name> <version> <priority> <reliable> <large>` | data channel |
//! | `isar-channel-ack:<name> <0\|1>` | answerer's support verdict |

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::config::RenderConfig;
use crate::data_channel::ChannelDescription;
use crate::{ChannelPriority, CodecType, DeviceType, IsarError, Result, TrackKind, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

/// JSON wrapper handed to the signaling provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Envelope {
    Offer { sdp: String },
    Answer { sdp: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub session_id: u64,
    pub version: Version,
    pub friendly_name: String,
    pub device_type: DeviceType,
    pub render_config: RenderConfig,
    pub codecs: Vec<CodecType>,
    pub codec_preference: CodecType,
    /// Set in answers.
    pub selected_codec: Option<CodecType>,
    pub camera: bool,
    pub tracks: Vec<TrackKind>,
    pub channels: Vec<ChannelDescription>,
    pub channel_acks: Vec<(String, bool)>,
}

impl SessionDescription {
    /// Serializes into the JSON envelope.
    pub fn to_json(&self) -> String {
        let sdp = self.to_sdp();
        let envelope = match self.kind {
            SdpType::Offer => Envelope::Offer { sdp },
            SdpType::Answer => Envelope::Answer { sdp },
        };
        // Two string fields cannot fail to serialize.
        serde_json::to_string(&envelope).unwrap_or_default()
    }

    /// Parses a JSON envelope, or bare SDP text carrying an offer.
    pub fn from_json(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Self::parse(SdpType::Offer, trimmed);
        }
        let envelope: Envelope = serde_json::from_str(trimmed)
            .map_err(|err| IsarError::sdp_parse(format!("bad envelope: {err}")))?;
        match envelope {
            Envelope::Offer { sdp } => Self::parse(SdpType::Offer, &sdp),
            Envelope::Answer { sdp } => Self::parse(SdpType::Answer, &sdp),
        }
    }

    pub fn to_sdp(&self) -> String {
        let mut out = String::new();
        let name = if self.friendly_name.is_empty() { "-" } else { &self.friendly_name };
        let render = &self.render_config;
        // Writing into a String is infallible.
        let _ = write!(
            out,
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns={}\r\nt=0 0\r\n\
             a=isar-version:{}\r\na=isar-device:{}\r\n\
             a=isar-render:{} {} {} {} {} {} {}\r\n",
            self.session_id,
            name,
            self.version,
            self.device_type,
            render.width,
            render.height,
            render.num_views,
            render.encoder_bitrate_kbps,
            render.framerate,
            render.depth_enabled as u8,
            render.pose_prediction_enabled as u8,
        );
        let codecs: Vec<&str> = self.codecs.iter().map(|codec| codec.as_str()).collect();
        let _ = write!(out, "a=isar-codecs:{}\r\n", codecs.join(" "));
        let _ = write!(out, "a=isar-codec-preference:{}\r\n", self.codec_preference);
        if let Some(codec) = self.selected_codec {
            let _ = write!(out, "a=isar-codec:{codec}\r\n");
        }
        if self.camera {
            out.push_str("a=isar-camera\r\n");
        }
        for channel in &self.channels {
            let _ = write!(
                out,
                "a=isar-channel:{} {} {} {} {}\r\n",
                channel.name,
                channel.version,
                channel.priority.as_str(),
                channel.reliable as u8,
                channel.requires_large_messages as u8,
            );
        }
        for (name, supported) in &self.channel_acks {
            let _ = write!(out, "a=isar-channel-ack:{} {}\r\n", name, *supported as u8);
        }
        for track in &self.tracks {
            let line = match track {
                TrackKind::Video | TrackKind::Camera => "video 9 UDP/TLS/RTP/SAVPF 96",
                TrackKind::Audio | TrackKind::Microphone => "audio 9 UDP/TLS/RTP/SAVPF 111",
            };
            let _ = write!(out, "m={line}\r\na=mid:{}\r\n", track.as_str());
        }
        if !self.channels.is_empty() || !self.channel_acks.is_empty() {
            out.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\na=mid:data\r\n");
        }
        out
    }

    pub fn parse(kind: SdpType, text: &str) -> Result<Self> {
        let mut session = Parsed::default();
        let mut current_media: Option<&str> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .filter(|(key, _)| key.len() == 1)
                .ok_or_else(|| IsarError::sdp_parse(format!("line {}: '{line}'", index + 1)))?;
            match key {
                "v" if value != "0" => return Err(IsarError::sdp_parse(format!("unsupported v={value}"))),
                "v" => session.saw_version_line = true,
                "o" => {
                    let id = value.split_whitespace().nth(1).unwrap_or_default();
                    session.session_id = Some(
                        id.parse().map_err(|_| IsarError::sdp_parse(format!("bad session id '{id}'")))?,
                    );
                }
                "s" => session.friendly_name = if value == "-" { String::new() } else { value.to_string() },
                "m" => {
                    current_media = value.split_whitespace().next();
                    if current_media.is_none() {
                        return Err(IsarError::sdp_parse("empty m= line"));
                    }
                }
                "a" => session.attribute(value, current_media)?,
                _ => {}
            }
        }
        session.finish(kind)
    }
}

#[derive(Default)]
struct Parsed {
    saw_version_line: bool,
    session_id: Option<u64>,
    friendly_name: String,
    version: Option<Version>,
    device_type: Option<DeviceType>,
    render_config: Option<RenderConfig>,
    codecs: Vec<CodecType>,
    codec_preference: Option<CodecType>,
    selected_codec: Option<CodecType>,
    camera: bool,
    tracks: Vec<TrackKind>,
    channels: Vec<ChannelDescription>,
    channel_acks: Vec<(String, bool)>,
}

impl Parsed {
    fn attribute(&mut self, value: &str, media: Option<&str>) -> Result<()> {
        let (name, argument) = value.split_once(':').unwrap_or((value, ""));
        match name {
            "isar-version" => self.version = Some(parse_field(argument, "version")?),
            "isar-device" => self.device_type = Some(parse_field(argument, "device")?),
            "isar-render" => self.render_config = Some(parse_render(argument)?),
            "isar-codecs" => {
                self.codecs = argument
                    .split_whitespace()
                    .map(|codec| parse_field(codec, "codec"))
                    .collect::<Result<_>>()?;
            }
            "isar-codec-preference" => self.codec_preference = Some(parse_field(argument, "codec")?),
            "isar-codec" => self.selected_codec = Some(parse_field(argument, "codec")?),
            "isar-camera" => self.camera = true,
            "isar-channel" => self.channels.push(parse_channel(argument)?),
            "isar-channel-ack" => {
                let mut fields = argument.split_whitespace();
                match (fields.next(), fields.next(), fields.next()) {
                    (Some(name), Some(flag), None) => self.channel_acks.push((name.to_string(), parse_flag(flag)?)),
                    _ => return Err(IsarError::sdp_parse(format!("bad channel ack '{argument}'"))),
                }
            }
            "mid" => {
                let track = match (media, argument) {
                    (Some("video"), "video") => Some(TrackKind::Video),
                    (Some("video"), "camera") => Some(TrackKind::Camera),
                    (Some("audio"), "audio") => Some(TrackKind::Audio),
                    (Some("audio"), "microphone") => Some(TrackKind::Microphone),
                    _ => None,
                };
                self.tracks.extend(track);
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self, kind: SdpType) -> Result<SessionDescription> {
        if !self.saw_version_line {
            return Err(IsarError::sdp_parse("missing v= line"));
        }
        let missing = |what: &str| IsarError::sdp_parse(format!("missing {what}"));
        Ok(SessionDescription {
            kind,
            session_id: self.session_id.ok_or_else(|| missing("o= line"))?,
            version: self.version.ok_or_else(|| missing("isar-version"))?,
            friendly_name: self.friendly_name,
            device_type: self.device_type.ok_or_else(|| missing("isar-device"))?,
            render_config: self.render_config.ok_or_else(|| missing("isar-render"))?,
            codecs: self.codecs,
            codec_preference: self.codec_preference.unwrap_or(CodecType::Auto),
            selected_codec: self.selected_codec,
            camera: self.camera,
            tracks: self.tracks,
            channels: self.channels,
            channel_acks: self.channel_acks,
        })
    }
}

fn parse_field<T: std::str::FromStr>(text: &str, what: &str) -> Result<T> {
    text.trim().parse().map_err(|_| IsarError::sdp_parse(format!("bad {what} '{text}'")))
}

fn parse_flag(text: &str) -> Result<bool> {
    match text {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(IsarError::sdp_parse(format!("bad flag '{text}'"))),
    }
}

fn parse_render(text: &str) -> Result<RenderConfig> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let [width, height, views, kbps, fps, depth, prediction] = fields[..] else {
        return Err(IsarError::sdp_parse(format!("bad render config '{text}'")));
    };
    Ok(RenderConfig {
        width: parse_field(width, "width")?,
        height: parse_field(height, "height")?,
        num_views: parse_field(views, "views")?,
        encoder_bitrate_kbps: parse_field(kbps, "bitrate")?,
        framerate: parse_field(fps, "framerate")?,
        depth_enabled: parse_flag(depth)?,
        pose_prediction_enabled: parse_flag(prediction)?,
    })
}

fn parse_channel(text: &str) -> Result<ChannelDescription> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let [name, version, priority, reliable, large] = fields[..] else {
        return Err(IsarError::sdp_parse(format!("bad channel '{text}'")));
    };
    Ok(ChannelDescription {
        name: name.to_string(),
        version: parse_field(version, "channel version")?,
        priority: parse_field::<ChannelPriority>(priority, "priority")?,
        reliable: parse_flag(reliable)?,
        requires_large_messages: parse_flag(large)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> SessionDescription {
        SessionDescription {
            kind: SdpType::Offer,
            session_id: 4_611_686_018_427_387_904,
            version: Version::LATEST,
            friendly_name: "Render Node 1".into(),
            device_type: DeviceType::Pc,
            render_config: RenderConfig::default(),
            codecs: vec![CodecType::H265, CodecType::H264],
            codec_preference: CodecType::Auto,
            selected_codec: None,
            camera: false,
            tracks: vec![TrackKind::Video, TrackKind::Audio],
            channels: vec![ChannelDescription {
                priority: ChannelPriority::High,
                requires_large_messages: true,
                ..ChannelDescription::new("holo.demo.chat")
            }],
            channel_acks: Vec::new(),
        }
    }

    #[test]
    fn envelope_round_trips_every_attribute() {
        let mut answer = offer();
        answer.kind = SdpType::Answer;
        answer.selected_codec = Some(CodecType::H264);
        answer.camera = true;
        answer.tracks.push(TrackKind::Camera);
        answer.channel_acks.push(("holo.demo.chat".into(), true));

        let json = answer.to_json();
        assert!(json.starts_with(r#"{"type":"answer""#));
        assert_eq!(SessionDescription::from_json(&json).unwrap(), answer);
    }

    #[test]
    fn bare_sdp_is_treated_as_an_offer() {
        let parsed = SessionDescription::from_json(&offer().to_sdp()).unwrap();
        assert_eq!(parsed.kind, SdpType::Offer);
        assert_eq!(parsed.friendly_name, "Render Node 1");
    }

    #[test]
    fn unknown_attributes_are_ignored() {
        let text = offer().to_sdp() + "a=ice-ufrag:abcd\r\nc=IN IP4 0.0.0.0\r\n";
        assert!(SessionDescription::parse(SdpType::Offer, &text).is_ok());
    }

    #[test]
    fn malformed_descriptions_are_sdp_errors() {
        let cases = [
            "".to_string(),
            "hello".to_string(),
            "v=1\r\n".to_string(),
            offer().to_sdp().replace("a=isar-version:2025.0.0\r\n", ""),
            offer().to_sdp().replace("a=isar-render:2064 2208 2 -1 90 0 1", "a=isar-render:2064"),
            offer().to_sdp().replace("H265 H264", "H265 MPEG2"),
            r#"{"type":"pranswer","sdp":""}"#.to_string(),
        ];
        for text in &cases {
            let err = SessionDescription::from_json(text).unwrap_err();
            assert_eq!(err.code(), crate::ErrorCode::SdpParse, "{text:?}");
        }
    }
}
