//! Stats reports.
//!
//! A report is a list of [`Stats`] objects, each a bag of named, typed
//! members. The member schema depends on the stats type and on what the
//! transport measures, so members are dynamically typed through
//! [`StatsValue`] instead of fixed struct fields.
//!
//! Reports are produced by [`collect`] from the connection's counters plus
//! whatever the transport adds, and delivered to stats handlers.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::transport::Packet;
use crate::{CodecType, ConnectionState, Role};

abi_enum! {
    /// What a [`Stats`] object describes.
    pub enum StatsType: u32 {
        Codec = 0,
        InboundRtp = 1,
        OutboundRtp = 2,
        RemoteInboundRtp = 3,
        RemoteOutboundRtp = 4,
        MediaSource = 5,
        MediaPlayout = 6,
        PeerConnection = 7,
        DataChannel = 8,
        Transport = 9,
        CandidatePair = 10,
        LocalCandidate = 11,
        RemoteCandidate = 12,
        Certificate = 13,
    }
}

impl StatsType {
    pub fn as_str(self) -> &'static str {
        match self {
            StatsType::Codec => "codec",
            StatsType::InboundRtp => "inbound-rtp",
            StatsType::OutboundRtp => "outbound-rtp",
            StatsType::RemoteInboundRtp => "remote-inbound-rtp",
            StatsType::RemoteOutboundRtp => "remote-outbound-rtp",
            StatsType::MediaSource => "media-source",
            StatsType::MediaPlayout => "media-playout",
            StatsType::PeerConnection => "peer-connection",
            StatsType::DataChannel => "data-channel",
            StatsType::Transport => "transport",
            StatsType::CandidatePair => "candidate-pair",
            StatsType::LocalCandidate => "local-candidate",
            StatsType::RemoteCandidate => "remote-candidate",
            StatsType::Certificate => "certificate",
        }
    }
}

abi_enum! {
    /// Type tag of a [`StatsMember`].
    pub enum StatsMemberType: u32 {
        Bool = 0,
        Int = 1,
        Uint = 2,
        Long = 3,
        Ulong = 4,
        Double = 5,
        String = 6,
        BoolArray = 7,
        IntArray = 8,
        UintArray = 9,
        LongArray = 10,
        UlongArray = 11,
        DoubleArray = 12,
        StringArray = 13,
    }
}

/// A member value. The variant is the member's type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatsValue {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Long(i64),
    Ulong(u64),
    Double(f64),
    String(String),
    BoolArray(Vec<bool>),
    IntArray(Vec<i32>),
    UintArray(Vec<u32>),
    LongArray(Vec<i64>),
    UlongArray(Vec<u64>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl StatsValue {
    pub fn member_type(&self) -> StatsMemberType {
        match self {
            StatsValue::Bool(_) => StatsMemberType::Bool,
            StatsValue::Int(_) => StatsMemberType::Int,
            StatsValue::Uint(_) => StatsMemberType::Uint,
            StatsValue::Long(_) => StatsMemberType::Long,
            StatsValue::Ulong(_) => StatsMemberType::Ulong,
            StatsValue::Double(_) => StatsMemberType::Double,
            StatsValue::String(_) => StatsMemberType::String,
            StatsValue::BoolArray(_) => StatsMemberType::BoolArray,
            StatsValue::IntArray(_) => StatsMemberType::IntArray,
            StatsValue::UintArray(_) => StatsMemberType::UintArray,
            StatsValue::LongArray(_) => StatsMemberType::LongArray,
            StatsValue::UlongArray(_) => StatsMemberType::UlongArray,
            StatsValue::DoubleArray(_) => StatsMemberType::DoubleArray,
            StatsValue::StringArray(_) => StatsMemberType::StringArray,
        }
    }
}

/// One named member. Undefined members keep their type but carry no value.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsMember {
    name: String,
    member_type: StatsMemberType,
    value: Option<StatsValue>,
}

impl StatsMember {
    pub fn new(name: impl Into<String>, value: StatsValue) -> Self {
        Self { name: name.into(), member_type: value.member_type(), value: Some(value) }
    }

    pub fn undefined(name: impl Into<String>, member_type: StatsMemberType) -> Self {
        Self { name: name.into(), member_type, value: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_type(&self) -> StatsMemberType {
        self.member_type
    }

    pub fn is_defined(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&StatsValue> {
        self.value.as_ref()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Some(StatsValue::Bool(value)) => Some(value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self.value {
            Some(StatsValue::Ulong(value)) => Some(value),
            Some(StatsValue::Uint(value)) => Some(value as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            Some(StatsValue::Double(value)) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Some(StatsValue::String(value)) => Some(value),
            _ => None,
        }
    }
}

/// One stats object.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub id: String,
    pub kind: StatsType,
    /// Microseconds since the Unix epoch.
    pub timestamp_us: i64,
    pub members: Vec<StatsMember>,
}

impl Stats {
    pub fn new(id: impl Into<String>, kind: StatsType, timestamp_us: i64) -> Self {
        Self { id: id.into(), kind, timestamp_us, members: Vec::new() }
    }

    /// Builder-style member append.
    pub fn with(mut self, name: &str, value: StatsValue) -> Self {
        self.members.push(StatsMember::new(name, value));
        self
    }

    pub fn member(&self, name: &str) -> Option<&StatsMember> {
        self.members.iter().find(|member| member.name == name)
    }

    /// JSON object with `type`, `id`, `timestamp` and every defined member.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), Value::from(self.kind.as_str()));
        object.insert("id".into(), Value::from(self.id.as_str()));
        object.insert("timestamp".into(), Value::from(self.timestamp_us));
        for member in &self.members {
            if let Some(value) = &member.value {
                let value = serde_json::to_value(value).unwrap_or(Value::Null);
                object.insert(member.name.clone(), value);
            }
        }
        Value::Object(object)
    }
}

impl Serialize for Stats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// A full report as handed to stats handlers.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StatsReport {
    pub timestamp_us: i64,
    pub stats: Vec<Stats>,
}

impl StatsReport {
    pub fn get(&self, id: &str) -> Option<&Stats> {
        self.stats.iter().find(|stats| stats.id == id)
    }

    pub fn of_type(&self, kind: StatsType) -> impl Iterator<Item = &Stats> {
        self.stats.iter().filter(move |stats| stats.kind == kind)
    }

    pub fn to_json(&self) -> String {
        let array: Vec<Value> = self.stats.iter().map(Stats::to_value).collect();
        Value::Array(array).to_string()
    }
}

pub(crate) fn now_us() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_micros() as i64).unwrap_or(0)
}

/// Running totals kept by a connection.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub frames_sent: AtomicU64,
    pub frames_received: AtomicU64,
    pub camera_frames_sent: AtomicU64,
    pub camera_frames_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub poses_received: AtomicU64,
    pub inputs_received: AtomicU64,
    pub inputs_dropped: AtomicU64,
    pub audio_blocks_sent: AtomicU64,
    pub audio_blocks_received: AtomicU64,
    pub channel_messages_sent: AtomicU64,
    pub channel_messages_received: AtomicU64,
}

impl Counters {
    pub(crate) fn record_sent(&self, packet: &Packet) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(packet.payload_len() as u64, Ordering::Relaxed);
        match packet {
            Packet::VideoFrame(_) => bump(&self.frames_sent),
            Packet::CameraFrame { .. } => bump(&self.camera_frames_sent),
            Packet::Audio(_) | Packet::Microphone(_) => bump(&self.audio_blocks_sent),
            Packet::ChannelData { .. } => bump(&self.channel_messages_sent),
            _ => {}
        }
    }

    pub(crate) fn record_received(&self, packet: &Packet) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(packet.payload_len() as u64, Ordering::Relaxed);
        match packet {
            Packet::VideoFrame(_) => bump(&self.frames_received),
            Packet::CameraFrame { .. } => bump(&self.camera_frames_received),
            Packet::ViewPose(_) => bump(&self.poses_received),
            Packet::SpatialInput(_) => bump(&self.inputs_received),
            Packet::Audio(_) | Packet::Microphone(_) => bump(&self.audio_blocks_received),
            Packet::ChannelData { .. } => bump(&self.channel_messages_received),
            _ => {}
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// What [`collect`] needs to know about the connection.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub connection_id: u64,
    pub role: Role,
    pub state: ConnectionState,
    pub codec: Option<CodecType>,
    pub bitrate_kbps: i32,
    pub render_latency_us: Option<u64>,
    pub open_channels: u32,
    pub closed_channels: u32,
}

pub(crate) fn collect(snapshot: &Snapshot, counters: &Counters, transport: Vec<Stats>) -> StatsReport {
    let timestamp_us = now_us();
    let load = |counter: &AtomicU64| StatsValue::Ulong(counter.load(Ordering::Relaxed));
    let prefix = format!("C{}", snapshot.connection_id);
    let mut stats = Vec::with_capacity(transport.len() + 4);

    stats.push(
        Stats::new(format!("{prefix}-PC"), StatsType::PeerConnection, timestamp_us)
            .with("state", StatsValue::String(snapshot.state.to_string()))
            .with("dataChannelsOpened", StatsValue::Uint(snapshot.open_channels))
            .with("dataChannelsClosed", StatsValue::Uint(snapshot.closed_channels)),
    );

    if let Some(codec) = snapshot.codec {
        stats.push(
            Stats::new(format!("{prefix}-CODEC"), StatsType::Codec, timestamp_us)
                .with("mimeType", StatsValue::String(format!("video/{}", codec.as_str()))),
        );
    }

    let (video_out, video_in) = match snapshot.role {
        Role::Server => (&counters.frames_sent, &counters.camera_frames_received),
        Role::Client => (&counters.camera_frames_sent, &counters.frames_received),
    };
    let mut outbound = Stats::new(format!("{prefix}-OUT"), StatsType::OutboundRtp, timestamp_us)
        .with("kind", StatsValue::String("video".into()))
        .with("framesSent", load(video_out))
        .with("packetsSent", load(&counters.packets_sent))
        .with("bytesSent", load(&counters.bytes_sent));
    outbound.members.push(match snapshot.bitrate_kbps {
        kbps if kbps > 0 => StatsMember::new("targetBitrate", StatsValue::Double(kbps as f64 * 1000.0)),
        _ => StatsMember::undefined("targetBitrate", StatsMemberType::Double),
    });
    stats.push(outbound);

    let mut inbound = Stats::new(format!("{prefix}-IN"), StatsType::InboundRtp, timestamp_us)
        .with("kind", StatsValue::String("video".into()))
        .with("framesReceived", load(video_in))
        .with("packetsReceived", load(&counters.packets_received))
        .with("bytesReceived", load(&counters.bytes_received))
        .with("posesReceived", load(&counters.poses_received))
        .with("inputsReceived", load(&counters.inputs_received))
        .with("inputsDropped", load(&counters.inputs_dropped));
    inbound.members.push(match snapshot.render_latency_us {
        Some(latency) => StatsMember::new("renderLatencyUs", StatsValue::Ulong(latency)),
        None => StatsMember::undefined("renderLatencyUs", StatsMemberType::Ulong),
    });
    stats.push(inbound);

    stats.extend(transport);
    StatsReport { timestamp_us, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Packet;

    fn snapshot() -> Snapshot {
        Snapshot {
            connection_id: 7,
            role: Role::Server,
            state: ConnectionState::Connected,
            codec: Some(CodecType::H265),
            bitrate_kbps: -1,
            render_latency_us: None,
            open_channels: 1,
            closed_channels: 0,
        }
    }

    #[test]
    fn member_types_follow_their_values() {
        let member = StatsMember::new("framesSent", StatsValue::Ulong(3));
        assert_eq!(member.member_type(), StatsMemberType::Ulong);
        assert!(member.is_defined());
        assert_eq!(member.as_u64(), Some(3));
        assert_eq!(member.as_f64(), None);

        let undefined = StatsMember::undefined("jitter", StatsMemberType::Double);
        assert_eq!(undefined.member_type(), StatsMemberType::Double);
        assert!(!undefined.is_defined());
    }

    #[test]
    fn json_skips_undefined_members() {
        let stats = Stats::new("T01", StatsType::Transport, 42)
            .with("bytesSent", StatsValue::Ulong(10))
            .with("ids", StatsValue::StringArray(vec!["a".into(), "b".into()]));
        let mut stats = stats;
        stats.members.push(StatsMember::undefined("rtt", StatsMemberType::Double));

        let json: Value = serde_json::from_str(&stats.to_json()).unwrap();
        assert_eq!(json["type"], "transport");
        assert_eq!(json["id"], "T01");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["bytesSent"], 10);
        assert_eq!(json["ids"][1], "b");
        assert!(json.get("rtt").is_none());
    }

    #[test]
    fn collected_report_reflects_counters() {
        let counters = Counters::default();
        counters.record_sent(&Packet::Passthrough(true));
        counters.record_received(&Packet::ChannelData { name: "a.b.c".into(), payload: vec![0; 5] });

        let report = collect(&snapshot(), &counters, Vec::new());
        let outbound = report.get("C7-OUT").unwrap();
        assert_eq!(outbound.member("packetsSent").unwrap().as_u64(), Some(1));
        assert!(!outbound.member("targetBitrate").unwrap().is_defined());

        let inbound = report.of_type(StatsType::InboundRtp).next().unwrap();
        assert_eq!(inbound.member("bytesReceived").unwrap().as_u64(), Some(5));
        assert_eq!(report.get("C7-CODEC").unwrap().member("mimeType").unwrap().as_str(), Some("video/H265"));

        let json: Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), report.stats.len());
    }
}
