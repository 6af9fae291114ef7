//! Fixtures shared by unit tests, integration tests and benchmarks.
//!
//! The centrepiece is [`LinkedPair`]: a server and a client connection in
//! one [`Isar`] context, linked through a [`LoopbackHub`] and a signaling
//! relay that the test pumps explicitly.

#![cfg(any(test, feature = "benchmark"))]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::{ClientApi, ConnectionApi, ServerApi};
use crate::config::{Config, PortRange, RenderConfig};
use crate::data_channel::{ChannelDescription, DataChannelProvider};
use crate::image::{CpuImage, image_size};
use crate::signaling::{SignalingApi, SignalingHandle, SignalingProvider};
use crate::stats::Stats;
use crate::transport::{
    IceCandidate, LoopbackHub, Packet, Transport, TransportConfig, TransportEvents, TransportFactory,
};
use crate::{
    CodecType, ConnectionHandle, ConnectionState, DeviceType, FrameInfo, FramePayload, GpuHandle,
    GraphicsApiConfig, GraphicsApiFrame, Isar, Result, Role, TextureFormat, TrackKind, XrPose,
};

/// How long [`LinkedPair::connect`] waits for both sides.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for asynchronous callbacks in tests.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub fn server_config() -> Config {
    Config {
        friendly_name: "test-server".to_string(),
        device_type: DeviceType::Pc,
        port_range: PortRange { min_port: 50100, max_port: 50199 },
        ..Config::default()
    }
}

pub fn client_config() -> Config {
    Config {
        friendly_name: "test-client".to_string(),
        device_type: DeviceType::Mr,
        render_config: RenderConfig { width: 1440, height: 1584, framerate: 72, ..RenderConfig::default() },
        port_range: PortRange { min_port: 50100, max_port: 50199 },
        ..Config::default()
    }
}

/// A non-null graphics object. The core never dereferences it.
pub fn gpu_handle() -> GpuHandle {
    GpuHandle::new(NonNull::<u8>::dangling().as_ptr().cast()).expect("dangling pointers are non-null")
}

pub fn d3d11() -> GraphicsApiConfig {
    GraphicsApiConfig::D3D11 { device: gpu_handle() }
}

pub fn d3d12() -> GraphicsApiConfig {
    GraphicsApiConfig::D3D12 { device: gpu_handle(), command_queue: gpu_handle(), fence: gpu_handle() }
}

/// A D3D11 frame rendered for `frame_timestamp`.
pub fn frame(frame_timestamp: i64) -> GraphicsApiFrame {
    GraphicsApiFrame {
        info: FrameInfo {
            pose: XrPose { frame_timestamp, pose_timestamp: frame_timestamp, ..XrPose::default() },
            ..FrameInfo::default()
        },
        payload: FramePayload::D3D11 { texture: gpu_handle(), depth: None, subresource_index: 0 },
    }
}

/// A pose sampled at `timestamp` with the head `x` metres to the right.
pub fn pose_at(timestamp: i64, x: f32) -> XrPose {
    let mut pose = XrPose { frame_timestamp: timestamp, pose_timestamp: timestamp, ..XrPose::default() };
    pose.pose_left.position.x = x - 0.032;
    pose.pose_right.position.x = x + 0.032;
    pose
}

/// A deterministic image with a byte ramp, valid for every format.
pub fn gradient_image(format: TextureFormat, width: u32, height: u32) -> CpuImage {
    let data = (0..image_size(format, width, height)).map(|index| (index % 251) as u8).collect();
    CpuImage::new(format, width, height, data).expect("buffer sized by image_size")
}

// Signaling
// ---------------------------------------------------------------------

/// A call a [`RecordingSignaling`] received.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Start(Ipv4Addr, u32),
    Stop,
    ConnectionChanged(ConnectionState),
    Sdp(String),
    Candidate(IceCandidate),
}

/// Records every provider call and queues SDP and candidates for relaying.
#[derive(Debug, Default)]
pub struct RecordingSignaling {
    events: Mutex<Vec<SignalingEvent>>,
    outbox: Mutex<VecDeque<SignalingEvent>>,
}

impl RecordingSignaling {
    pub fn events(&self) -> Vec<SignalingEvent> {
        self.events.lock().clone()
    }

    pub fn sdp_count(&self) -> usize {
        self.events.lock().iter().filter(|event| matches!(event, SignalingEvent::Sdp(_))).count()
    }

    fn take_outbox(&self) -> Vec<SignalingEvent> {
        self.outbox.lock().drain(..).collect()
    }

    fn record(&self, event: SignalingEvent, relay: bool) {
        if relay {
            self.outbox.lock().push_back(event.clone());
        }
        self.events.lock().push(event);
    }
}

impl SignalingProvider for RecordingSignaling {
    fn start(&self, suggested_ipv4: Ipv4Addr, suggested_port: u32) {
        self.record(SignalingEvent::Start(suggested_ipv4, suggested_port), false);
    }

    fn stop(&self) {
        self.record(SignalingEvent::Stop, false);
    }

    fn connection_changed(&self, state: ConnectionState) {
        self.record(SignalingEvent::ConnectionChanged(state), false);
    }

    fn send_sdp(&self, sdp: &str) {
        self.record(SignalingEvent::Sdp(sdp.to_string()), true);
    }

    fn send_ice_candidate(&self, id: &str, line_index: i32, candidate: &str) {
        self.record(SignalingEvent::Candidate(IceCandidate::new(id, line_index, candidate)), true);
    }
}

// Data channels
// ---------------------------------------------------------------------

/// Data channel provider that records its callbacks.
#[derive(Debug)]
pub struct RecordingChannel {
    accept: bool,
    remote: Mutex<Vec<ChannelDescription>>,
    supported: Mutex<Vec<bool>>,
    connected: Mutex<Vec<bool>>,
    received: Mutex<Vec<Vec<u8>>>,
}

impl RecordingChannel {
    /// A provider that answers `accept` to every remote description.
    pub fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            remote: Mutex::default(),
            supported: Mutex::default(),
            connected: Mutex::default(),
            received: Mutex::default(),
        })
    }

    pub fn remote_descriptions(&self) -> Vec<ChannelDescription> {
        self.remote.lock().clone()
    }

    pub fn supported_changes(&self) -> Vec<bool> {
        self.supported.lock().clone()
    }

    pub fn connected_changes(&self) -> Vec<bool> {
        self.connected.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.lock().last() == Some(&true)
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().clone()
    }
}

impl DataChannelProvider for RecordingChannel {
    fn is_remote_supported(&self, remote: &ChannelDescription) -> bool {
        self.remote.lock().push(remote.clone());
        self.accept
    }

    fn on_supported_changed(&self, supported: bool) {
        self.supported.lock().push(supported);
    }

    fn on_connected_changed(&self, connected: bool) {
        self.connected.lock().push(connected);
    }

    fn on_data_received(&self, data: &[u8]) {
        self.received.lock().push(data.to_vec());
    }
}

// Transport
// ---------------------------------------------------------------------

/// Loopback transport whose frames arrive with a decoded CPU copy attached.
#[derive(Debug, Clone)]
pub struct DecodingHub {
    hub: LoopbackHub,
    image: Arc<CpuImage>,
}

impl DecodingHub {
    pub fn new(hub: LoopbackHub, image: CpuImage) -> Self {
        Self { hub, image: Arc::new(image) }
    }
}

impl TransportFactory for DecodingHub {
    fn prepare(&self, config: &TransportConfig) -> Result<()> {
        self.hub.prepare(config)
    }

    fn create(&self, config: &TransportConfig, events: TransportEvents) -> Result<Box<dyn Transport>> {
        let inner = self.hub.create(config, events)?;
        Ok(Box::new(DecodingTransport { inner, image: self.image.clone() }))
    }

    fn supported_codecs(&self, role: Role) -> Vec<CodecType> {
        self.hub.supported_codecs(role)
    }
}

struct DecodingTransport {
    inner: Box<dyn Transport>,
    image: Arc<CpuImage>,
}

impl Transport for DecodingTransport {
    fn add_track(&self, track: TrackKind) -> Result<()> {
        self.inner.add_track(track)
    }

    fn local_candidates(&self) -> Vec<IceCandidate> {
        self.inner.local_candidates()
    }

    fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.inner.add_remote_candidate(candidate)
    }

    fn send(&self, packet: Packet) -> Result<()> {
        let packet = match packet {
            Packet::VideoFrame(mut media) => {
                media.image = Some(self.image.clone());
                Packet::VideoFrame(media)
            }
            Packet::CameraFrame { mut frame, metadata } => {
                frame.image = Some(self.image.clone());
                Packet::CameraFrame { frame, metadata }
            }
            other => other,
        };
        self.inner.send(packet)
    }

    fn set_bitrate(&self, kbps: i32) -> Result<()> {
        self.inner.set_bitrate(kbps)
    }

    fn stats(&self) -> Vec<Stats> {
        self.inner.stats()
    }

    fn disconnect(&self) {
        self.inner.disconnect()
    }
}

// Linked pair
// ---------------------------------------------------------------------

/// A server and a client connection of one context, wired to each other.
///
/// Connections are created and their signaling registered, but nothing is
/// opened: tracks and data channels can still be set up before
/// [`LinkedPair::connect`].
pub struct LinkedPair {
    pub isar: Isar,
    pub hub: LoopbackHub,
    pub server: ConnectionHandle,
    pub client: ConnectionHandle,
    pub server_signaling: Arc<RecordingSignaling>,
    pub client_signaling: Arc<RecordingSignaling>,
    pub server_registration: SignalingHandle,
    pub client_registration: SignalingHandle,
}

impl LinkedPair {
    pub fn new() -> Self {
        Self::with_configs(server_config(), client_config())
    }

    pub fn with_configs(server: Config, client: Config) -> Self {
        let hub = LoopbackHub::new();
        let isar = Isar::loopback(&hub).expect("loopback context");
        Self::build(isar, hub, server, client)
    }

    /// A pair whose pulled frames carry `image` as their CPU copy.
    pub fn with_images(image: CpuImage) -> Self {
        let hub = LoopbackHub::new();
        let isar = Isar::new(DecodingHub::new(hub.clone(), image)).expect("decoding context");
        Self::build(isar, hub, server_config(), client_config())
    }

    fn build(isar: Isar, hub: LoopbackHub, server_config: Config, client_config: Config) -> Self {
        let server = isar.server().create_connection(&server_config, d3d11()).expect("server connection");
        let client = isar.client().create_connection(&client_config, d3d11()).expect("client connection");
        let server_signaling = Arc::new(RecordingSignaling::default());
        let client_signaling = Arc::new(RecordingSignaling::default());
        let signaling = isar.signaling();
        let server_registration = signaling.register_provider(server, server_signaling.clone()).expect("server signaling");
        let client_registration = signaling.register_provider(client, client_signaling.clone()).expect("client signaling");
        Self {
            isar,
            hub,
            server,
            client,
            server_signaling,
            client_signaling,
            server_registration,
            client_registration,
        }
    }

    /// Opens both connections and reports their signaling as connected.
    pub fn open(&self) -> Result<()> {
        self.isar.server().open_connection(self.server)?;
        self.isar.client().open_connection(self.client)?;
        let signaling = self.isar.signaling();
        signaling.set_connection_state(self.server_registration, true)?;
        signaling.set_connection_state(self.client_registration, true)
    }

    /// Forwards queued SDP and candidates to the other side.
    pub fn relay(&self) -> Result<usize> {
        let signaling = self.isar.signaling();
        let mut forwarded = 0;
        for (outbox, target) in [
            (&self.server_signaling, self.client_registration),
            (&self.client_signaling, self.server_registration),
        ] {
            for message in outbox.take_outbox() {
                match message {
                    SignalingEvent::Sdp(sdp) => signaling.set_remote_sdp(target, &sdp)?,
                    SignalingEvent::Candidate(candidate) => signaling.set_remote_ice_candidate(
                        target,
                        &candidate.sdp_mid,
                        candidate.sdp_mline_index,
                        &candidate.candidate,
                    )?,
                    _ => continue,
                }
                forwarded += 1;
            }
        }
        Ok(forwarded)
    }

    pub fn server_state(&self) -> ConnectionState {
        self.isar.server().connection_state(self.server).expect("server handle")
    }

    pub fn client_state(&self) -> ConnectionState {
        self.isar.client().connection_state(self.client).expect("client handle")
    }

    /// Relays until both sides report `state`.
    pub fn wait_for(&self, state: ConnectionState, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.relay().expect("relay");
            self.server_state() == state && self.client_state() == state
        })
    }

    /// Opens both sides and relays until both are CONNECTED.
    pub fn connect(&self) {
        self.open().expect("open");
        assert!(
            self.wait_for(ConnectionState::Connected, CONNECT_TIMEOUT),
            "pair did not connect: server {}, client {}",
            self.server_state(),
            self.client_state()
        );
    }

    /// Sends a frame from the server and pulls it on the client.
    pub fn stream_frame(&self, frame_timestamp: i64) -> GraphicsApiFrame {
        self.isar.server().push_frame(self.server, frame(frame_timestamp)).expect("push_frame");
        let mut pulled = None;
        let arrived = wait_until(CALLBACK_TIMEOUT, || {
            pulled = self.isar.client().pull_frame(self.client).ok();
            pulled.is_some()
        });
        assert!(arrived, "frame {frame_timestamp} never arrived");
        pulled.expect("checked above")
    }
}

impl Default for LinkedPair {
    fn default() -> Self {
        Self::new()
    }
}
