//! Per-connection state machine.
//!
//! A [`Connection`] owns its transport, the negotiated session and every
//! buffer the host pulls from. Two background tasks run per connection:
//!
//! - the **ingest** task consumes [`TransportEvent`]s (connectivity and
//!   packets from the remote peer) and updates state;
//! - the **dispatch** task delivers queued [`Event`]s to host callbacks
//!   outside every internal lock.
//!
//! With `STATS_COLLECTOR` a third task publishes a stats report every second.
//!
//! ```text
//! DISCONNECTED ──open + signaling up──► CONNECTING ──transport up + remote sdp──► CONNECTED
//!      ▲                                    │                                        │
//!      └──────────── close: CLOSING ◄───────┴──────── remote gone / failure ─────────┘
//! ```

mod handlers;
mod media;
#[cfg(test)]
mod tests;

pub use handlers::{
    AudioHandler, CameraCaptureHandler, HandlerId, HapticHandler, SpatialInputHandler, StateHandler,
    StatsHandler, TrackEnabledHandler, ViewPoseHandler,
};
pub use media::SPATIAL_INPUT_CAPACITY;

pub(crate) use handlers::Handlers;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{Config, RenderConfig, validate_bitrate};
use crate::data_channel::{Channel, ChannelDescription, ChannelState, DataChannelProvider};
use crate::prediction::PosePredictionConfig;
use crate::signaling::{
    SdpType, SessionDescription, SignalingHandle, SignalingProvider, check_version, negotiate_codec,
    negotiate_render,
};
use crate::stats::{self, Counters, Snapshot, StatsReport, now_us};
use crate::transport::{
    IceCandidate, MediaFrame, Packet, Transport, TransportConfig, TransportEvent, TransportEvents,
    TransportFactory,
};
use crate::{
    AudioData, CameraConfiguration, CameraMetadata, CameraProperties, ChannelFailure, CodecType,
    ConfigIssue, ConnectionState, DeviceType, DiagnosticOptions, GraphicsApiConfig, GraphicsApiFrame,
    GraphicsApiType, Haptic, IsarError, Result, Role, SpatialInput, TextureFormat, TrackFailure,
    TrackKind, Version, XrPose,
};
use handlers::{ChannelCall, Event, SignalingCall};
use media::{CameraArrival, Media};

/// Interval of the `STATS_COLLECTOR` report.
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Connection handle. Never reused within a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub(crate) NonZeroU64);

impl ConnectionHandle {
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection#{}", self.0)
    }
}

/// What is known about the remote end while CONNECTED (`IsarConnectionInfo`).
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub remote_name: String,
    pub remote_version: Version,
    /// The negotiated render config.
    pub render_config: RenderConfig,
    pub remote_device_type: DeviceType,
    pub codec_in_use: CodecType,
}

/// A camera frame pulled by the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFrame {
    pub frame: GraphicsApiFrame,
    pub metadata: CameraMetadata,
    pub width: u32,
    pub height: u32,
}

struct Registration {
    handle: SignalingHandle,
    provider: Arc<dyn SignalingProvider>,
}

/// Mutable connection state, guarded by one lock.
struct Session {
    state: ConnectionState,
    /// Bumped on every transition; orders state handler registration.
    state_seq: u64,
    opened: bool,
    signaling: Option<Registration>,
    signaling_connected: bool,
    session_id: u64,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    /// Set once the remote description was applied.
    negotiated: Option<ConnectionInfo>,
    transport_connected: bool,
    /// Remote candidates that arrived before the remote description.
    pending_candidates: Vec<IceCandidate>,
    tracks: Vec<TrackKind>,
    video_api: Option<GraphicsApiType>,
    camera_api: Option<GraphicsApiType>,
    audio_enabled: bool,
    microphone_enabled: bool,
    /// Requested capture while camera capture is enabled.
    camera_capture: Option<CameraConfiguration>,
    passthrough: bool,
    bitrate_kbps: i32,
    channels: BTreeMap<String, Channel>,
    channels_opened: u32,
    channels_closed: u32,
}

pub(crate) struct Connection {
    id: u64,
    role: Role,
    config: Config,
    graphics: GraphicsApiType,
    supported_codecs: Vec<CodecType>,
    transport: Box<dyn Transport>,
    runtime: Handle,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
    handlers: Arc<Handlers>,
    media: Media,
    counters: Counters,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
    event_log: bool,
}

impl Connection {
    /// Validates `config`, builds the transport and starts the background
    /// tasks on `runtime`.
    pub(crate) fn create(
        handle: ConnectionHandle,
        role: Role,
        config: &Config,
        graphics: GraphicsApiConfig,
        factory: &dyn TransportFactory,
        runtime: &Handle,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let supported_codecs = factory.supported_codecs(role);
        if config.codec_preference != CodecType::Auto && !supported_codecs.contains(&config.codec_preference) {
            let issue = match role {
                Role::Server => ConfigIssue::Encoder,
                Role::Client => ConfigIssue::Decoder,
            };
            return Err(IsarError::config(issue, format!("{} is not supported here", config.codec_preference)));
        }

        let transport_config = TransportConfig {
            role,
            ice_servers: config.ice_servers.clone(),
            port_range: config.port_range,
        };
        factory
            .prepare(&transport_config)
            .map_err(|err| IsarError::PeerConnectionFactory { reason: err.to_string() })?;

        let (transport_events, transport_rx) = TransportEvents::channel();
        let transport = factory.create(&transport_config, transport_events).map_err(|err| match err {
            IsarError::PeerConnection { .. } => err,
            other => IsarError::PeerConnection { reason: other.to_string() },
        })?;

        let audio_track = match role {
            Role::Server => TrackKind::Audio,
            Role::Client => TrackKind::Microphone,
        };
        transport
            .add_track(audio_track)
            .map_err(|err| IsarError::track(TrackFailure::Audio, err.to_string()))?;

        if config.diagnostic_options.contains(DiagnosticOptions::TRACING) {
            crate::diagnostics::init_tracing();
        }

        let id = handle.as_u64();
        let (events, event_rx) = mpsc::unbounded_channel();
        let handlers = Arc::new(Handlers::default());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let connection = Arc::new(Self {
            id,
            role,
            config: config.clone(),
            graphics: graphics.api_type(),
            supported_codecs,
            transport,
            runtime: runtime.clone(),
            state_tx,
            session: Mutex::new(Session {
                state: ConnectionState::Disconnected,
                state_seq: 0,
                opened: false,
                signaling: None,
                signaling_connected: false,
                session_id: (now_us() as u64) ^ (id << 48),
                local: None,
                remote: None,
                negotiated: None,
                transport_connected: false,
                pending_candidates: Vec::new(),
                tracks: vec![audio_track],
                video_api: None,
                camera_api: None,
                audio_enabled: false,
                microphone_enabled: false,
                camera_capture: None,
                passthrough: false,
                bitrate_kbps: config.render_config.encoder_bitrate_kbps,
                channels: BTreeMap::new(),
                channels_opened: 0,
                channels_closed: 0,
            }),
            handlers: handlers.clone(),
            media: Media::default(),
            counters: Counters::default(),
            events,
            cancel: CancellationToken::new(),
            event_log: config.diagnostic_options.contains(DiagnosticOptions::EVENT_LOG),
        });

        runtime.spawn(handlers::dispatch_task(id, handlers, event_rx));
        runtime.spawn(ingest_task(Arc::downgrade(&connection), transport_rx, connection.cancel.clone()));
        if config.diagnostic_options.contains(DiagnosticOptions::STATS_COLLECTOR) {
            runtime.spawn(stats_collector_task(Arc::downgrade(&connection), connection.cancel.clone()));
        }

        info!(connection = id, ?role, name = %config.friendly_name, device = %config.device_type, "Connection created");
        Ok(connection)
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn state_updates(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.state_tx.subscribe())
    }

    pub(crate) fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    fn emit(&self, event: Event) {
        // Fails only once the dispatch task is gone, i.e. during teardown.
        let _ = self.events.send(event);
    }

    fn signal(&self, session: &Session, call: SignalingCall) {
        if let Some(registration) = &session.signaling {
            self.emit(Event::Signaling { provider: registration.provider.clone(), call });
        }
    }

    fn channel_event(&self, name: &str, channel: &Channel, call: ChannelCall) {
        self.emit(Event::Channel { name: name.to_string(), provider: channel.provider.clone(), call });
    }

    fn transition(&self, session: &mut Session, next: ConnectionState) {
        if session.state == next {
            return;
        }
        let previous = std::mem::replace(&mut session.state, next);
        session.state_seq += 1;
        debug!(connection = self.id, %previous, %next, "State transition");
        if self.event_log {
            info!(target: crate::diagnostics::EVENT_LOG_TARGET, connection = self.id, %previous, %next, "Connection state changed");
        }
        self.state_tx.send_replace(next);
        self.emit(Event::State { seq: session.state_seq, state: next });
        self.signal(session, SignalingCall::ConnectionChanged(next));
    }

    // Lifecycle
    // ---------------------------------------------------------------------

    pub(crate) fn register_state_handler(&self, handler: StateHandler) -> HandlerId {
        let session = self.session.lock();
        let id = self.handlers.add_state(session.state_seq, handler);
        self.emit(Event::InitialState { handler: id, state: session.state });
        id
    }

    /// Attaches a signaling provider; returns the registration it replaced.
    pub(crate) fn attach_signaling(
        &self,
        handle: SignalingHandle,
        provider: Arc<dyn SignalingProvider>,
    ) -> Option<SignalingHandle> {
        let mut session = self.session.lock();
        let previous = session.signaling.replace(Registration { handle, provider });
        debug!(connection = self.id, %handle, "Signaling provider registered");
        previous.map(|registration| registration.handle)
    }

    pub(crate) fn signaling_handle(&self) -> Option<SignalingHandle> {
        self.session.lock().signaling.as_ref().map(|registration| registration.handle)
    }

    pub(crate) fn open(&self) -> Result<()> {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        if session.state.is_active() {
            return Err(IsarError::AlreadyConnected { state: session.state.to_string() });
        }
        if session.signaling.is_none() {
            return Err(IsarError::config(ConfigIssue::Signaling, "register a signaling provider before opening"));
        }

        session.opened = true;
        let signaling = self.config.signaling_config;
        self.signal(session, SignalingCall::Start(signaling.suggested_ipv4, signaling.port));
        info!(connection = self.id, ip = %signaling.suggested_ipv4, port = signaling.port, "Connection opened");

        if session.signaling_connected {
            self.begin_negotiation(session);
        }
        Ok(())
    }

    pub(crate) fn close(&self) -> Result<()> {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        if !session.opened {
            debug!(connection = self.id, "Close of an unopened connection ignored");
            return Ok(());
        }
        session.opened = false;
        self.transition(session, ConnectionState::Closing);
        self.transport.disconnect();
        self.reset_session(session);
        self.transition(session, ConnectionState::Disconnected);
        self.signal(session, SignalingCall::Stop);
        info!(connection = self.id, "Connection closed");
        Ok(())
    }

    /// Closes the connection and stops its background tasks.
    pub(crate) fn shutdown(&self) {
        if let Err(err) = self.close() {
            warn!(connection = self.id, error = %err, "Close during shutdown failed");
        }
        self.cancel.cancel();
    }

    fn begin_negotiation(&self, session: &mut Session) {
        self.reset_session(session);
        self.transition(session, ConnectionState::Connecting);
        if self.role == Role::Server {
            let offer = self.describe(session, SdpType::Offer);
            debug!(connection = self.id, codecs = ?offer.codecs, channels = offer.channels.len(), "Sending offer");
            self.signal(session, SignalingCall::SendSdp(offer.to_json()));
            session.local = Some(offer);
            self.send_local_candidates(session);
        }
    }

    /// Drops everything negotiated with the current remote.
    fn reset_session(&self, session: &mut Session) {
        for (name, channel) in session.channels.iter_mut() {
            if channel.reset() {
                session.channels_closed += 1;
                self.channel_event(name, channel, ChannelCall::ConnectedChanged(false));
            }
        }
        session.local = None;
        session.remote = None;
        session.negotiated = None;
        session.transport_connected = false;
        session.pending_candidates.clear();
        session.camera_capture = None;
        session.microphone_enabled = false;
        session.passthrough = false;
        self.media.clear();
    }

    fn describe(&self, session: &Session, kind: SdpType) -> SessionDescription {
        SessionDescription {
            kind,
            session_id: session.session_id,
            version: Version::LATEST,
            friendly_name: self.config.friendly_name.clone(),
            device_type: self.config.device_type,
            render_config: self.local_render(session),
            codecs: self.supported_codecs.clone(),
            codec_preference: self.config.codec_preference,
            selected_codec: None,
            camera: session.tracks.contains(&TrackKind::Camera),
            tracks: session.tracks.clone(),
            channels: session.channels.values().map(|channel| channel.description.clone()).collect(),
            channel_acks: Vec::new(),
        }
    }

    fn local_render(&self, session: &Session) -> RenderConfig {
        RenderConfig { encoder_bitrate_kbps: session.bitrate_kbps, ..self.config.render_config }
    }

    fn send_local_candidates(&self, session: &Session) {
        for candidate in self.transport.local_candidates() {
            trace!(connection = self.id, candidate = %candidate.candidate, "Local candidate");
            self.signal(session, SignalingCall::SendIceCandidate(candidate));
        }
    }

    fn apply_pending_candidates(&self, session: &mut Session) {
        for candidate in std::mem::take(&mut session.pending_candidates) {
            if let Err(err) = self.transport.add_remote_candidate(&candidate) {
                warn!(connection = self.id, error = %err, "Queued remote candidate rejected");
            }
        }
    }

    fn maybe_connected(&self, session: &mut Session) {
        if session.state != ConnectionState::Connecting || !session.transport_connected {
            return;
        }
        let Some(info) = &session.negotiated else {
            return;
        };
        if self.event_log {
            info!(
                target: crate::diagnostics::EVENT_LOG_TARGET,
                connection = self.id,
                remote = %info.remote_name,
                codec = %info.codec_in_use,
                width = info.render_config.width,
                height = info.render_config.height,
                "Session established"
            );
        }
        self.transition(session, ConnectionState::Connected);
    }

    pub(crate) fn connection_info(&self) -> Result<ConnectionInfo> {
        let session = self.session.lock();
        match (&session.negotiated, session.state) {
            (Some(info), ConnectionState::Connected) => Ok(info.clone()),
            _ => Err(IsarError::not_connected("get_connection_info")),
        }
    }

    // Signaling input
    // ---------------------------------------------------------------------

    pub(crate) fn set_signaling_connected(&self, connected: bool) {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        session.signaling_connected = connected;
        debug!(connection = self.id, connected, "Signaling connection changed");

        if connected {
            if session.opened && !session.state.is_active() {
                self.begin_negotiation(session);
            }
        } else if session.state == ConnectionState::Connecting {
            self.reset_session(session);
            self.transition(session, ConnectionState::Disconnected);
        }
    }

    pub(crate) fn set_remote_sdp(&self, text: &str) -> Result<()> {
        let remote = SessionDescription::from_json(text)?;
        check_version(Version::LATEST, remote.version)?;
        if self.event_log {
            info!(
                target: crate::diagnostics::EVENT_LOG_TARGET,
                connection = self.id,
                kind = ?remote.kind,
                remote = %remote.friendly_name,
                version = %remote.version,
                "Remote description received"
            );
        }
        match (self.role, remote.kind) {
            (Role::Client, SdpType::Offer) => self.apply_offer(remote),
            (Role::Server, SdpType::Answer) => self.apply_answer(remote),
            (role, kind) => Err(IsarError::sdp_parse(format!("{role:?} cannot apply {kind:?}"))),
        }
    }

    /// Asks the local providers about the remote channels of the same name.
    ///
    /// Runs without the session lock so providers may call back in.
    fn consult_providers(
        &self,
        remote_channels: impl Fn(&str) -> Option<ChannelDescription>,
    ) -> Vec<(String, bool)> {
        let pending: Vec<(String, Arc<dyn DataChannelProvider>, Option<ChannelDescription>)> = {
            let session = self.session.lock();
            session
                .channels
                .iter()
                .map(|(name, channel)| (name.clone(), channel.provider.clone(), remote_channels(name)))
                .collect()
        };
        pending
            .into_iter()
            .map(|(name, provider, remote)| {
                let supported = remote.is_some_and(|remote| provider.is_remote_supported(&remote));
                trace!(connection = self.id, channel = %name, supported, "Channel support decided");
                (name, supported)
            })
            .collect()
    }

    fn apply_channel_support(&self, session: &mut Session, verdicts: &[(String, bool)]) {
        for (name, supported) in verdicts {
            if let Some(channel) = session.channels.get_mut(name) {
                if channel.set_supported(*supported) {
                    self.channel_event(name, channel, ChannelCall::SupportedChanged(*supported));
                }
            }
        }
    }

    fn apply_offer(&self, offer: SessionDescription) -> Result<()> {
        let codec = negotiate_codec(
            &offer.codecs,
            offer.codec_preference,
            &self.supported_codecs,
            self.config.codec_preference,
        )?;
        let verdicts =
            self.consult_providers(|name| offer.channels.iter().find(|remote| remote.name == name).cloned());

        let mut guard = self.session.lock();
        let session = &mut *guard;
        if !session.opened {
            return Err(IsarError::not_connected("set_remote_sdp"));
        }
        if session.state != ConnectionState::Connecting || session.remote.is_some() {
            self.begin_negotiation(session);
        }

        self.apply_channel_support(session, &verdicts);
        let acks = verdicts
            .into_iter()
            .filter(|(name, _)| offer.channels.iter().any(|remote| &remote.name == name))
            .collect();

        let mut answer = self.describe(session, SdpType::Answer);
        answer.selected_codec = Some(codec);
        answer.channel_acks = acks;

        session.negotiated = Some(ConnectionInfo {
            remote_name: offer.friendly_name.clone(),
            remote_version: offer.version,
            render_config: negotiate_render(&offer.render_config, &self.config.render_config),
            remote_device_type: offer.device_type,
            codec_in_use: codec,
        });
        session.remote = Some(offer);
        debug!(connection = self.id, %codec, "Sending answer");
        self.signal(session, SignalingCall::SendSdp(answer.to_json()));
        session.local = Some(answer);

        self.apply_pending_candidates(session);
        self.send_local_candidates(session);
        self.maybe_connected(session);
        Ok(())
    }

    fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        let codec = answer
            .selected_codec
            .filter(|codec| self.supported_codecs.contains(codec))
            .ok_or_else(|| IsarError::config(ConfigIssue::Encoder, "answer selects no codec this side can encode"))?;
        let acked = |name: &str| answer.channel_acks.iter().any(|(acked, supported)| acked == name && *supported);
        let verdicts = self.consult_providers(|name| {
            acked(name).then(|| answer.channels.iter().find(|remote| remote.name == name).cloned()).flatten()
        });

        let mut guard = self.session.lock();
        let session = &mut *guard;
        if session.state != ConnectionState::Connecting || session.local.is_none() || session.remote.is_some() {
            return Err(IsarError::sdp_parse("answer without a pending offer"));
        }

        self.apply_channel_support(session, &verdicts);
        session.negotiated = Some(ConnectionInfo {
            remote_name: answer.friendly_name.clone(),
            remote_version: answer.version,
            render_config: negotiate_render(&self.local_render(session), &answer.render_config),
            remote_device_type: answer.device_type,
            codec_in_use: codec,
        });
        session.remote = Some(answer);

        self.apply_pending_candidates(session);
        self.maybe_connected(session);
        Ok(())
    }

    pub(crate) fn add_remote_candidate(&self, id: &str, line_index: i32, candidate: &str) -> Result<()> {
        let candidate = IceCandidate::new(id, line_index, candidate);
        candidate.parse()?;

        let mut session = self.session.lock();
        if !session.state.is_active() {
            debug!(connection = self.id, state = %session.state, "Remote candidate outside negotiation dropped");
            return Ok(());
        }
        if session.remote.is_none() {
            session.pending_candidates.push(candidate);
            return Ok(());
        }
        self.transport.add_remote_candidate(&candidate)
    }

    // Transport input
    // ---------------------------------------------------------------------

    fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                let mut guard = self.session.lock();
                let session = &mut *guard;
                if !session.state.is_active() {
                    debug!(connection = self.id, "Stale transport connectivity ignored");
                    return;
                }
                session.transport_connected = true;
                self.maybe_connected(session);
            }
            TransportEvent::Disconnected => {
                let mut guard = self.session.lock();
                let session = &mut *guard;
                if !session.transport_connected {
                    return;
                }
                info!(connection = self.id, "Remote peer disconnected");
                self.reset_session(session);
                self.transition(session, ConnectionState::Disconnected);
            }
            TransportEvent::Failed(reason) => {
                let mut guard = self.session.lock();
                let session = &mut *guard;
                warn!(connection = self.id, %reason, "Transport failed");
                if session.state.is_active() {
                    self.reset_session(session);
                    self.transition(session, ConnectionState::Failed);
                }
            }
            TransportEvent::Packet(packet) => self.on_packet(packet),
        }
    }

    fn on_packet(&self, packet: Packet) {
        self.counters.record_received(&packet);
        trace!(connection = self.id, kind = packet.kind(), "Packet received");
        match packet {
            Packet::VideoFrame(frame) => {
                if self.media.frames.put(frame) {
                    trace!(connection = self.id, "Unpulled frame replaced");
                }
            }
            Packet::CameraFrame { frame, metadata } => {
                self.media.camera_frames.put(CameraArrival { frame, metadata });
            }
            Packet::ViewPose(pose) => {
                self.media.predictor.lock().observe(pose);
                self.media.view_pose.put(pose);
                if !self.handlers.view_pose.is_empty() {
                    self.emit(Event::ViewPose(pose));
                }
            }
            Packet::SpatialInput(input) => {
                if !self.handlers.spatial_input.is_empty() {
                    self.emit(Event::SpatialInput(input.clone()));
                }
                if self.media.inputs.push(input) {
                    self.counters.inputs_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Packet::Haptic(haptic) => self.emit(Event::Haptic(haptic)),
            Packet::Audio(audio) => self.emit(Event::Audio(audio)),
            Packet::Microphone(audio) => self.emit(Event::Microphone(audio)),
            Packet::TrackEnabled { track: TrackKind::Microphone, enabled } => {
                self.session.lock().microphone_enabled = enabled;
                self.emit(Event::TrackEnabled(enabled));
            }
            Packet::TrackEnabled { track, enabled } => {
                debug!(connection = self.id, track = track.as_str(), enabled, "Remote track toggled");
            }
            Packet::CameraCapture { enabled, configuration, properties } => {
                self.session.lock().camera_capture = enabled.then_some(configuration);
                self.emit(Event::CameraCapture { enabled, configuration, properties });
            }
            Packet::Passthrough(enabled) => {
                self.session.lock().passthrough = enabled;
                debug!(connection = self.id, enabled, "Passthrough mode changed by server");
            }
            Packet::ChannelOpen { name } => self.on_channel_open(name),
            Packet::ChannelOpenAck { name } => self.on_channel_open_ack(&name),
            Packet::ChannelClose { name } => self.on_channel_close(&name),
            Packet::ChannelData { name, payload } => self.on_channel_data(&name, payload),
        }
    }

    // Data channels
    // ---------------------------------------------------------------------

    pub(crate) fn create_channel(
        &self,
        description: ChannelDescription,
        provider: Arc<dyn DataChannelProvider>,
    ) -> Result<()> {
        description.validate()?;
        let mut session = self.session.lock();
        let name = description.name.clone();
        if session.opened {
            return Err(IsarError::data_channel(name, ChannelFailure::Creation, "connection is already open"));
        }
        if session.channels.contains_key(&name) {
            return Err(IsarError::data_channel(name, ChannelFailure::AlreadyExists, "name already in use"));
        }
        debug!(connection = self.id, channel = %name, reliable = description.is_reliable(), "Data channel created");
        session.channels.insert(name, Channel::new(description, provider));
        Ok(())
    }

    pub(crate) fn open_channel(&self, name: &str) -> Result<()> {
        if self.role == Role::Client {
            return Err(IsarError::data_channel(name, ChannelFailure::Unsupported, "only the server opens channels"));
        }
        let mut guard = self.session.lock();
        let session = &mut *guard;
        if session.state != ConnectionState::Connected {
            return Err(IsarError::not_connected("open"));
        }
        let channel = session.channels.get_mut(name).ok_or_else(|| missing_channel(name))?;
        channel.ensure_openable()?;
        match channel.state {
            ChannelState::Opening | ChannelState::Open => return Ok(()),
            ChannelState::Closed => {
                return Err(IsarError::data_channel(name, ChannelFailure::Open, "channel was closed"));
            }
            ChannelState::Created => {}
        }
        self.transport
            .send(Packet::ChannelOpen { name: name.to_string() })
            .map_err(|err| IsarError::data_channel(name, ChannelFailure::Open, err.to_string()))?;
        channel.state = ChannelState::Opening;
        debug!(connection = self.id, channel = %name, "Data channel opening");
        Ok(())
    }

    pub(crate) fn push_channel_data(&self, name: &str, data: &[u8]) -> Result<()> {
        let session = self.session.lock();
        let channel = session.channels.get(name).ok_or_else(|| missing_channel(name))?;
        if !channel.is_connected() {
            return Err(IsarError::not_connected("push_data"));
        }
        channel.description.check_message(data.len())?;
        let packet = Packet::ChannelData { name: name.to_string(), payload: data.to_vec() };
        self.counters.record_sent(&packet);
        self.transport
            .send(packet)
            .map_err(|err| IsarError::data_channel(name, ChannelFailure::Send, err.to_string()))
    }

    pub(crate) fn close_channel(&self, name: &str) -> Result<()> {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        let channel = session.channels.get_mut(name).ok_or_else(|| missing_channel(name))?;
        if matches!(channel.state, ChannelState::Opening | ChannelState::Open) {
            if let Err(err) = self.transport.send(Packet::ChannelClose { name: name.to_string() }) {
                debug!(connection = self.id, channel = %name, error = %err, "Close notice not delivered");
            }
            if channel.reset() {
                session.channels_closed += 1;
                self.channel_event(name, channel, ChannelCall::ConnectedChanged(false));
            }
        }
        channel.state = ChannelState::Closed;
        Ok(())
    }

    pub(crate) fn remove_channel(&self, name: &str) -> Result<()> {
        self.close_channel(name)?;
        self.session.lock().channels.remove(name);
        debug!(connection = self.id, channel = %name, "Data channel destroyed");
        Ok(())
    }

    fn on_channel_open(&self, name: String) {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        match session.channels.get_mut(&name) {
            Some(channel) if channel.supported == Some(true) && channel.state != ChannelState::Closed => {
                if channel.is_connected() {
                    return;
                }
                if let Err(err) = self.transport.send(Packet::ChannelOpenAck { name: name.clone() }) {
                    warn!(connection = self.id, channel = %name, error = %err, "Open acknowledgement failed");
                    return;
                }
                channel.state = ChannelState::Open;
                session.channels_opened += 1;
                self.channel_event(&name, channel, ChannelCall::ConnectedChanged(true));
            }
            _ => {
                debug!(connection = self.id, channel = %name, "Refusing open of an unknown or unsupported channel");
                let _ = self.transport.send(Packet::ChannelClose { name });
            }
        }
    }

    fn on_channel_open_ack(&self, name: &str) {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        if let Some(channel) = session.channels.get_mut(name) {
            if channel.state == ChannelState::Opening {
                channel.state = ChannelState::Open;
                session.channels_opened += 1;
                self.channel_event(name, channel, ChannelCall::ConnectedChanged(true));
            }
        }
    }

    fn on_channel_close(&self, name: &str) {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        if let Some(channel) = session.channels.get_mut(name) {
            if channel.reset() {
                session.channels_closed += 1;
                self.channel_event(name, channel, ChannelCall::ConnectedChanged(false));
            }
        }
    }

    fn on_channel_data(&self, name: &str, payload: Vec<u8>) {
        let session = self.session.lock();
        match session.channels.get(name) {
            Some(channel) if channel.is_connected() => {
                self.channel_event(name, channel, ChannelCall::Data(payload));
            }
            _ => trace!(connection = self.id, channel = %name, "Data for a closed channel dropped"),
        }
    }

    // Sending
    // ---------------------------------------------------------------------

    fn send_media(&self, operation: &'static str, packet: Packet) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(IsarError::not_connected(operation));
        }
        self.counters.record_sent(&packet);
        self.transport.send(packet)
    }

    // Server media
    // ---------------------------------------------------------------------

    fn check_graphics(&self, graphics: &GraphicsApiConfig) -> Result<()> {
        if graphics.api_type() != self.graphics {
            return Err(IsarError::invalid_argument(
                "gfx_config",
                format!("{:?} track on a {:?} connection", graphics.api_type(), self.graphics),
            ));
        }
        Ok(())
    }

    pub(crate) fn init_video_track(&self, graphics: GraphicsApiConfig) -> Result<()> {
        let mut session = self.session.lock();
        if session.opened {
            return Err(IsarError::AlreadyConnected { state: session.state.to_string() });
        }
        self.check_graphics(&graphics)?;
        self.transport
            .add_track(TrackKind::Video)
            .map_err(|err| IsarError::track(TrackFailure::Video, err.to_string()))?;
        if !session.tracks.contains(&TrackKind::Video) {
            session.tracks.push(TrackKind::Video);
        }
        session.video_api = Some(graphics.api_type());
        debug!(connection = self.id, api = ?graphics.api_type(), "Video track initialized");
        Ok(())
    }

    pub(crate) fn push_frame(&self, frame: GraphicsApiFrame) -> Result<()> {
        let (bound, render) = {
            let session = self.session.lock();
            let render = session.negotiated.as_ref().map(|info| info.render_config);
            (session.video_api, render)
        };
        let Some(bound) = bound else {
            return Err(IsarError::track(TrackFailure::Video, "init_video_track was not called"));
        };
        let Some(render) = render.filter(|_| self.state() == ConnectionState::Connected) else {
            return Err(IsarError::not_connected("push_frame"));
        };
        if frame.payload.api_type() != bound {
            return Err(IsarError::invalid_argument(
                "frame",
                format!("{:?} frame on a {bound:?} track", frame.payload.api_type()),
            ));
        }

        self.media.predictor.lock().on_frame_pushed(frame.info.pose.frame_timestamp, Instant::now());
        let media = MediaFrame { frame, width: render.width, height: render.height, image: None };
        self.send_media("push_frame", Packet::VideoFrame(media))
    }

    pub(crate) fn set_camera_capture_enabled(
        &self,
        enabled: bool,
        configuration: CameraConfiguration,
        properties: CameraProperties,
    ) -> Result<()> {
        let mut session = self.session.lock();
        if session.state != ConnectionState::Connected {
            return Err(IsarError::not_connected("set_camera_capture_enabled"));
        }
        if !session.remote.as_ref().is_some_and(|remote| remote.camera) {
            return Err(IsarError::track(TrackFailure::VideoSource, "the client offers no camera track"));
        }
        self.send_media("set_camera_capture_enabled", Packet::CameraCapture { enabled, configuration, properties })?;
        session.camera_capture = enabled.then_some(configuration);
        debug!(connection = self.id, enabled, width = configuration.width, height = configuration.height, "Camera capture toggled");
        Ok(())
    }

    pub(crate) fn pull_camera_frame(&self) -> Result<CameraFrame> {
        let arrival = self.media.camera_frames.take().ok_or(IsarError::NoFrame)?;
        let pulled = CameraFrame {
            frame: arrival.frame.frame,
            metadata: arrival.metadata,
            width: arrival.frame.width,
            height: arrival.frame.height,
        };
        self.media.pulled_camera_frame.put(arrival.frame);
        Ok(pulled)
    }

    pub(crate) fn acquire_camera_cpu_image(&self, format: TextureFormat, out: &mut [u8]) -> Result<usize> {
        let frame = self.media.pulled_camera_frame.peek().ok_or(IsarError::NoFrame)?;
        let image = frame.image.ok_or(IsarError::NoFrame)?;
        image.convert_into(format, out)
    }

    pub(crate) fn set_audio_track_enabled(&self, enabled: bool) {
        self.session.lock().audio_enabled = enabled;
        debug!(connection = self.id, enabled, "Audio track toggled");
    }

    pub(crate) fn push_audio(&self, audio: AudioData<'_>) -> Result<()> {
        if !self.session.lock().audio_enabled {
            return Err(IsarError::track(TrackFailure::AudioNotInitialized, "the audio track is disabled"));
        }
        audio.validate()?;
        self.send_media("push_audio_data", Packet::Audio(audio.into_owned()))
    }

    pub(crate) fn set_microphone_capture_enabled(&self, enabled: bool) -> Result<()> {
        let mut session = self.session.lock();
        self.send_media(
            "set_microphone_capture_enabled",
            Packet::TrackEnabled { track: TrackKind::Microphone, enabled },
        )?;
        session.microphone_enabled = enabled;
        Ok(())
    }

    /// Starts an asynchronous stats collection; the report goes to the
    /// registered stats handlers.
    pub(crate) fn request_stats(self: &Arc<Self>) {
        let connection = Arc::downgrade(self);
        self.runtime.spawn(async move {
            if let Some(connection) = connection.upgrade() {
                connection.publish_stats();
            }
        });
    }

    pub(crate) fn stats_report(&self) -> StatsReport {
        let snapshot = {
            let session = self.session.lock();
            Snapshot {
                connection_id: self.id,
                role: self.role,
                state: session.state,
                codec: session.negotiated.as_ref().map(|info| info.codec_in_use),
                bitrate_kbps: session.bitrate_kbps,
                render_latency_us: self
                    .media
                    .predictor
                    .lock()
                    .render_latency()
                    .map(|latency| latency.as_micros() as u64),
                open_channels: session.channels_opened,
                closed_channels: session.channels_closed,
            }
        };
        stats::collect(&snapshot, &self.counters, self.transport.stats())
    }

    fn publish_stats(&self) {
        let report = self.stats_report();
        trace!(connection = self.id, entries = report.stats.len(), "Stats collected");
        self.emit(Event::Stats(Arc::new(report)));
    }

    pub(crate) fn set_bitrate(&self, kbps: i32) -> Result<()> {
        validate_bitrate(kbps)?;
        let mut guard = self.session.lock();
        let session = &mut *guard;
        session.bitrate_kbps = kbps;
        if let (Some(info), Some(remote)) = (&mut session.negotiated, &session.remote) {
            info.render_config.encoder_bitrate_kbps =
                if kbps > 0 { kbps } else { remote.render_config.encoder_bitrate_kbps };
        }
        self.transport.set_bitrate(kbps)?;
        debug!(connection = self.id, kbps, "Bitrate set");
        Ok(())
    }

    pub(crate) fn push_haptic(&self, haptic: Haptic<'_>) -> Result<()> {
        haptic.validate()?;
        self.send_media("push_haptic", Packet::Haptic(haptic.into_owned()))
    }

    pub(crate) fn camera_supported(&self) -> bool {
        self.session.lock().remote.as_ref().is_some_and(|remote| remote.camera)
    }

    pub(crate) fn pull_view_pose(&self) -> Result<XrPose> {
        let allowed = self
            .session
            .lock()
            .negotiated
            .as_ref()
            .is_some_and(|info| info.render_config.pose_prediction_enabled);
        self.media.pull_view_pose(allowed)
    }

    pub(crate) fn spatial_input_count(&self) -> usize {
        self.media.inputs.len()
    }

    pub(crate) fn pull_spatial_input(&self, capacity: usize) -> Result<Vec<SpatialInput>> {
        self.media.inputs.drain(capacity)
    }

    pub(crate) fn configure_pose_prediction(&self, config: PosePredictionConfig) -> Result<()> {
        config.validate()?;
        self.media.predictor.lock().configure(config);
        debug!(connection = self.id, ?config, "Pose prediction configured");
        Ok(())
    }

    pub(crate) fn try_set_passthrough(&self, enabled: bool) -> bool {
        let mut session = self.session.lock();
        let capable = session.state == ConnectionState::Connected
            && session.negotiated.as_ref().is_some_and(|info| info.remote_device_type.supports_passthrough());
        if !capable {
            debug!(connection = self.id, enabled, "Passthrough unavailable");
            return false;
        }
        if let Err(err) = self.send_media("try_set_passthrough_mode", Packet::Passthrough(enabled)) {
            debug!(connection = self.id, error = %err, "Passthrough request not delivered");
            return false;
        }
        session.passthrough = enabled;
        true
    }

    pub(crate) fn passthrough(&self) -> bool {
        self.session.lock().passthrough
    }

    // Client media
    // ---------------------------------------------------------------------

    pub(crate) fn pull_frame(&self) -> Result<GraphicsApiFrame> {
        let frame = self.media.frames.take().ok_or(IsarError::NoFrame)?;
        let pulled = frame.frame;
        self.media.pulled_frame.put(frame);
        Ok(pulled)
    }

    pub(crate) fn acquire_cpu_image(&self, format: TextureFormat, out: &mut [u8]) -> Result<usize> {
        if cfg!(target_vendor = "uwp") {
            return Err(IsarError::NoFrame);
        }
        let frame = self.media.pulled_frame.peek().ok_or(IsarError::NoFrame)?;
        let image = frame.image.ok_or(IsarError::NoFrame)?;
        image.convert_into(format, out)
    }

    pub(crate) fn init_camera_track(&self, graphics: GraphicsApiConfig) -> Result<()> {
        let mut session = self.session.lock();
        if session.opened {
            return Err(IsarError::AlreadyConnected { state: session.state.to_string() });
        }
        self.check_graphics(&graphics)?;
        self.transport
            .add_track(TrackKind::Camera)
            .map_err(|err| IsarError::track(TrackFailure::Video, err.to_string()))?;
        if !session.tracks.contains(&TrackKind::Camera) {
            session.tracks.push(TrackKind::Camera);
        }
        session.camera_api = Some(graphics.api_type());
        debug!(connection = self.id, api = ?graphics.api_type(), "Camera track initialized");
        Ok(())
    }

    pub(crate) fn push_camera_frame(&self, frame: GraphicsApiFrame, metadata: CameraMetadata) -> Result<()> {
        let (bound, capture) = {
            let session = self.session.lock();
            (session.camera_api, session.camera_capture)
        };
        let Some(bound) = bound else {
            return Err(IsarError::track(TrackFailure::Video, "init_camera_track was not called"));
        };
        if self.state() != ConnectionState::Connected {
            return Err(IsarError::not_connected("push_camera_frame"));
        }
        let Some(capture) = capture else {
            return Err(IsarError::track(TrackFailure::VideoSource, "camera capture is disabled"));
        };
        if frame.payload.api_type() != bound {
            return Err(IsarError::invalid_argument(
                "frame",
                format!("{:?} frame on a {bound:?} track", frame.payload.api_type()),
            ));
        }
        let media = MediaFrame { frame, width: capture.width, height: capture.height, image: None };
        self.send_media("push_camera_frame", Packet::CameraFrame { frame: media, metadata })
    }

    pub(crate) fn push_view_pose(&self, pose: &XrPose) -> Result<()> {
        if !pose.is_finite() {
            return Err(IsarError::invalid_argument("pose", "non-finite pose"));
        }
        self.send_media("push_view_pose", Packet::ViewPose(*pose))
    }

    pub(crate) fn push_spatial_input(&self, input: &SpatialInput) -> Result<()> {
        input.validate()?;
        self.send_media("push_spatial_input", Packet::SpatialInput(input.clone()))
    }

    pub(crate) fn push_microphone_audio(&self, audio: AudioData<'_>) -> Result<()> {
        if !self.session.lock().microphone_enabled {
            return Err(IsarError::track(TrackFailure::AudioNotInitialized, "the server has not enabled the microphone"));
        }
        audio.validate()?;
        self.send_media("push_microphone_audio", Packet::Microphone(audio.into_owned()))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        debug!(connection = self.id, "Connection dropped");
    }
}

fn missing_channel(name: &str) -> IsarError {
    IsarError::data_channel(name, ChannelFailure::InvalidConnection, "channel is not registered on its connection")
}

async fn ingest_task(
    connection: Weak<Connection>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(connection) = connection.upgrade() else {
            break;
        };
        connection.on_transport_event(event);
    }
    trace!("Ingest task ended");
}

async fn stats_collector_task(connection: Weak<Connection>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let Some(connection) = connection.upgrade() else {
            break;
        };
        if connection.state() == ConnectionState::Connected {
            connection.publish_stats();
        }
    }
    trace!("Stats collector ended");
}
