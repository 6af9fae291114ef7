//! Handler registries and the dispatch task.
//!
//! Every host callback runs on the connection's dispatch task. Events are
//! queued on an unbounded channel while internal locks are held and delivered
//! after those locks are released, in the order they were queued.

use parking_lot::Mutex;
use std::fmt;
use std::net::Ipv4Addr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::data_channel::DataChannelProvider;
use crate::signaling::SignalingProvider;
use crate::stats::StatsReport;
use crate::transport::IceCandidate;
use crate::{
    AudioData, CameraConfiguration, CameraProperties, ConnectionState, Haptic, SpatialInput, XrPose,
};

pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type ViewPoseHandler = Arc<dyn Fn(&XrPose) + Send + Sync>;
pub type SpatialInputHandler = Arc<dyn Fn(&SpatialInput) + Send + Sync>;
pub type AudioHandler = Arc<dyn Fn(&AudioData<'_>) + Send + Sync>;
pub type StatsHandler = Arc<dyn Fn(&StatsReport) + Send + Sync>;
pub type CameraCaptureHandler = Arc<dyn Fn(bool, &CameraConfiguration, &CameraProperties) + Send + Sync>;
pub type TrackEnabledHandler = Arc<dyn Fn(bool) + Send + Sync>;
pub type HapticHandler = Arc<dyn Fn(&Haptic<'_>) + Send + Sync>;

/// Identifies one registration; pass it back to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

struct Entry<F: ?Sized> {
    id: HandlerId,
    /// State sequence number at registration; earlier transitions are skipped.
    since: u64,
    handler: Arc<F>,
}

pub(crate) struct Registry<F: ?Sized> {
    entries: Mutex<Vec<Entry<F>>>,
}

impl<F: ?Sized> Default for Registry<F> {
    fn default() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }
}

impl<F: ?Sized> Registry<F> {
    fn insert(&self, id: HandlerId, since: u64, handler: Arc<F>) {
        self.entries.lock().push(Entry { id, since, handler });
    }

    /// Returns false if `id` was not registered here.
    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Handlers registered before transition `seq` was queued.
    fn snapshot_before(&self, seq: u64) -> Vec<Arc<F>> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.since < seq)
            .map(|entry| entry.handler.clone())
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<F>> {
        self.snapshot_before(u64::MAX)
    }

    fn find(&self, id: HandlerId) -> Option<Arc<F>> {
        self.entries.lock().iter().find(|entry| entry.id == id).map(|entry| entry.handler.clone())
    }
}

/// Every callback registry of one connection.
#[derive(Default)]
pub(crate) struct Handlers {
    next_id: AtomicU64,
    pub state: Registry<dyn Fn(ConnectionState) + Send + Sync>,
    pub view_pose: Registry<dyn Fn(&XrPose) + Send + Sync>,
    pub spatial_input: Registry<dyn Fn(&SpatialInput) + Send + Sync>,
    pub audio: Registry<dyn Fn(&AudioData<'_>) + Send + Sync>,
    pub microphone: Registry<dyn Fn(&AudioData<'_>) + Send + Sync>,
    pub stats: Registry<dyn Fn(&StatsReport) + Send + Sync>,
    pub camera_capture: Registry<dyn Fn(bool, &CameraConfiguration, &CameraProperties) + Send + Sync>,
    pub track_enabled: Registry<dyn Fn(bool) + Send + Sync>,
    pub haptic: Registry<dyn Fn(&Haptic<'_>) + Send + Sync>,
}

impl Handlers {
    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Adds a handler that sees transitions after `since`.
    pub(crate) fn add_state(&self, since: u64, handler: StateHandler) -> HandlerId {
        let id = self.next_id();
        self.state.insert(id, since, handler);
        id
    }

    pub(crate) fn add<F: ?Sized>(&self, registry: &Registry<F>, handler: Arc<F>) -> HandlerId {
        let id = self.next_id();
        registry.insert(id, 0, handler);
        id
    }
}

/// A call to the signaling provider.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SignalingCall {
    Start(Ipv4Addr, u32),
    Stop,
    ConnectionChanged(ConnectionState),
    SendSdp(String),
    SendIceCandidate(IceCandidate),
}

/// A call to a data channel provider.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChannelCall {
    SupportedChanged(bool),
    ConnectedChanged(bool),
    Data(Vec<u8>),
}

pub(crate) enum Event {
    State { seq: u64, state: ConnectionState },
    InitialState { handler: HandlerId, state: ConnectionState },
    Signaling { provider: Arc<dyn SignalingProvider>, call: SignalingCall },
    Channel { name: String, provider: Arc<dyn DataChannelProvider>, call: ChannelCall },
    ViewPose(XrPose),
    SpatialInput(SpatialInput),
    Audio(AudioData<'static>),
    Microphone(AudioData<'static>),
    CameraCapture { enabled: bool, configuration: CameraConfiguration, properties: CameraProperties },
    TrackEnabled(bool),
    Haptic(Haptic<'static>),
    Stats(Arc<StatsReport>),
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::State { .. } => "state",
            Event::InitialState { .. } => "initial-state",
            Event::Signaling { .. } => "signaling",
            Event::Channel { .. } => "channel",
            Event::ViewPose(_) => "view-pose",
            Event::SpatialInput(_) => "spatial-input",
            Event::Audio(_) => "audio",
            Event::Microphone(_) => "microphone",
            Event::CameraCapture { .. } => "camera-capture",
            Event::TrackEnabled(_) => "track-enabled",
            Event::Haptic(_) => "haptic",
            Event::Stats(_) => "stats",
        }
    }
}

/// Runs one host callback, containing any panic it raises.
fn invoke(connection: u64, event: &'static str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!(connection, event, "Host callback panicked");
    }
}

/// Delivers queued events until every sender is gone.
pub(crate) async fn dispatch_task(
    connection: u64,
    handlers: Arc<Handlers>,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    debug!(connection, "Dispatch task started");
    let mut delivered = 0u64;
    while let Some(event) = events.recv().await {
        delivered += 1;
        deliver(connection, &handlers, event);
    }
    debug!(connection, delivered, "Dispatch task ended");
}

fn deliver(connection: u64, handlers: &Handlers, event: Event) {
    let name = event.name();
    trace!(connection, event = name, "Dispatching");
    match event {
        Event::State { seq, state } => {
            for handler in handlers.state.snapshot_before(seq) {
                invoke(connection, name, || handler(state));
            }
        }
        Event::InitialState { handler, state } => {
            if let Some(handler) = handlers.state.find(handler) {
                invoke(connection, name, || handler(state));
            }
        }
        Event::Signaling { provider, call } => invoke(connection, name, || match call {
            SignalingCall::Start(ip, port) => provider.start(ip, port),
            SignalingCall::Stop => provider.stop(),
            SignalingCall::ConnectionChanged(state) => provider.connection_changed(state),
            SignalingCall::SendSdp(sdp) => provider.send_sdp(&sdp),
            SignalingCall::SendIceCandidate(candidate) => {
                provider.send_ice_candidate(&candidate.sdp_mid, candidate.sdp_mline_index, &candidate.candidate)
            }
        }),
        Event::Channel { name: channel, provider, call } => {
            trace!(connection, channel = %channel, ?call, "Channel callback");
            invoke(connection, name, || match call {
                ChannelCall::SupportedChanged(supported) => provider.on_supported_changed(supported),
                ChannelCall::ConnectedChanged(connected) => provider.on_connected_changed(connected),
                ChannelCall::Data(data) => provider.on_data_received(&data),
            })
        }
        Event::ViewPose(pose) => {
            for handler in handlers.view_pose.snapshot() {
                invoke(connection, name, || handler(&pose));
            }
        }
        Event::SpatialInput(input) => {
            for handler in handlers.spatial_input.snapshot() {
                invoke(connection, name, || handler(&input));
            }
        }
        Event::Audio(audio) => {
            for handler in handlers.audio.snapshot() {
                invoke(connection, name, || handler(&audio));
            }
        }
        Event::Microphone(audio) => {
            for handler in handlers.microphone.snapshot() {
                invoke(connection, name, || handler(&audio));
            }
        }
        Event::CameraCapture { enabled, configuration, properties } => {
            for handler in handlers.camera_capture.snapshot() {
                invoke(connection, name, || handler(enabled, &configuration, &properties));
            }
        }
        Event::TrackEnabled(enabled) => {
            for handler in handlers.track_enabled.snapshot() {
                invoke(connection, name, || handler(enabled));
            }
        }
        Event::Haptic(haptic) => {
            for handler in handlers.haptic.snapshot() {
                invoke(connection, name, || handler(&haptic));
            }
        }
        Event::Stats(report) => {
            for handler in handlers.stats.snapshot() {
                invoke(connection, name, || handler(&report));
            }
        }
    }
}
