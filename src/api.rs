//! The function tables of the core as Rust traits.
//!
//! [`IsarServer`] and [`IsarClient`] borrow an [`Isar`](crate::Isar) context
//! and resolve every handle through its registry. Handles of the other role
//! are rejected with `InvalidHandle`.

use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;

use crate::config::Config;
use crate::connection::{
    AudioHandler, CameraCaptureHandler, CameraFrame, Connection, ConnectionHandle, ConnectionInfo, HandlerId,
    HapticHandler, SpatialInputHandler, StateHandler, StatsHandler, TrackEnabledHandler, ViewPoseHandler,
};
use crate::data_channel::{ChannelDescription, DataChannelApi, DataChannelHandle, DataChannelProvider};
use crate::engine::Engine;
use crate::prediction::PosePredictionConfig;
use crate::signaling::{SignalingApi, SignalingHandle, SignalingProvider};
use crate::stats::StatsReport;
use crate::{
    AudioData, CameraConfiguration, CameraMetadata, CameraProperties, ConnectionState, GraphicsApiConfig,
    GraphicsApiFrame, Haptic, LegacyXrPose, Result, Role, SpatialInput, TextureFormat, Version, XrPose,
};

/// Lifecycle operations shared by both roles (`IsarConnectionApi`).
pub trait ConnectionApi {
    fn version(&self) -> Version;

    fn create_connection(&self, config: &Config, graphics: GraphicsApiConfig) -> Result<ConnectionHandle>;

    /// Starts signaling; CONNECTING follows once the signaling channel is up.
    fn open_connection(&self, connection: ConnectionHandle) -> Result<()>;

    fn close_connection(&self, connection: ConnectionHandle) -> Result<()>;

    /// Closes and releases the connection, leaving `None` behind.
    fn destroy_connection(&self, connection: &mut Option<ConnectionHandle>) -> Result<()>;

    /// The handler first receives the current state, then every transition.
    fn register_connection_state_handler(
        &self,
        connection: ConnectionHandle,
        handler: StateHandler,
    ) -> Result<HandlerId>;

    fn unregister_connection_state_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()>;

    /// Fails with `NotConnected` outside CONNECTED.
    fn get_connection_info(&self, connection: ConnectionHandle) -> Result<ConnectionInfo>;

    fn connection_state(&self, connection: ConnectionHandle) -> Result<ConnectionState>;

    fn state_updates(&self, connection: ConnectionHandle) -> Result<WatchStream<ConnectionState>>;
}

/// Server table (`IsarServerApi`).
pub trait ServerApi: ConnectionApi {
    /// Must precede `open_connection`.
    fn init_video_track(&self, connection: ConnectionHandle, graphics: GraphicsApiConfig) -> Result<()>;

    fn push_frame(&self, connection: ConnectionHandle, frame: GraphicsApiFrame) -> Result<()>;

    fn set_camera_capture_enabled(
        &self,
        connection: ConnectionHandle,
        enabled: bool,
        configuration: CameraConfiguration,
        properties: CameraProperties,
    ) -> Result<()>;

    fn pull_camera_capture_frame(&self, connection: ConnectionHandle) -> Result<CameraFrame>;

    /// Converts the last pulled camera frame into `out`; returns the bytes written.
    fn acquire_camera_cpu_image(
        &self,
        connection: ConnectionHandle,
        format: TextureFormat,
        out: &mut [u8],
    ) -> Result<usize>;

    fn camera_supported(&self, connection: ConnectionHandle) -> Result<bool>;

    fn set_audio_track_enabled(&self, connection: ConnectionHandle, enabled: bool) -> Result<()>;

    fn push_audio_data(&self, connection: ConnectionHandle, audio: AudioData<'_>) -> Result<()>;

    fn set_microphone_capture_enabled(&self, connection: ConnectionHandle, enabled: bool) -> Result<()>;

    fn register_microphone_capture_handler(
        &self,
        connection: ConnectionHandle,
        handler: AudioHandler,
    ) -> Result<HandlerId>;

    fn unregister_microphone_capture_handler(&self, connection: ConnectionHandle, handler: HandlerId)
    -> Result<()>;

    /// Collects stats in the background and hands them to the stats handlers.
    fn get_stats(&self, connection: ConnectionHandle) -> Result<()>;

    /// Collects stats synchronously.
    fn stats_report(&self, connection: ConnectionHandle) -> Result<StatsReport>;

    fn register_stats_handler(&self, connection: ConnectionHandle, handler: StatsHandler) -> Result<HandlerId>;

    fn unregister_stats_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()>;

    /// `-1` lets the client decide.
    fn set_bitrate(&self, connection: ConnectionHandle, kbps: i32) -> Result<()>;

    fn push_haptic(&self, connection: ConnectionHandle, haptic: Haptic<'_>) -> Result<()>;

    fn pull_view_pose(&self, connection: ConnectionHandle) -> Result<XrPose>;

    #[deprecated(note = "poll with pull_view_pose")]
    fn register_view_pose_handler(&self, connection: ConnectionHandle, handler: ViewPoseHandler)
    -> Result<HandlerId>;

    #[deprecated(note = "poll with pull_view_pose")]
    fn unregister_view_pose_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()>;

    /// Events waiting for `pull_spatial_input`.
    fn spatial_input_count(&self, connection: ConnectionHandle) -> Result<usize>;

    /// Takes up to `capacity` events, oldest first.
    fn pull_spatial_input(&self, connection: ConnectionHandle, capacity: usize) -> Result<Vec<SpatialInput>>;

    #[deprecated(note = "poll with pull_spatial_input")]
    fn register_spatial_input_handler(
        &self,
        connection: ConnectionHandle,
        handler: SpatialInputHandler,
    ) -> Result<HandlerId>;

    #[deprecated(note = "poll with pull_spatial_input")]
    fn unregister_spatial_input_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()>;

    fn configure_pose_prediction(&self, connection: ConnectionHandle, config: PosePredictionConfig) -> Result<()>;

    /// Returns false unless CONNECTED to a device that can show passthrough.
    fn try_set_passthrough_mode(&self, connection: ConnectionHandle, enabled: bool) -> Result<bool>;

    fn get_passthrough_mode(&self, connection: ConnectionHandle) -> Result<bool>;
}

/// Client table (`IsarClientApi`).
pub trait ClientApi: ConnectionApi {
    fn pull_frame(&self, connection: ConnectionHandle) -> Result<GraphicsApiFrame>;

    /// Converts the last pulled frame into `out`; returns the bytes written.
    fn acquire_cpu_image(&self, connection: ConnectionHandle, format: TextureFormat, out: &mut [u8])
    -> Result<usize>;

    /// Must precede `open_connection`.
    fn init_camera_track(&self, connection: ConnectionHandle, graphics: GraphicsApiConfig) -> Result<()>;

    fn push_camera_frame(
        &self,
        connection: ConnectionHandle,
        frame: GraphicsApiFrame,
        metadata: CameraMetadata,
    ) -> Result<()>;

    fn register_camera_capture_enabled_handler(
        &self,
        connection: ConnectionHandle,
        handler: CameraCaptureHandler,
    ) -> Result<HandlerId>;

    fn unregister_camera_capture_enabled_handler(
        &self,
        connection: ConnectionHandle,
        handler: HandlerId,
    ) -> Result<()>;

    fn push_view_pose(&self, connection: ConnectionHandle, pose: &XrPose) -> Result<()>;

    #[deprecated(note = "use push_view_pose")]
    fn push_legacy_view_pose(&self, connection: ConnectionHandle, pose: &LegacyXrPose) -> Result<()>;

    fn push_spatial_input(&self, connection: ConnectionHandle, input: &SpatialInput) -> Result<()>;

    fn register_audio_handler(&self, connection: ConnectionHandle, handler: AudioHandler) -> Result<HandlerId>;

    fn unregister_audio_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()>;

    /// Told when the server toggles microphone capture.
    fn register_microphone_enabled_handler(
        &self,
        connection: ConnectionHandle,
        handler: TrackEnabledHandler,
    ) -> Result<HandlerId>;

    fn unregister_microphone_enabled_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()>;

    fn push_microphone_audio(&self, connection: ConnectionHandle, audio: AudioData<'_>) -> Result<()>;

    fn register_haptic_handler(&self, connection: ConnectionHandle, handler: HapticHandler) -> Result<HandlerId>;

    fn unregister_haptic_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()>;

    fn get_passthrough_mode(&self, connection: ConnectionHandle) -> Result<bool>;
}

/// Server side view of an [`Isar`](crate::Isar) context.
#[derive(Clone, Copy)]
pub struct IsarServer<'a> {
    engine: &'a Engine,
}

/// Client side view of an [`Isar`](crate::Isar) context.
#[derive(Clone, Copy)]
pub struct IsarClient<'a> {
    engine: &'a Engine,
}

macro_rules! connection_api {
    ($api:ident, $role:expr) => {
        impl<'a> $api<'a> {
            pub(crate) fn new(engine: &'a Engine) -> Self {
                Self { engine }
            }

            fn get(&self, connection: ConnectionHandle) -> Result<Arc<Connection>> {
                self.engine.connection(connection, $role)
            }
        }

        impl ConnectionApi for $api<'_> {
            fn version(&self) -> Version {
                Version::LATEST
            }

            fn create_connection(&self, config: &Config, graphics: GraphicsApiConfig) -> Result<ConnectionHandle> {
                self.engine.create_connection($role, config, graphics)
            }

            fn open_connection(&self, connection: ConnectionHandle) -> Result<()> {
                self.get(connection)?.open()
            }

            fn close_connection(&self, connection: ConnectionHandle) -> Result<()> {
                self.get(connection)?.close()
            }

            fn destroy_connection(&self, connection: &mut Option<ConnectionHandle>) -> Result<()> {
                self.engine.destroy_connection(connection, $role)
            }

            fn register_connection_state_handler(
                &self,
                connection: ConnectionHandle,
                handler: StateHandler,
            ) -> Result<HandlerId> {
                Ok(self.get(connection)?.register_state_handler(handler))
            }

            fn unregister_connection_state_handler(
                &self,
                connection: ConnectionHandle,
                handler: HandlerId,
            ) -> Result<()> {
                self.get(connection)?.handlers().state.remove(handler);
                Ok(())
            }

            fn get_connection_info(&self, connection: ConnectionHandle) -> Result<ConnectionInfo> {
                self.get(connection)?.connection_info()
            }

            fn connection_state(&self, connection: ConnectionHandle) -> Result<ConnectionState> {
                Ok(self.get(connection)?.state())
            }

            fn state_updates(&self, connection: ConnectionHandle) -> Result<WatchStream<ConnectionState>> {
                Ok(self.get(connection)?.state_updates())
            }
        }
    };
}

connection_api!(IsarServer, Role::Server);
connection_api!(IsarClient, Role::Client);

/// Registers `$handler` in the `$registry` of a connection.
macro_rules! register {
    ($connection:expr, $registry:ident, $handler:expr) => {{
        let connection = $connection;
        let handlers = connection.handlers();
        Ok(handlers.add(&handlers.$registry, $handler))
    }};
}

/// Removes a registration; unknown ids are ignored.
macro_rules! unregister {
    ($connection:expr, $registry:ident, $handler:expr) => {{
        $connection.handlers().$registry.remove($handler);
        Ok(())
    }};
}

impl ServerApi for IsarServer<'_> {
    fn init_video_track(&self, connection: ConnectionHandle, graphics: GraphicsApiConfig) -> Result<()> {
        self.get(connection)?.init_video_track(graphics)
    }

    fn push_frame(&self, connection: ConnectionHandle, frame: GraphicsApiFrame) -> Result<()> {
        self.get(connection)?.push_frame(frame)
    }

    fn set_camera_capture_enabled(
        &self,
        connection: ConnectionHandle,
        enabled: bool,
        configuration: CameraConfiguration,
        properties: CameraProperties,
    ) -> Result<()> {
        self.get(connection)?.set_camera_capture_enabled(enabled, configuration, properties)
    }

    fn pull_camera_capture_frame(&self, connection: ConnectionHandle) -> Result<CameraFrame> {
        self.get(connection)?.pull_camera_frame()
    }

    fn acquire_camera_cpu_image(
        &self,
        connection: ConnectionHandle,
        format: TextureFormat,
        out: &mut [u8],
    ) -> Result<usize> {
        self.get(connection)?.acquire_camera_cpu_image(format, out)
    }

    fn camera_supported(&self, connection: ConnectionHandle) -> Result<bool> {
        Ok(self.get(connection)?.camera_supported())
    }

    fn set_audio_track_enabled(&self, connection: ConnectionHandle, enabled: bool) -> Result<()> {
        self.get(connection)?.set_audio_track_enabled(enabled);
        Ok(())
    }

    fn push_audio_data(&self, connection: ConnectionHandle, audio: AudioData<'_>) -> Result<()> {
        self.get(connection)?.push_audio(audio)
    }

    fn set_microphone_capture_enabled(&self, connection: ConnectionHandle, enabled: bool) -> Result<()> {
        self.get(connection)?.set_microphone_capture_enabled(enabled)
    }

    fn register_microphone_capture_handler(
        &self,
        connection: ConnectionHandle,
        handler: AudioHandler,
    ) -> Result<HandlerId> {
        register!(self.get(connection)?, microphone, handler)
    }

    fn unregister_microphone_capture_handler(
        &self,
        connection: ConnectionHandle,
        handler: HandlerId,
    ) -> Result<()> {
        unregister!(self.get(connection)?, microphone, handler)
    }

    fn get_stats(&self, connection: ConnectionHandle) -> Result<()> {
        self.get(connection)?.request_stats();
        Ok(())
    }

    fn stats_report(&self, connection: ConnectionHandle) -> Result<StatsReport> {
        Ok(self.get(connection)?.stats_report())
    }

    fn register_stats_handler(&self, connection: ConnectionHandle, handler: StatsHandler) -> Result<HandlerId> {
        register!(self.get(connection)?, stats, handler)
    }

    fn unregister_stats_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()> {
        unregister!(self.get(connection)?, stats, handler)
    }

    fn set_bitrate(&self, connection: ConnectionHandle, kbps: i32) -> Result<()> {
        self.get(connection)?.set_bitrate(kbps)
    }

    fn push_haptic(&self, connection: ConnectionHandle, haptic: Haptic<'_>) -> Result<()> {
        self.get(connection)?.push_haptic(haptic)
    }

    fn pull_view_pose(&self, connection: ConnectionHandle) -> Result<XrPose> {
        self.get(connection)?.pull_view_pose()
    }

    fn register_view_pose_handler(
        &self,
        connection: ConnectionHandle,
        handler: ViewPoseHandler,
    ) -> Result<HandlerId> {
        register!(self.get(connection)?, view_pose, handler)
    }

    fn unregister_view_pose_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()> {
        unregister!(self.get(connection)?, view_pose, handler)
    }

    fn spatial_input_count(&self, connection: ConnectionHandle) -> Result<usize> {
        Ok(self.get(connection)?.spatial_input_count())
    }

    fn pull_spatial_input(&self, connection: ConnectionHandle, capacity: usize) -> Result<Vec<SpatialInput>> {
        self.get(connection)?.pull_spatial_input(capacity)
    }

    fn register_spatial_input_handler(
        &self,
        connection: ConnectionHandle,
        handler: SpatialInputHandler,
    ) -> Result<HandlerId> {
        register!(self.get(connection)?, spatial_input, handler)
    }

    fn unregister_spatial_input_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()> {
        unregister!(self.get(connection)?, spatial_input, handler)
    }

    fn configure_pose_prediction(&self, connection: ConnectionHandle, config: PosePredictionConfig) -> Result<()> {
        self.get(connection)?.configure_pose_prediction(config)
    }

    fn try_set_passthrough_mode(&self, connection: ConnectionHandle, enabled: bool) -> Result<bool> {
        Ok(self.get(connection)?.try_set_passthrough(enabled))
    }

    fn get_passthrough_mode(&self, connection: ConnectionHandle) -> Result<bool> {
        Ok(self.get(connection)?.passthrough())
    }
}

impl ClientApi for IsarClient<'_> {
    fn pull_frame(&self, connection: ConnectionHandle) -> Result<GraphicsApiFrame> {
        self.get(connection)?.pull_frame()
    }

    fn acquire_cpu_image(
        &self,
        connection: ConnectionHandle,
        format: TextureFormat,
        out: &mut [u8],
    ) -> Result<usize> {
        self.get(connection)?.acquire_cpu_image(format, out)
    }

    fn init_camera_track(&self, connection: ConnectionHandle, graphics: GraphicsApiConfig) -> Result<()> {
        self.get(connection)?.init_camera_track(graphics)
    }

    fn push_camera_frame(
        &self,
        connection: ConnectionHandle,
        frame: GraphicsApiFrame,
        metadata: CameraMetadata,
    ) -> Result<()> {
        self.get(connection)?.push_camera_frame(frame, metadata)
    }

    fn register_camera_capture_enabled_handler(
        &self,
        connection: ConnectionHandle,
        handler: CameraCaptureHandler,
    ) -> Result<HandlerId> {
        register!(self.get(connection)?, camera_capture, handler)
    }

    fn unregister_camera_capture_enabled_handler(
        &self,
        connection: ConnectionHandle,
        handler: HandlerId,
    ) -> Result<()> {
        unregister!(self.get(connection)?, camera_capture, handler)
    }

    fn push_view_pose(&self, connection: ConnectionHandle, pose: &XrPose) -> Result<()> {
        self.get(connection)?.push_view_pose(pose)
    }

    fn push_legacy_view_pose(&self, connection: ConnectionHandle, pose: &LegacyXrPose) -> Result<()> {
        self.get(connection)?.push_view_pose(&pose.to_xr_pose())
    }

    fn push_spatial_input(&self, connection: ConnectionHandle, input: &SpatialInput) -> Result<()> {
        self.get(connection)?.push_spatial_input(input)
    }

    fn register_audio_handler(&self, connection: ConnectionHandle, handler: AudioHandler) -> Result<HandlerId> {
        register!(self.get(connection)?, audio, handler)
    }

    fn unregister_audio_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()> {
        unregister!(self.get(connection)?, audio, handler)
    }

    fn register_microphone_enabled_handler(
        &self,
        connection: ConnectionHandle,
        handler: TrackEnabledHandler,
    ) -> Result<HandlerId> {
        register!(self.get(connection)?, track_enabled, handler)
    }

    fn unregister_microphone_enabled_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()> {
        unregister!(self.get(connection)?, track_enabled, handler)
    }

    fn push_microphone_audio(&self, connection: ConnectionHandle, audio: AudioData<'_>) -> Result<()> {
        self.get(connection)?.push_microphone_audio(audio)
    }

    fn register_haptic_handler(&self, connection: ConnectionHandle, handler: HapticHandler) -> Result<HandlerId> {
        register!(self.get(connection)?, haptic, handler)
    }

    fn unregister_haptic_handler(&self, connection: ConnectionHandle, handler: HandlerId) -> Result<()> {
        unregister!(self.get(connection)?, haptic, handler)
    }

    fn get_passthrough_mode(&self, connection: ConnectionHandle) -> Result<bool> {
        Ok(self.get(connection)?.passthrough())
    }
}

/// Data channel view of an [`Isar`](crate::Isar) context.
#[derive(Clone, Copy)]
pub struct IsarDataChannels<'a> {
    engine: &'a Engine,
}

impl<'a> IsarDataChannels<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }
}

impl DataChannelApi for IsarDataChannels<'_> {
    fn version(&self) -> Version {
        Version::LATEST
    }

    fn create(
        &self,
        connection: ConnectionHandle,
        description: ChannelDescription,
        provider: Arc<dyn DataChannelProvider>,
    ) -> Result<DataChannelHandle> {
        self.engine.create_channel(connection, description, provider)
    }

    fn open(&self, channel: DataChannelHandle) -> Result<()> {
        let (connection, name) = self.engine.channel(channel)?;
        connection.open_channel(&name)
    }

    fn push_data(&self, channel: DataChannelHandle, data: &[u8]) -> Result<()> {
        let (connection, name) = self.engine.channel(channel)?;
        connection.push_channel_data(&name, data)
    }

    fn close(&self, channel: DataChannelHandle) -> Result<()> {
        let (connection, name) = self.engine.channel(channel)?;
        connection.close_channel(&name)
    }

    fn destroy(&self, channel: &mut Option<DataChannelHandle>) -> Result<()> {
        self.engine.destroy_channel(channel)
    }
}

/// Signaling view of an [`Isar`](crate::Isar) context.
#[derive(Clone, Copy)]
pub struct IsarSignaling<'a> {
    engine: &'a Engine,
}

impl<'a> IsarSignaling<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }
}

impl SignalingApi for IsarSignaling<'_> {
    fn version(&self) -> Version {
        Version::LATEST
    }

    fn register_provider(
        &self,
        connection: ConnectionHandle,
        provider: Arc<dyn SignalingProvider>,
    ) -> Result<SignalingHandle> {
        self.engine.register_signaling(connection, provider)
    }

    fn set_remote_sdp(&self, signaling: SignalingHandle, sdp: &str) -> Result<()> {
        self.engine.signaling_target(signaling)?.set_remote_sdp(sdp)
    }

    fn set_remote_ice_candidate(
        &self,
        signaling: SignalingHandle,
        id: &str,
        line_index: i32,
        candidate: &str,
    ) -> Result<()> {
        self.engine.signaling_target(signaling)?.add_remote_candidate(id, line_index, candidate)
    }

    fn set_connection_state(&self, signaling: SignalingHandle, connected: bool) -> Result<()> {
        self.engine.signaling_target(signaling)?.set_signaling_connected(connected);
        Ok(())
    }
}
