//! `IsarServerApi`.

#![allow(deprecated)]

use std::ffi::c_void;
use std::sync::Arc;

use super::stats::with_report_view;
use super::{
    IsarAudioData, IsarCameraMetadata, IsarCameraProperties, IsarConnection, IsarConnectionInfo,
    IsarConnectionStateCallback, IsarGraphicsApiConfig, IsarGraphicsApiFrame, IsarHaptic, IsarPosePredictionConfig,
    IsarSpatialInput, UserData, callback, connection_handle, context, guard, guard_bool, guard_void, input,
    lifecycle_functions, output, register_callback, unregister_callback,
};
use crate::api::{ConnectionApi, ServerApi};
use crate::connection::ConnectionHandle;
use crate::stats::StatsReport;
use crate::{AudioData, CameraConfiguration, ErrorCode, IsarError, Result, SpatialInput, TextureFormat, XrPose};

/// `void (*)(const IsarXrPose* pose, void* userData)`
pub type IsarViewPoseReceivedCallback = unsafe extern "C" fn(pose: *const XrPose, user_data: *mut c_void);
/// `void (*)(const IsarSpatialInput* input, void* userData)`
pub type IsarSpatialInputReceivedCallback =
    unsafe extern "C" fn(input: *const IsarSpatialInput, user_data: *mut c_void);
/// `void (*)(const IsarAudioData* audio, void* userData)`
pub type IsarServerAudioDataReceivedCallback =
    unsafe extern "C" fn(audio: *const IsarAudioData, user_data: *mut c_void);
/// `void (*)(const void* statsData, void* userData)`; read the report with the `Isar_Stats_*` functions.
pub type IsarServerStatsCallback = unsafe extern "C" fn(stats: *const c_void, user_data: *mut c_void);

type Register<F> = unsafe extern "C" fn(IsarConnection, Option<F>, *mut c_void);

/// The server function table.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IsarServerApi {
    pub version: u32,
    pub create_connection: unsafe extern "C" fn(
        *const super::IsarConfig,
        IsarGraphicsApiConfig,
        *mut IsarConnection,
    ) -> ErrorCode,
    pub open_connection: extern "C" fn(IsarConnection) -> ErrorCode,
    pub close_connection: extern "C" fn(IsarConnection) -> ErrorCode,
    pub destroy_connection: unsafe extern "C" fn(*mut IsarConnection) -> ErrorCode,
    pub register_connection_state_handler: Register<IsarConnectionStateCallback>,
    pub unregister_connection_state_handler: Register<IsarConnectionStateCallback>,
    pub init_video_track: extern "C" fn(IsarConnection, IsarGraphicsApiConfig) -> ErrorCode,
    pub push_frame: extern "C" fn(IsarConnection, IsarGraphicsApiFrame) -> ErrorCode,
    pub set_camera_capture_enabled:
        extern "C" fn(IsarConnection, i32, CameraConfiguration, IsarCameraProperties) -> ErrorCode,
    pub pull_camera_capture_frame: unsafe extern "C" fn(
        IsarConnection,
        *mut IsarGraphicsApiFrame,
        *mut IsarCameraMetadata,
        *mut i32,
        *mut i32,
    ) -> ErrorCode,
    pub acquire_camera_cpu_image: unsafe extern "C" fn(IsarConnection, u32, *mut u8, u32) -> ErrorCode,
    pub set_audio_track_enabled: extern "C" fn(IsarConnection, i32) -> ErrorCode,
    pub push_audio_data: unsafe extern "C" fn(IsarConnection, IsarAudioData) -> ErrorCode,
    pub set_microphone_capture_enabled: extern "C" fn(IsarConnection, i32) -> ErrorCode,
    pub register_microphone_capture_handler: Register<IsarServerAudioDataReceivedCallback>,
    pub unregister_microphone_capture_handler: Register<IsarServerAudioDataReceivedCallback>,
    pub register_view_pose_handler: Register<IsarViewPoseReceivedCallback>,
    pub unregister_view_pose_handler: Register<IsarViewPoseReceivedCallback>,
    pub register_spatial_input_handler: Register<IsarSpatialInputReceivedCallback>,
    pub unregister_spatial_input_handler: Register<IsarSpatialInputReceivedCallback>,
    pub register_stats_handler: Register<IsarServerStatsCallback>,
    pub unregister_stats_handler: Register<IsarServerStatsCallback>,
    pub get_stats: extern "C" fn(IsarConnection),
    pub get_connection_info: unsafe extern "C" fn(IsarConnection, *mut IsarConnectionInfo) -> ErrorCode,
    pub set_bitrate: extern "C" fn(IsarConnection, i32) -> ErrorCode,
    pub push_haptic: unsafe extern "C" fn(IsarConnection, *const IsarHaptic) -> ErrorCode,
    pub camera_supported: extern "C" fn(IsarConnection) -> bool,
    pub pull_view_pose: unsafe extern "C" fn(IsarConnection, *mut XrPose) -> ErrorCode,
    pub pull_spatial_input: unsafe extern "C" fn(IsarConnection, *mut IsarSpatialInput, u32, *mut u32) -> ErrorCode,
    pub configure_pose_prediction: extern "C" fn(IsarConnection, IsarPosePredictionConfig) -> ErrorCode,
    pub try_set_passthrough_mode: extern "C" fn(IsarConnection, bool) -> bool,
    pub get_passthrough_mode: extern "C" fn(IsarConnection) -> bool,
}

/// Fills `api` with the server functions.
///
/// # Safety
///
/// `api` must be null or point to writable memory for an `IsarServerApi`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Server_CreateApi(api: *mut IsarServerApi) -> ErrorCode {
    guard("Isar_Server_CreateApi", || {
        let version = context()?.server().version().packed();
        let table = IsarServerApi {
            version,
            create_connection,
            open_connection,
            close_connection,
            destroy_connection,
            register_connection_state_handler,
            unregister_connection_state_handler,
            init_video_track,
            push_frame,
            set_camera_capture_enabled,
            pull_camera_capture_frame,
            acquire_camera_cpu_image,
            set_audio_track_enabled,
            push_audio_data,
            set_microphone_capture_enabled,
            register_microphone_capture_handler,
            unregister_microphone_capture_handler,
            register_view_pose_handler,
            unregister_view_pose_handler,
            register_spatial_input_handler,
            unregister_spatial_input_handler,
            register_stats_handler,
            unregister_stats_handler,
            get_stats,
            get_connection_info,
            set_bitrate,
            push_haptic,
            camera_supported,
            pull_view_pose,
            pull_spatial_input,
            configure_pose_prediction,
            try_set_passthrough_mode,
            get_passthrough_mode,
        };
        unsafe { output(api, "api", table) }
    })
}

lifecycle_functions!(server);

/// Resolves the connection and the server view of the context.
fn target(connection: IsarConnection) -> Result<(ConnectionHandle, crate::IsarServer<'static>)> {
    Ok((connection_handle(connection)?, context()?.server()))
}

extern "C" fn init_video_track(connection: IsarConnection, graphics: IsarGraphicsApiConfig) -> ErrorCode {
    guard("initVideoTrack", || {
        let (handle, server) = target(connection)?;
        server.init_video_track(handle, graphics.to_config()?)
    })
}

extern "C" fn push_frame(connection: IsarConnection, frame: IsarGraphicsApiFrame) -> ErrorCode {
    guard("pushFrame", || {
        let (handle, server) = target(connection)?;
        server.push_frame(handle, frame.to_frame()?)
    })
}

extern "C" fn set_camera_capture_enabled(
    connection: IsarConnection,
    enabled: i32,
    configuration: CameraConfiguration,
    properties: IsarCameraProperties,
) -> ErrorCode {
    guard("setCameraCaptureEnabled", || {
        let (handle, server) = target(connection)?;
        server.set_camera_capture_enabled(handle, enabled != 0, configuration, properties.into())
    })
}

unsafe extern "C" fn pull_camera_capture_frame(
    connection: IsarConnection,
    frame: *mut IsarGraphicsApiFrame,
    metadata: *mut IsarCameraMetadata,
    width: *mut i32,
    height: *mut i32,
) -> ErrorCode {
    guard("pullCameraCaptureFrame", || {
        let (handle, server) = target(connection)?;
        if frame.is_null() || metadata.is_null() || width.is_null() || height.is_null() {
            return Err(IsarError::invalid_argument("frame", "null output pointer"));
        }
        let pulled = server.pull_camera_capture_frame(handle)?;
        unsafe {
            output(frame, "frame", (&pulled.frame).into())?;
            output(metadata, "metadata", (&pulled.metadata).into())?;
            output(width, "width", pulled.width as i32)?;
            output(height, "height", pulled.height as i32)
        }
    })
}

/// Shared by both tables: converts into a caller buffer.
pub(super) unsafe fn acquire_image(
    format: u32,
    data: *mut u8,
    size: u32,
    acquire: impl FnOnce(TextureFormat, &mut [u8]) -> Result<usize>,
) -> Result<()> {
    let format = TextureFormat::from_raw(format)
        .ok_or_else(|| IsarError::invalid_argument("format", format!("unknown texture format {format}")))?;
    if data.is_null() {
        return Err(IsarError::invalid_argument("data", "null buffer"));
    }
    let out = unsafe { std::slice::from_raw_parts_mut(data, size as usize) };
    acquire(format, out).map(|_| ())
}

unsafe extern "C" fn acquire_camera_cpu_image(connection: IsarConnection, format: u32, data: *mut u8, size: u32) -> ErrorCode {
    guard("acquireCameraCpuImage", || {
        let (handle, server) = target(connection)?;
        unsafe { acquire_image(format, data, size, |format, out| server.acquire_camera_cpu_image(handle, format, out)) }
    })
}

extern "C" fn set_audio_track_enabled(connection: IsarConnection, enabled: i32) -> ErrorCode {
    guard("setAudioTrackEnabled", || {
        let (handle, server) = target(connection)?;
        server.set_audio_track_enabled(handle, enabled != 0)
    })
}

unsafe extern "C" fn push_audio_data(connection: IsarConnection, audio: IsarAudioData) -> ErrorCode {
    guard("pushAudioData", || {
        let (handle, server) = target(connection)?;
        server.push_audio_data(handle, unsafe { audio.to_audio() }?)
    })
}

extern "C" fn set_microphone_capture_enabled(connection: IsarConnection, enabled: i32) -> ErrorCode {
    guard("setMicrophoneCaptureEnabled", || {
        let (handle, server) = target(connection)?;
        server.set_microphone_capture_enabled(handle, enabled != 0)
    })
}

unsafe extern "C" fn register_microphone_capture_handler(
    connection: IsarConnection,
    cb: Option<IsarServerAudioDataReceivedCallback>,
    user_data: *mut c_void,
) {
    guard_void("registerMicrophoneCaptureHandler", || {
        let cb = callback(cb)?;
        let user = UserData::new(user_data);
        register_callback(
            target(connection)?,
            "microphone",
            cb as usize,
            user_data,
            |handle, server| {
                server.register_microphone_capture_handler(
                    handle,
                    Arc::new(move |audio: &AudioData<'_>| {
                        let raw = IsarAudioData::from(audio);
                        unsafe { cb(&raw, user.get()) }
                    }),
                )
            },
            |handle, server, id| server.unregister_microphone_capture_handler(handle, id),
        )
    })
}

unsafe extern "C" fn unregister_microphone_capture_handler(
    connection: IsarConnection,
    cb: Option<IsarServerAudioDataReceivedCallback>,
    user_data: *mut c_void,
) {
    guard_void("unregisterMicrophoneCaptureHandler", || {
        let cb = callback(cb)?;
        unregister_callback(target(connection)?, "microphone", cb as usize, user_data, |handle, server, id| {
            server.unregister_microphone_capture_handler(handle, id)
        })
    })
}

unsafe extern "C" fn register_view_pose_handler(
    connection: IsarConnection,
    cb: Option<IsarViewPoseReceivedCallback>,
    user_data: *mut c_void,
) {
    guard_void("registerViewPoseHandler", || {
        let cb = callback(cb)?;
        let user = UserData::new(user_data);
        register_callback(
            target(connection)?,
            "view-pose",
            cb as usize,
            user_data,
            |handle, server| {
                server.register_view_pose_handler(handle, Arc::new(move |pose: &XrPose| unsafe { cb(pose, user.get()) }))
            },
            |handle, server, id| server.unregister_view_pose_handler(handle, id),
        )
    })
}

unsafe extern "C" fn unregister_view_pose_handler(
    connection: IsarConnection,
    cb: Option<IsarViewPoseReceivedCallback>,
    user_data: *mut c_void,
) {
    guard_void("unregisterViewPoseHandler", || {
        let cb = callback(cb)?;
        unregister_callback(target(connection)?, "view-pose", cb as usize, user_data, |handle, server, id| {
            server.unregister_view_pose_handler(handle, id)
        })
    })
}

unsafe extern "C" fn register_spatial_input_handler(
    connection: IsarConnection,
    cb: Option<IsarSpatialInputReceivedCallback>,
    user_data: *mut c_void,
) {
    guard_void("registerSpatialInputHandler", || {
        let cb = callback(cb)?;
        let user = UserData::new(user_data);
        register_callback(
            target(connection)?,
            "spatial-input",
            cb as usize,
            user_data,
            |handle, server| {
                server.register_spatial_input_handler(
                    handle,
                    Arc::new(move |event: &SpatialInput| {
                        let raw = IsarSpatialInput::borrowed(event);
                        unsafe { cb(&raw, user.get()) }
                    }),
                )
            },
            |handle, server, id| server.unregister_spatial_input_handler(handle, id),
        )
    })
}

unsafe extern "C" fn unregister_spatial_input_handler(
    connection: IsarConnection,
    cb: Option<IsarSpatialInputReceivedCallback>,
    user_data: *mut c_void,
) {
    guard_void("unregisterSpatialInputHandler", || {
        let cb = callback(cb)?;
        unregister_callback(target(connection)?, "spatial-input", cb as usize, user_data, |handle, server, id| {
            server.unregister_spatial_input_handler(handle, id)
        })
    })
}

unsafe extern "C" fn register_stats_handler(
    connection: IsarConnection,
    cb: Option<IsarServerStatsCallback>,
    user_data: *mut c_void,
) {
    guard_void("registerStatsHandler", || {
        let cb = callback(cb)?;
        let user = UserData::new(user_data);
        register_callback(
            target(connection)?,
            "stats",
            cb as usize,
            user_data,
            |handle, server| {
                server.register_stats_handler(
                    handle,
                    Arc::new(move |report: &StatsReport| {
                        with_report_view(report, |view| unsafe { cb(view, user.get()) });
                    }),
                )
            },
            |handle, server, id| server.unregister_stats_handler(handle, id),
        )
    })
}

unsafe extern "C" fn unregister_stats_handler(
    connection: IsarConnection,
    cb: Option<IsarServerStatsCallback>,
    user_data: *mut c_void,
) {
    guard_void("unregisterStatsHandler", || {
        let cb = callback(cb)?;
        unregister_callback(target(connection)?, "stats", cb as usize, user_data, |handle, server, id| {
            server.unregister_stats_handler(handle, id)
        })
    })
}

extern "C" fn get_stats(connection: IsarConnection) {
    guard_void("getStats", || {
        let (handle, server) = target(connection)?;
        server.get_stats(handle)
    })
}

extern "C" fn set_bitrate(connection: IsarConnection, kbps: i32) -> ErrorCode {
    guard("setBitrate", || {
        let (handle, server) = target(connection)?;
        server.set_bitrate(handle, kbps)
    })
}

unsafe extern "C" fn push_haptic(connection: IsarConnection, haptic: *const IsarHaptic) -> ErrorCode {
    guard("pushHaptic", || {
        let (handle, server) = target(connection)?;
        let haptic = unsafe { input(haptic, "haptic")?.to_haptic() }?;
        server.push_haptic(handle, haptic)
    })
}

extern "C" fn camera_supported(connection: IsarConnection) -> bool {
    guard_bool("cameraSupported", || {
        let (handle, server) = target(connection)?;
        server.camera_supported(handle)
    })
}

unsafe extern "C" fn pull_view_pose(connection: IsarConnection, pose: *mut XrPose) -> ErrorCode {
    guard("pullViewPose", || {
        let (handle, server) = target(connection)?;
        if pose.is_null() {
            return Err(IsarError::invalid_argument("pose", "null output pointer"));
        }
        let pulled = server.pull_view_pose(handle)?;
        unsafe { output(pose, "pose", pulled) }
    })
}

/// With a null buffer and a zero count only the pending count is reported,
/// through `output_count`. With a buffer, `output_count` is optional.
/// Button and axis arrays of pulled events are `malloc`ed for the caller.
unsafe extern "C" fn pull_spatial_input(
    connection: IsarConnection,
    buffer: *mut IsarSpatialInput,
    input_count: u32,
    output_count: *mut u32,
) -> ErrorCode {
    guard("pullSpatialInput", || {
        let (handle, server) = target(connection)?;
        if buffer.is_null() {
            if input_count != 0 {
                return Err(IsarError::invalid_argument("spatial_input", "null buffer"));
            }
            let pending = server.spatial_input_count(handle)?;
            return unsafe { output(output_count, "output_count", pending.min(u32::MAX as usize) as u32) };
        }
        let events = server.pull_spatial_input(handle, input_count as usize)?;
        for (index, event) in events.iter().enumerate() {
            let raw = IsarSpatialInput::allocated(event)?;
            unsafe { buffer.add(index).write(raw) };
        }
        if !output_count.is_null() {
            unsafe { output_count.write(events.len() as u32) };
        }
        Ok(())
    })
}

extern "C" fn configure_pose_prediction(connection: IsarConnection, config: IsarPosePredictionConfig) -> ErrorCode {
    guard("configurePosePrediction", || {
        let (handle, server) = target(connection)?;
        server.configure_pose_prediction(handle, config.into())
    })
}

extern "C" fn try_set_passthrough_mode(connection: IsarConnection, enabled: bool) -> bool {
    guard_bool("trySetPassthroughMode", || {
        let (handle, server) = target(connection)?;
        server.try_set_passthrough_mode(handle, enabled)
    })
}

extern "C" fn get_passthrough_mode(connection: IsarConnection) -> bool {
    guard_bool("getPassthroughMode", || {
        let (handle, server) = target(connection)?;
        server.get_passthrough_mode(handle)
    })
}
