//! `IsarClientApi`.

#![allow(deprecated)]

use std::ffi::c_void;
use std::sync::Arc;

use super::server::acquire_image;
use super::{
    IsarCameraMetadata, IsarCameraProperties, IsarConfig, IsarConnection, IsarConnectionInfo,
    IsarConnectionStateCallback, IsarGraphicsApiConfig, IsarGraphicsApiFrame, IsarSpatialInput, UserData, callback,
    connection_handle, context, guard, guard_void, input, lifecycle_functions, output, register_callback,
    unregister_callback,
};
use crate::api::{ClientApi, ConnectionApi};
use crate::connection::ConnectionHandle;
use crate::{CameraConfiguration, CameraProperties, ErrorCode, IsarError, LegacyXrPose, Result, XrPose};

/// `void (*)(bool enabled, const IsarCameraConfiguration*, const IsarCameraProperties*, void* userData)`
pub type IsarCameraCaptureEnabledCallback = unsafe extern "C" fn(
    enabled: bool,
    configuration: *const CameraConfiguration,
    properties: *const IsarCameraProperties,
    user_data: *mut c_void,
);

type Register<F> = unsafe extern "C" fn(IsarConnection, Option<F>, *mut c_void);

/// The client function table.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IsarClientApi {
    pub version: u32,
    pub create_connection: unsafe extern "C" fn(*const IsarConfig, IsarGraphicsApiConfig, *mut IsarConnection) -> ErrorCode,
    pub open_connection: extern "C" fn(IsarConnection) -> ErrorCode,
    pub close_connection: extern "C" fn(IsarConnection) -> ErrorCode,
    pub destroy_connection: unsafe extern "C" fn(*mut IsarConnection) -> ErrorCode,
    pub register_connection_state_handler: Register<IsarConnectionStateCallback>,
    pub unregister_connection_state_handler: Register<IsarConnectionStateCallback>,
    pub get_connection_info: unsafe extern "C" fn(IsarConnection, *mut IsarConnectionInfo) -> ErrorCode,
    pub pull_frame: unsafe extern "C" fn(IsarConnection, *mut IsarGraphicsApiFrame) -> ErrorCode,
    pub init_camera_track: extern "C" fn(IsarConnection, IsarGraphicsApiConfig) -> ErrorCode,
    pub push_camera_frame:
        unsafe extern "C" fn(IsarConnection, IsarGraphicsApiFrame, *const IsarCameraMetadata) -> ErrorCode,
    pub register_camera_capture_enabled_handler: Register<IsarCameraCaptureEnabledCallback>,
    pub unregister_camera_capture_enabled_handler: Register<IsarCameraCaptureEnabledCallback>,
    pub push_view_pose_deprecated: unsafe extern "C" fn(IsarConnection, *const LegacyXrPose) -> ErrorCode,
    pub push_view_pose: unsafe extern "C" fn(IsarConnection, *const XrPose) -> ErrorCode,
    pub push_spatial_input: unsafe extern "C" fn(IsarConnection, *const IsarSpatialInput) -> ErrorCode,
    pub acquire_cpu_image: unsafe extern "C" fn(IsarConnection, u32, *mut u8, u32) -> ErrorCode,
}

/// Fills `api` with the client functions.
///
/// # Safety
///
/// `api` must be null or point to writable memory for an `IsarClientApi`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Client_CreateApi(api: *mut IsarClientApi) -> ErrorCode {
    guard("Isar_Client_CreateApi", || {
        let version = context()?.client().version().packed();
        let table = IsarClientApi {
            version,
            create_connection,
            open_connection,
            close_connection,
            destroy_connection,
            register_connection_state_handler,
            unregister_connection_state_handler,
            get_connection_info,
            pull_frame,
            init_camera_track,
            push_camera_frame,
            register_camera_capture_enabled_handler,
            unregister_camera_capture_enabled_handler,
            push_view_pose_deprecated,
            push_view_pose,
            push_spatial_input,
            acquire_cpu_image,
        };
        unsafe { output(api, "api", table) }
    })
}

lifecycle_functions!(client);

fn target(connection: IsarConnection) -> Result<(ConnectionHandle, crate::IsarClient<'static>)> {
    Ok((connection_handle(connection)?, context()?.client()))
}

unsafe extern "C" fn pull_frame(connection: IsarConnection, frame: *mut IsarGraphicsApiFrame) -> ErrorCode {
    guard("pullFrame", || {
        let (handle, client) = target(connection)?;
        if frame.is_null() {
            return Err(IsarError::invalid_argument("frame", "null output pointer"));
        }
        let pulled = client.pull_frame(handle)?;
        unsafe { output(frame, "frame", (&pulled).into()) }
    })
}

extern "C" fn init_camera_track(connection: IsarConnection, graphics: IsarGraphicsApiConfig) -> ErrorCode {
    guard("initCameraTrack", || {
        let (handle, client) = target(connection)?;
        client.init_camera_track(handle, graphics.to_config()?)
    })
}

unsafe extern "C" fn push_camera_frame(
    connection: IsarConnection,
    frame: IsarGraphicsApiFrame,
    metadata: *const IsarCameraMetadata,
) -> ErrorCode {
    guard("pushCameraFrame", || {
        let (handle, client) = target(connection)?;
        let metadata = *unsafe { input(metadata, "metadata") }?;
        client.push_camera_frame(handle, frame.to_frame()?, metadata.into())
    })
}

unsafe extern "C" fn register_camera_capture_enabled_handler(
    connection: IsarConnection,
    cb: Option<IsarCameraCaptureEnabledCallback>,
    user_data: *mut c_void,
) {
    guard_void("registerCameraCaptureEnabledHandler", || {
        let cb = callback(cb)?;
        let user = UserData::new(user_data);
        register_callback(
            target(connection)?,
            "camera-capture",
            cb as usize,
            user_data,
            |handle, client| {
                client.register_camera_capture_enabled_handler(
                    handle,
                    Arc::new(move |enabled: bool, configuration: &CameraConfiguration, properties: &CameraProperties| {
                        let raw = IsarCameraProperties::from(properties);
                        unsafe { cb(enabled, configuration, &raw, user.get()) }
                    }),
                )
            },
            |handle, client, id| client.unregister_camera_capture_enabled_handler(handle, id),
        )
    })
}

unsafe extern "C" fn unregister_camera_capture_enabled_handler(
    connection: IsarConnection,
    cb: Option<IsarCameraCaptureEnabledCallback>,
    user_data: *mut c_void,
) {
    guard_void("unregisterCameraCaptureEnabledHandler", || {
        let cb = callback(cb)?;
        unregister_callback(target(connection)?, "camera-capture", cb as usize, user_data, |handle, client, id| {
            client.unregister_camera_capture_enabled_handler(handle, id)
        })
    })
}

unsafe extern "C" fn push_view_pose_deprecated(connection: IsarConnection, pose: *const LegacyXrPose) -> ErrorCode {
    guard("pushViewPose_Deprecated", || {
        let (handle, client) = target(connection)?;
        client.push_legacy_view_pose(handle, unsafe { input(pose, "pose") }?)
    })
}

unsafe extern "C" fn push_view_pose(connection: IsarConnection, pose: *const XrPose) -> ErrorCode {
    guard("pushViewPose", || {
        let (handle, client) = target(connection)?;
        client.push_view_pose(handle, unsafe { input(pose, "pose") }?)
    })
}

unsafe extern "C" fn push_spatial_input(connection: IsarConnection, event: *const IsarSpatialInput) -> ErrorCode {
    guard("pushSpatialInput", || {
        let (handle, client) = target(connection)?;
        let event = unsafe { input(event, "spatial_input")?.to_input() }?;
        client.push_spatial_input(handle, &event)
    })
}

unsafe extern "C" fn acquire_cpu_image(connection: IsarConnection, format: u32, data: *mut u8, size: u32) -> ErrorCode {
    guard("acquireCpuImage", || {
        let (handle, client) = target(connection)?;
        unsafe { acquire_image(format, data, size, |format, out| client.acquire_cpu_image(handle, format, out)) }
    })
}
