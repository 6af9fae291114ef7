//! `#[repr(C)]` mirrors of the header structs and their conversions.
//!
//! Enums arrive as raw integers and are decoded with `from_raw`; an unknown
//! discriminant is an invalid argument, never undefined behavior.

use std::borrow::Cow;
use std::ffi::{CStr, c_char, c_void};
use std::mem::size_of;
use std::net::Ipv4Addr;
use std::ptr;
use std::slice;

use crate::config::{Config, IceServerConfig, PortRange, RenderConfig, SignalingConfig};
use crate::connection::ConnectionInfo;
use crate::data_channel::ChannelDescription;
use crate::prediction::PosePredictionConfig;
use crate::{
    AudioData, Axis1D, Axis2D, Button, CameraIntrinsics, CameraMetadata, CameraProperties, ChannelPriority,
    CodecType, ConfigIssue, ControllerData, DeviceType, DiagnosticOptions, FocusPlane, FrameInfo, FramePayload,
    GpuHandle, GraphicsApiConfig, GraphicsApiFrame, GraphicsApiType, HAND_JOINT_COUNT, HandPose, Handedness,
    Haptic, HapticChannel, HapticTarget, HapticType, HeadPose, InputType, IsarError, JointPose, JointPoseAccuracy,
    Matrix4x4, Pose, Quaternion, Result, SpatialInput, TextureFormat, Vector3, Version, XrPose,
};

/// `wchar_t` of the platform.
#[cfg(windows)]
pub type WChar = u16;
#[cfg(not(windows))]
pub type WChar = u32;

/// Borrows a NUL terminated string. Null is an invalid argument.
pub(crate) unsafe fn c_str<'a>(ptr: *const c_char, argument: &'static str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(IsarError::invalid_argument(argument, "null string"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|err| IsarError::invalid_argument(argument, err.to_string()))
}

/// Decodes a NUL terminated wide string. Null reads as empty.
pub(crate) unsafe fn wide_str(ptr: *const WChar, argument: &'static str) -> Result<String> {
    if ptr.is_null() {
        return Ok(String::new());
    }
    let mut len = 0;
    while unsafe { *ptr.add(len) } != 0 {
        len += 1;
    }
    let units = unsafe { slice::from_raw_parts(ptr, len) };
    #[cfg(windows)]
    let decoded = String::from_utf16(units).map_err(|err| IsarError::invalid_argument(argument, err.to_string()));
    #[cfg(not(windows))]
    let decoded = units
        .iter()
        .map(|unit| char::from_u32(*unit))
        .collect::<Option<String>>()
        .ok_or_else(|| IsarError::invalid_argument(argument, "invalid code point"));
    decoded
}

/// Borrows `len` elements. Null is only accepted for an empty slice.
pub(crate) unsafe fn c_slice<'a, T>(ptr: *const T, len: usize, argument: &'static str) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(IsarError::invalid_argument(argument, format!("null buffer of {len} elements")));
    }
    Ok(unsafe { slice::from_raw_parts(ptr, len) })
}

fn decode<T>(value: Option<T>, argument: &'static str, raw: impl std::fmt::Display) -> Result<T> {
    value.ok_or_else(|| IsarError::invalid_argument(argument, format!("unknown value {raw}")))
}

fn gpu(ptr: *mut c_void, argument: &'static str) -> Result<GpuHandle> {
    GpuHandle::new(ptr).ok_or_else(|| IsarError::invalid_argument(argument, "null graphics object"))
}

fn gpu_ptr(handle: Option<GpuHandle>) -> *mut c_void {
    handle.map_or(ptr::null_mut(), GpuHandle::as_ptr)
}

// Configuration
// -------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarIceServerConfig {
    pub url: *const WChar,
    pub username: *const WChar,
    pub password: *const WChar,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsarRenderConfig {
    pub width: u32,
    pub height: u32,
    pub num_views: u32,
    pub encoder_bitrate_kbps: i32,
    pub framerate: u32,
    pub depth_enabled: u32,
    pub pose_prediction_enabled: u32,
}

impl From<IsarRenderConfig> for RenderConfig {
    fn from(raw: IsarRenderConfig) -> Self {
        RenderConfig {
            width: raw.width,
            height: raw.height,
            num_views: raw.num_views,
            encoder_bitrate_kbps: raw.encoder_bitrate_kbps,
            framerate: raw.framerate,
            depth_enabled: raw.depth_enabled != 0,
            pose_prediction_enabled: raw.pose_prediction_enabled != 0,
        }
    }
}

impl From<RenderConfig> for IsarRenderConfig {
    fn from(config: RenderConfig) -> Self {
        IsarRenderConfig {
            width: config.width,
            height: config.height,
            num_views: config.num_views,
            encoder_bitrate_kbps: config.encoder_bitrate_kbps,
            framerate: config.framerate,
            depth_enabled: config.depth_enabled.into(),
            pose_prediction_enabled: config.pose_prediction_enabled.into(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarSignalingConfig {
    pub suggested_ipv4: *const c_char,
    pub port: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IsarPortRange {
    pub min_port: u32,
    pub max_port: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarConfig {
    pub friendly_name: *const c_char,
    pub codec_preference: u32,
    pub diagnostic_options: u32,
    pub num_ice_servers: u32,
    pub ice_servers: *const IsarIceServerConfig,
    pub render_config: IsarRenderConfig,
    pub signaling_config: IsarSignalingConfig,
    pub device_type: i32,
    pub port_range: IsarPortRange,
}

impl IsarConfig {
    /// Copies the configuration out of caller memory.
    pub(crate) unsafe fn to_config(&self) -> Result<Config> {
        let friendly_name = unsafe { c_str(self.friendly_name, "friendly_name") }?.to_owned();
        let codec_preference = decode(CodecType::from_raw(self.codec_preference), "codec_preference", self.codec_preference)?;
        let device_type = decode(DeviceType::from_raw(self.device_type), "device_type", self.device_type)?;

        let raw_servers = unsafe { c_slice(self.ice_servers, self.num_ice_servers as usize, "ice_servers") }?;
        let mut ice_servers = Vec::with_capacity(raw_servers.len());
        for server in raw_servers {
            ice_servers.push(IceServerConfig {
                url: unsafe { wide_str(server.url, "ice_servers") }?,
                username: unsafe { wide_str(server.username, "ice_servers") }?,
                password: unsafe { wide_str(server.password, "ice_servers") }?,
            });
        }

        let ip = self.signaling_config.suggested_ipv4;
        if ip.is_null() {
            return Err(IsarError::config(ConfigIssue::SignalingIp, "no suggested address"));
        }
        let ip_text = unsafe { CStr::from_ptr(ip) }.to_string_lossy();
        let suggested_ipv4: Ipv4Addr = ip_text
            .parse()
            .map_err(|_| IsarError::config(ConfigIssue::SignalingIp, format!("'{ip_text}' is not an IPv4 address")))?;

        Ok(Config {
            friendly_name,
            codec_preference,
            diagnostic_options: DiagnosticOptions::from_bits_truncate(self.diagnostic_options),
            ice_servers,
            render_config: self.render_config.into(),
            signaling_config: SignalingConfig { suggested_ipv4, port: self.signaling_config.port },
            device_type,
            port_range: PortRange { min_port: self.port_range.min_port, max_port: self.port_range.max_port },
        })
    }
}

/// `remote_name` points into a per-connection cache and stays valid until
/// the info changes or the connection is destroyed.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarConnectionInfo {
    pub remote_name: *const c_char,
    pub remote_version: u32,
    pub render_config: IsarRenderConfig,
    pub remote_device_type: i32,
    pub codec_in_use: u32,
}

impl IsarConnectionInfo {
    pub(crate) fn new(info: &ConnectionInfo, remote_name: *const c_char) -> Self {
        IsarConnectionInfo {
            remote_name,
            remote_version: info.remote_version.packed(),
            render_config: info.render_config.into(),
            remote_device_type: info.remote_device_type.as_raw(),
            codec_in_use: info.codec_in_use.as_raw(),
        }
    }
}

// Graphics
// -------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarD3D11Config {
    pub device: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarD3D12Config {
    pub device: *mut c_void,
    pub command_queue: *mut c_void,
    pub fence: *mut c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union IsarGraphicsApiBinding {
    pub d3d11: IsarD3D11Config,
    pub d3d12: IsarD3D12Config,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct IsarGraphicsApiConfig {
    pub graphics_api_type: u32,
    pub binding: IsarGraphicsApiBinding,
}

impl IsarGraphicsApiConfig {
    pub(crate) fn to_config(&self) -> Result<GraphicsApiConfig> {
        let api = decode(GraphicsApiType::from_raw(self.graphics_api_type), "graphics_api_type", self.graphics_api_type)?;
        // SAFETY: the type tag selects the initialized member.
        match api {
            GraphicsApiType::D3D11 => {
                let d3d11 = unsafe { self.binding.d3d11 };
                Ok(GraphicsApiConfig::D3D11 { device: gpu(d3d11.device, "device")? })
            }
            GraphicsApiType::D3D12 => {
                let d3d12 = unsafe { self.binding.d3d12 };
                Ok(GraphicsApiConfig::D3D12 {
                    device: gpu(d3d12.device, "device")?,
                    command_queue: gpu(d3d12.command_queue, "command_queue")?,
                    fence: gpu(d3d12.fence, "fence")?,
                })
            }
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarFrameInfo {
    pub pose: XrPose,
    pub texture_format: u32,
    pub z_near: f32,
    pub z_far: f32,
    pub has_focus_plane: u32,
    pub focus_plane: FocusPlane,
    pub passthrough_enabled: bool,
}

impl IsarFrameInfo {
    fn to_info(&self) -> Result<FrameInfo> {
        Ok(FrameInfo {
            pose: self.pose,
            texture_format: decode(TextureFormat::from_raw(self.texture_format), "texture_format", self.texture_format)?,
            z_near: self.z_near,
            z_far: self.z_far,
            focus_plane: (self.has_focus_plane != 0).then_some(self.focus_plane),
            passthrough_enabled: self.passthrough_enabled,
        })
    }
}

impl From<&FrameInfo> for IsarFrameInfo {
    fn from(info: &FrameInfo) -> Self {
        IsarFrameInfo {
            pose: info.pose,
            texture_format: info.texture_format.as_raw(),
            z_near: info.z_near,
            z_far: info.z_far,
            has_focus_plane: info.focus_plane.is_some().into(),
            focus_plane: info.focus_plane.unwrap_or_default(),
            passthrough_enabled: info.passthrough_enabled,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarD3D11Frame {
    pub frame: *mut c_void,
    pub depth_frame: *mut c_void,
    pub subresource_index: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarD3D12Frame {
    pub frame: *mut c_void,
    pub depth_frame: *mut c_void,
    pub subresource_index: u32,
    pub frame_fence_value: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union IsarFramePayload {
    pub d3d11: IsarD3D11Frame,
    pub d3d12: IsarD3D12Frame,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct IsarGraphicsApiFrame {
    pub info: IsarFrameInfo,
    pub graphics_api_type: u32,
    pub payload: IsarFramePayload,
}

impl IsarGraphicsApiFrame {
    pub(crate) fn to_frame(&self) -> Result<GraphicsApiFrame> {
        let info = self.info.to_info()?;
        let api = decode(GraphicsApiType::from_raw(self.graphics_api_type), "graphics_api_type", self.graphics_api_type)?;
        // SAFETY: the type tag selects the initialized member.
        let payload = match api {
            GraphicsApiType::D3D11 => {
                let d3d11 = unsafe { self.payload.d3d11 };
                FramePayload::D3D11 {
                    texture: gpu(d3d11.frame, "frame")?,
                    depth: GpuHandle::new(d3d11.depth_frame),
                    subresource_index: d3d11.subresource_index,
                }
            }
            GraphicsApiType::D3D12 => {
                let d3d12 = unsafe { self.payload.d3d12 };
                FramePayload::D3D12 {
                    resource: gpu(d3d12.frame, "frame")?,
                    depth: GpuHandle::new(d3d12.depth_frame),
                    subresource_index: d3d12.subresource_index,
                    fence_value: d3d12.frame_fence_value,
                }
            }
        };
        Ok(GraphicsApiFrame { info, payload })
    }
}

impl From<&GraphicsApiFrame> for IsarGraphicsApiFrame {
    fn from(frame: &GraphicsApiFrame) -> Self {
        let payload = match frame.payload {
            FramePayload::D3D11 { texture, depth, subresource_index } => IsarFramePayload {
                d3d11: IsarD3D11Frame { frame: texture.as_ptr(), depth_frame: gpu_ptr(depth), subresource_index },
            },
            FramePayload::D3D12 { resource, depth, subresource_index, fence_value } => IsarFramePayload {
                d3d12: IsarD3D12Frame {
                    frame: resource.as_ptr(),
                    depth_frame: gpu_ptr(depth),
                    subresource_index,
                    frame_fence_value: fence_value,
                },
            },
        };
        IsarGraphicsApiFrame {
            info: (&frame.info).into(),
            graphics_api_type: frame.payload.api_type().as_raw(),
            payload,
        }
    }
}

// Audio
// -------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarAudioData {
    pub data: *const c_void,
    pub bits_per_sample: i32,
    pub sample_rate: i32,
    pub number_of_channels: usize,
    pub samples_per_channel: usize,
}

impl IsarAudioData {
    /// Borrows the samples; the layout fields decide the length.
    pub(crate) unsafe fn to_audio<'a>(&self) -> Result<AudioData<'a>> {
        let bits_per_sample = u32::try_from(self.bits_per_sample)
            .map_err(|_| IsarError::invalid_argument("bits_per_sample", self.bits_per_sample.to_string()))?;
        let sample_rate = u32::try_from(self.sample_rate)
            .map_err(|_| IsarError::invalid_argument("sample_rate", self.sample_rate.to_string()))?;
        let number_of_channels = u32::try_from(self.number_of_channels)
            .map_err(|_| IsarError::invalid_argument("number_of_channels", self.number_of_channels.to_string()))?;
        let samples_per_channel = u32::try_from(self.samples_per_channel)
            .map_err(|_| IsarError::invalid_argument("samples_per_channel", self.samples_per_channel.to_string()))?;
        let len = (bits_per_sample as usize / 8)
            .checked_mul(self.number_of_channels)
            .and_then(|bytes| bytes.checked_mul(self.samples_per_channel))
            .ok_or_else(|| IsarError::invalid_argument("audio", "layout overflows"))?;
        let data = unsafe { c_slice(self.data.cast::<u8>(), len, "data") }?;
        Ok(AudioData { data: Cow::Borrowed(data), bits_per_sample, sample_rate, number_of_channels, samples_per_channel })
    }
}

impl From<&AudioData<'_>> for IsarAudioData {
    fn from(audio: &AudioData<'_>) -> Self {
        IsarAudioData {
            data: audio.data.as_ptr().cast(),
            bits_per_sample: audio.bits_per_sample as i32,
            sample_rate: audio.sample_rate as i32,
            number_of_channels: audio.number_of_channels as usize,
            samples_per_channel: audio.samples_per_channel as usize,
        }
    }
}

// Data channels
// -------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarChannelDescription {
    pub name: *const c_char,
    pub version: u32,
    pub priority: u32,
    pub reliable: u32,
    pub requires_large_messages: u32,
}

impl IsarChannelDescription {
    pub(crate) unsafe fn to_description(&self) -> Result<ChannelDescription> {
        Ok(ChannelDescription {
            name: unsafe { c_str(self.name, "name") }?.to_owned(),
            version: Version::from_packed(self.version),
            priority: decode(ChannelPriority::from_raw(self.priority), "priority", self.priority)?,
            reliable: self.reliable != 0,
            requires_large_messages: self.requires_large_messages != 0,
        })
    }

    /// A view of `description` whose name borrows `name`.
    pub(crate) fn borrowed(description: &ChannelDescription, name: &CStr) -> Self {
        IsarChannelDescription {
            name: name.as_ptr(),
            version: description.version.packed(),
            priority: description.priority.as_raw(),
            reliable: description.reliable.into(),
            requires_large_messages: description.requires_large_messages.into(),
        }
    }
}

// Camera
// -------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IsarCameraProperties {
    pub auto_exposure: u32,
    pub exposure: i64,
    pub exposure_compensation: f32,
    pub white_balance: i32,
}

impl From<IsarCameraProperties> for CameraProperties {
    fn from(raw: IsarCameraProperties) -> Self {
        CameraProperties {
            auto_exposure: raw.auto_exposure != 0,
            exposure: raw.exposure,
            exposure_compensation: raw.exposure_compensation,
            white_balance: raw.white_balance,
        }
    }
}

impl From<&CameraProperties> for IsarCameraProperties {
    fn from(properties: &CameraProperties) -> Self {
        IsarCameraProperties {
            auto_exposure: properties.auto_exposure.into(),
            exposure: properties.exposure,
            exposure_compensation: properties.exposure_compensation,
            white_balance: properties.white_balance,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IsarCameraMetadata {
    pub intrinsics: CameraIntrinsics,
    pub extrinsics: Matrix4x4,
    pub properties: IsarCameraProperties,
}

impl From<IsarCameraMetadata> for CameraMetadata {
    fn from(raw: IsarCameraMetadata) -> Self {
        CameraMetadata { intrinsics: raw.intrinsics, extrinsics: raw.extrinsics, properties: raw.properties.into() }
    }
}

impl From<&CameraMetadata> for IsarCameraMetadata {
    fn from(metadata: &CameraMetadata) -> Self {
        IsarCameraMetadata {
            intrinsics: metadata.intrinsics,
            extrinsics: metadata.extrinsics,
            properties: (&metadata.properties).into(),
        }
    }
}

// Prediction
// -------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarPosePredictionConfig {
    pub enabled: u8,
    pub prediction_tuner: f32,
    pub prediction_cap: u16,
}

impl From<IsarPosePredictionConfig> for PosePredictionConfig {
    fn from(raw: IsarPosePredictionConfig) -> Self {
        PosePredictionConfig {
            enabled: raw.enabled != 0,
            prediction_tuner: raw.prediction_tuner,
            prediction_cap_ms: raw.prediction_cap,
        }
    }
}

// Spatial input
// -------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarJointPose {
    pub orientation: Quaternion,
    pub position: Vector3,
    pub radius: f32,
    pub accuracy: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarHandPose {
    pub joints: [IsarJointPose; HAND_JOINT_COUNT],
}

impl IsarHandPose {
    fn to_hand(&self) -> Result<HandPose> {
        let mut hand = HandPose::default();
        for (joint, raw) in hand.joints.iter_mut().zip(&self.joints) {
            *joint = JointPose {
                orientation: raw.orientation,
                position: raw.position,
                radius: raw.radius,
                accuracy: decode(JointPoseAccuracy::from_raw(raw.accuracy), "accuracy", raw.accuracy)?,
            };
        }
        Ok(hand)
    }
}

impl From<&HandPose> for IsarHandPose {
    fn from(hand: &HandPose) -> Self {
        IsarHandPose {
            joints: hand.joints.map(|joint| IsarJointPose {
                orientation: joint.orientation,
                position: joint.position,
                radius: joint.radius,
                accuracy: joint.accuracy.as_raw(),
            }),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarControllerData {
    pub controller_identifier: u32,
    pub handedness: u32,
    pub head_pose: HeadPose,
    pub controller_pose: Pose,
    pub pointer_pose: Pose,
    pub tip_pose: Pose,
    pub hand_pose: IsarHandPose,
    pub buttons: *mut Button,
    pub buttons_length: u32,
    pub axis_1d: *mut Axis1D,
    pub axis_1d_length: u32,
    pub axis_2d: *mut Axis2D,
    pub axis_2d_length: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarSpatialInput {
    pub input_type: u32,
    pub controller_data: IsarControllerData,
}

impl IsarSpatialInput {
    /// Copies the event, including its button and axis arrays.
    pub(crate) unsafe fn to_input(&self) -> Result<SpatialInput> {
        let kind = decode(InputType::from_raw(self.input_type), "input_type", self.input_type)?;
        let raw = &self.controller_data;
        let source = ControllerData {
            controller_identifier: raw.controller_identifier,
            handedness: decode(Handedness::from_raw(raw.handedness), "handedness", raw.handedness)?,
            head_pose: raw.head_pose,
            controller_pose: raw.controller_pose,
            pointer_pose: raw.pointer_pose,
            tip_pose: raw.tip_pose,
            hand: raw.hand_pose.to_hand()?,
            buttons: unsafe { c_slice(raw.buttons, raw.buttons_length as usize, "buttons") }?.to_vec(),
            axis_1d: unsafe { c_slice(raw.axis_1d, raw.axis_1d_length as usize, "axis_1d") }?.to_vec(),
            axis_2d: unsafe { c_slice(raw.axis_2d, raw.axis_2d_length as usize, "axis_2d") }?.to_vec(),
        };
        Ok(SpatialInput::new(kind, source))
    }

    /// A view whose arrays borrow from `input`.
    pub(crate) fn borrowed(input: &SpatialInput) -> Self {
        let source = input.source();
        Self::with_arrays(
            input,
            (source.buttons.as_ptr().cast_mut(), source.axis_1d.as_ptr().cast_mut(), source.axis_2d.as_ptr().cast_mut()),
        )
    }

    /// A copy whose arrays are `malloc`ed; the caller frees them with `free`.
    pub(crate) fn allocated(input: &SpatialInput) -> Result<Self> {
        let source = input.source();
        let buttons = malloc_copy(&source.buttons)?;
        let axis_1d = malloc_copy(&source.axis_1d).inspect_err(|_| unsafe { libc::free(buttons.cast()) })?;
        let axis_2d = malloc_copy(&source.axis_2d).inspect_err(|_| unsafe {
            libc::free(buttons.cast());
            libc::free(axis_1d.cast());
        })?;
        Ok(Self::with_arrays(input, (buttons, axis_1d, axis_2d)))
    }

    fn with_arrays(input: &SpatialInput, arrays: (*mut Button, *mut Axis1D, *mut Axis2D)) -> Self {
        let source = input.source();
        IsarSpatialInput {
            input_type: input.kind().as_raw(),
            controller_data: IsarControllerData {
                controller_identifier: source.controller_identifier,
                handedness: source.handedness.as_raw(),
                head_pose: source.head_pose,
                controller_pose: source.controller_pose,
                pointer_pose: source.pointer_pose,
                tip_pose: source.tip_pose,
                hand_pose: (&source.hand).into(),
                buttons: arrays.0,
                buttons_length: source.buttons.len() as u32,
                axis_1d: arrays.1,
                axis_1d_length: source.axis_1d.len() as u32,
                axis_2d: arrays.2,
                axis_2d_length: source.axis_2d.len() as u32,
            },
        }
    }
}

/// Copies `items` into a `malloc` block. Empty slices yield null.
fn malloc_copy<T: Copy>(items: &[T]) -> Result<*mut T> {
    if items.is_empty() {
        return Ok(ptr::null_mut());
    }
    let bytes = size_of::<T>() * items.len();
    let block = unsafe { libc::malloc(bytes) }.cast::<T>();
    if block.is_null() {
        return Err(IsarError::Unknown { details: format!("allocation of {bytes} bytes failed") });
    }
    unsafe { ptr::copy_nonoverlapping(items.as_ptr(), block, items.len()) };
    Ok(block)
}

// Haptics
// -------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarHapticStop {
    pub controller_identifier: u32,
    pub handedness: u32,
    pub channel: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarHapticVibration {
    pub controller_identifier: u32,
    pub handedness: u32,
    pub channel: u32,
    pub duration: i64,
    pub frequency: f32,
    pub amplitude: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarHapticPcmVibration {
    pub controller_identifier: u32,
    pub handedness: u32,
    pub channel: u32,
    pub buffer_size: u32,
    pub buffer: *const u8,
    pub sample_rate: f32,
    pub append: bool,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarHapticAmplitudeEnvelope {
    pub controller_identifier: u32,
    pub handedness: u32,
    pub channel: u32,
    pub duration: i64,
    pub amplitude_count: u32,
    pub amplitudes: *const f32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union IsarHapticPayload {
    pub stop: IsarHapticStop,
    pub vibration: IsarHapticVibration,
    pub pcm_vibration: IsarHapticPcmVibration,
    pub amplitude_envelope_vibration: IsarHapticAmplitudeEnvelope,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct IsarHaptic {
    pub haptic_type: u32,
    pub payload: IsarHapticPayload,
}

fn haptic_target(controller_identifier: u32, handedness: u32, channel: u32) -> Result<HapticTarget> {
    Ok(HapticTarget {
        controller_identifier,
        handedness: decode(Handedness::from_raw(handedness), "handedness", handedness)?,
        channel: decode(HapticChannel::from_raw(channel), "channel", channel)?,
    })
}

impl IsarHaptic {
    /// Borrows the PCM or envelope buffer of the command.
    pub(crate) unsafe fn to_haptic<'a>(&self) -> Result<Haptic<'a>> {
        let kind = decode(HapticType::from_raw(self.haptic_type), "haptic_type", self.haptic_type)?;
        // SAFETY: the type tag selects the initialized member.
        match kind {
            HapticType::Stop => {
                let raw = unsafe { self.payload.stop };
                Ok(Haptic::Stop(haptic_target(raw.controller_identifier, raw.handedness, raw.channel)?))
            }
            HapticType::Vibration => {
                let raw = unsafe { self.payload.vibration };
                Ok(Haptic::Vibration {
                    target: haptic_target(raw.controller_identifier, raw.handedness, raw.channel)?,
                    duration: raw.duration,
                    frequency: raw.frequency,
                    amplitude: raw.amplitude,
                })
            }
            HapticType::PcmVibration => {
                let raw = unsafe { self.payload.pcm_vibration };
                Ok(Haptic::PcmVibration {
                    target: haptic_target(raw.controller_identifier, raw.handedness, raw.channel)?,
                    buffer: Cow::Borrowed(unsafe { c_slice(raw.buffer, raw.buffer_size as usize, "buffer") }?),
                    sample_rate: raw.sample_rate,
                    append: raw.append,
                })
            }
            HapticType::AmplitudeEnvelopeVibration => {
                let raw = unsafe { self.payload.amplitude_envelope_vibration };
                Ok(Haptic::AmplitudeEnvelopeVibration {
                    target: haptic_target(raw.controller_identifier, raw.handedness, raw.channel)?,
                    duration: raw.duration,
                    amplitudes: Cow::Borrowed(unsafe {
                        c_slice(raw.amplitudes, raw.amplitude_count as usize, "amplitudes")
                    }?),
                })
            }
        }
    }
}
