//! GPU-resident frames and graphics API bindings.

use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::ptr::NonNull;

use super::{Vector3, XrPose};

abi_enum! {
    pub enum GraphicsApiType: u32 {
        D3D11 = 0,
        D3D12 = 1,
    }
}

abi_enum! {
    /// Pixel layout of frame textures and CPU images.
    pub enum TextureFormat: u32 {
        Rgba32 = 0,
        Nv12 = 1,
        P010 = 2,
    }
}

/// Opaque pointer to a caller-owned graphics object (device, queue, fence,
/// texture). The core never dereferences it.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuHandle(NonNull<c_void>);

// Graphics objects are free-threaded COM objects owned by the caller; the
// core only stores and forwards the pointer value.
unsafe impl Send for GpuHandle {}
unsafe impl Sync for GpuHandle {}

impl GpuHandle {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(GpuHandle)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Device objects a connection renders or captures with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsApiConfig {
    D3D11 { device: GpuHandle },
    D3D12 { device: GpuHandle, command_queue: GpuHandle, fence: GpuHandle },
}

impl GraphicsApiConfig {
    pub fn api_type(&self) -> GraphicsApiType {
        match self {
            GraphicsApiConfig::D3D11 { .. } => GraphicsApiType::D3D11,
            GraphicsApiConfig::D3D12 { .. } => GraphicsApiType::D3D12,
        }
    }
}

/// Focus plane hint for reprojection.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FocusPlane {
    pub position: Vector3,
    pub normal: Vector3,
    pub velocity: Vector3,
}

/// Metadata that travels with every frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    /// The pose the frame was rendered with, timestamps untouched.
    pub pose: XrPose,
    pub texture_format: TextureFormat,
    pub z_near: f32,
    pub z_far: f32,
    pub focus_plane: Option<FocusPlane>,
    pub passthrough_enabled: bool,
}

impl Default for FrameInfo {
    fn default() -> Self {
        Self {
            pose: XrPose::default(),
            texture_format: TextureFormat::Rgba32,
            z_near: 0.1,
            z_far: 1000.0,
            focus_plane: None,
            passthrough_enabled: false,
        }
    }
}

/// Graphics API specific part of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePayload {
    D3D11 { texture: GpuHandle, depth: Option<GpuHandle>, subresource_index: u32 },
    D3D12 { resource: GpuHandle, depth: Option<GpuHandle>, subresource_index: u32, fence_value: u64 },
}

impl FramePayload {
    pub fn api_type(&self) -> GraphicsApiType {
        match self {
            FramePayload::D3D11 { .. } => GraphicsApiType::D3D11,
            FramePayload::D3D12 { .. } => GraphicsApiType::D3D12,
        }
    }
}

/// A frame: metadata plus exactly one graphics API payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicsApiFrame {
    pub info: FrameInfo,
    pub payload: FramePayload,
}
