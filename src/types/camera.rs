//! Client camera capture metadata.

use serde::{Deserialize, Serialize};

use super::Matrix4x4;

/// Pinhole intrinsics with radial and tangential distortion.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    pub focal_length_x: f32,
    pub focal_length_y: f32,
    pub principal_point_x: f32,
    pub principal_point_y: f32,
    pub radial_distortion_k1: f32,
    pub radial_distortion_k2: f32,
    pub radial_distortion_k3: f32,
    pub tangential_distortion_p1: f32,
    pub tangential_distortion_p2: f32,
}

/// Requested capture resolution and rate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraConfiguration {
    pub width: u32,
    pub height: u32,
    pub framerate: f32,
}

/// Exposure and white balance controls.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraProperties {
    pub auto_exposure: bool,
    /// 100ns units.
    pub exposure: i64,
    pub exposure_compensation: f32,
    /// Kelvin.
    pub white_balance: i32,
}

/// Per-frame camera metadata.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraMetadata {
    pub intrinsics: CameraIntrinsics,
    pub extrinsics: Matrix4x4,
    pub properties: CameraProperties,
}
