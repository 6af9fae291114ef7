//! ABI data model shared by the server and client sides.
//!
//! Plain-old-data types (vectors, poses, camera intrinsics) are `#[repr(C)]`
//! and shared directly with the C ABI. Types with variable length payloads,
//! borrowed buffers or tagged unions are modelled as Rust enums and owned
//! collections; [`crate::ffi`] converts them at the boundary.
//!
//! ## ABI enums
//!
//! Every enum that crosses the boundary is pinned to 32 bits and checked at
//! compile time. Raw values coming from C are decoded with `from_raw`, which
//! rejects unknown discriminants instead of transmuting them.
//!
//! ```rust
//! use isar::{CodecType, ConnectionState};
//!
//! assert_eq!(std::mem::size_of::<ConnectionState>(), 4);
//! assert_eq!(CodecType::from_raw(2), Some(CodecType::H265));
//! assert_eq!(CodecType::from_raw(99), None);
//! ```

/// Declares a 32-bit ABI enum with raw conversions and a size check.
macro_rules! abi_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr($repr)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        const _: () = assert!(std::mem::size_of::<$name>() == 4);

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Decodes a raw ABI value. Unknown discriminants yield `None`.
            pub fn from_raw(raw: $repr) -> Option<Self> {
                Self::ALL.iter().copied().find(|variant| *variant as $repr == raw)
            }

            /// The raw ABI value.
            pub fn as_raw(self) -> $repr {
                self as $repr
            }
        }
    };
}

mod audio;
mod camera;
mod graphics;
mod haptic;
mod input;
mod math;
mod pose;
mod state;

pub use audio::AudioData;
pub use camera::{CameraConfiguration, CameraIntrinsics, CameraMetadata, CameraProperties};
pub use graphics::{
    FocusPlane, FrameInfo, FramePayload, GpuHandle, GraphicsApiConfig, GraphicsApiFrame,
    GraphicsApiType, TextureFormat,
};
pub use haptic::{Haptic, HapticChannel, HapticTarget, HapticType};
pub use input::{
    Axis1D, Axis1DKind, Axis2D, Axis2DKind, Button, ButtonKind, ControllerData, ControllerType,
    HAND_JOINT_COUNT, HandJoint, HandPose, Handedness, HeadPose, InputType, JointPose,
    JointPoseAccuracy, SpatialInput,
};
pub use math::{Fov, Matrix4x4, Pose, Quaternion, Vector2, Vector3, Vector4};
pub use pose::{LegacyXrPose, XrPose};
pub use state::{
    ChannelPriority, CodecType, ConnectionState, DeviceType, DiagnosticOptions, Role, TrackKind,
};
