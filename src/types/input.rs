//! Spatial input: controllers, hands and their interaction events.
//!
//! Variable-length button and axis arrays are owned `Vec`s on the Rust side,
//! so every element has exactly one owner and is released when the input is
//! dropped. The C boundary hands the same arrays to the consumer as `malloc`
//! allocations it must `free` (see [`crate::ffi`]).

use serde::{Deserialize, Serialize};

use super::{Pose, Quaternion, Vector2, Vector3};
use crate::{IsarError, Result};

/// Joints per tracked hand.
pub const HAND_JOINT_COUNT: usize = 26;

abi_enum! {
    /// Interaction event kind.
    pub enum InputType: u32 {
        SourceDetected = 0,
        SourceLost = 1,
        SourcePressed = 2,
        SourceUpdated = 3,
        SourceReleased = 4,
    }
}

abi_enum! {
    pub enum Handedness: u32 {
        Unspecified = 0,
        Left = 1,
        Right = 2,
    }
}

impl Default for Handedness {
    fn default() -> Self {
        Handedness::Unspecified
    }
}

abi_enum! {
    pub enum JointPoseAccuracy: u32 {
        High = 0,
        Approximate = 1,
    }
}

abi_enum! {
    /// Known controllers and hand trackers, reported in
    /// [`ControllerData::controller_identifier`].
    pub enum ControllerType: u32 {
        HoloLensHands = 0,
        MetaQuestHands = 1,
        MetaQuest2Controller = 2,
        MagicLeap2Hands = 3,
        MagicLeap2Controller = 4,
        MetaQuestProController = 5,
        MetaQuest3Controller = 6,
        LenovoVrxHands = 7,
        LenovoVrxController = 8,
        LogitechMxInkStylus = 9,
        Pico4UltraHands = 10,
        Pico4UltraController = 11,
        HtcViveFocusHands = 12,
        HtcViveFocus3Controller = 13,
        HtcViveFocusVisionController = 14,
        MetaQuest3SController = 15,
        HtcViveXrEliteController = 16,
        AppleVisionProHands = 17,
    }
}

abi_enum! {
    /// Meaning of [`Button::identifier`].
    pub enum ButtonKind: u32 {
        Home = 0,
        Menu = 1,
        Settings = 2,
        A = 3,
        B = 4,
        X = 5,
        Y = 6,
        BumperLeft = 7,
        BumperRight = 8,
        LeftStickPress = 9,
        RightStickPress = 10,
        PrimaryThumbRest = 11,
        SecondaryThumbRest = 12,
        DockedLeft = 13,
        DockedRight = 14,
    }
}

abi_enum! {
    /// Meaning of [`Axis1D::identifier`].
    pub enum Axis1DKind: u32 {
        PrimaryTrigger = 0,
        SecondaryTrigger = 1,
        PrimarySqueeze = 2,
        SecondarySqueeze = 3,
    }
}

abi_enum! {
    /// Meaning of [`Axis2D::identifier`].
    pub enum Axis2DKind: u32 {
        PrimaryStick = 0,
        SecondaryStick = 1,
        PrimaryControlPad = 2,
        SecondaryControlPad = 3,
    }
}

/// Hand joints in the order of [`HandPose::joints`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandJoint {
    Palm = 0,
    Wrist,
    ThumbMetacarpal,
    ThumbProximal,
    ThumbDistal,
    ThumbTip,
    IndexMetacarpal,
    IndexProximal,
    IndexIntermediate,
    IndexDistal,
    IndexTip,
    MiddleMetacarpal,
    MiddleProximal,
    MiddleIntermediate,
    MiddleDistal,
    MiddleTip,
    RingMetacarpal,
    RingProximal,
    RingIntermediate,
    RingDistal,
    RingTip,
    LittleMetacarpal,
    LittleProximal,
    LittleIntermediate,
    LittleDistal,
    LittleTip,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    pub position: Vector3,
    pub forward_direction: Vector3,
    pub up_direction: Vector3,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointPose {
    pub orientation: Quaternion,
    pub position: Vector3,
    pub radius: f32,
    pub accuracy: JointPoseAccuracy,
}

impl Default for JointPose {
    fn default() -> Self {
        Self {
            orientation: Quaternion::IDENTITY,
            position: Vector3::ZERO,
            radius: 0.0,
            accuracy: JointPoseAccuracy::Approximate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HandPose {
    pub joints: [JointPose; HAND_JOINT_COUNT],
}

impl HandPose {
    pub fn joint(&self, joint: HandJoint) -> &JointPose {
        &self.joints[joint as usize]
    }

    pub fn joint_mut(&mut self, joint: HandJoint) -> &mut JointPose {
        &mut self.joints[joint as usize]
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Button {
    pub identifier: u32,
    pub value: bool,
}

impl Button {
    pub fn kind(&self) -> Option<ButtonKind> {
        ButtonKind::from_raw(self.identifier)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Axis1D {
    pub identifier: u32,
    pub value: f32,
}

impl Axis1D {
    pub fn kind(&self) -> Option<Axis1DKind> {
        Axis1DKind::from_raw(self.identifier)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Axis2D {
    pub identifier: u32,
    pub value: Vector2,
}

impl Axis2D {
    pub fn kind(&self) -> Option<Axis2DKind> {
        Axis2DKind::from_raw(self.identifier)
    }
}

/// State of one controller or tracked hand.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControllerData {
    pub controller_identifier: u32,
    pub handedness: Handedness,
    pub head_pose: HeadPose,
    pub controller_pose: Pose,
    pub pointer_pose: Pose,
    pub tip_pose: Pose,
    pub hand: HandPose,
    pub buttons: Vec<Button>,
    pub axis_1d: Vec<Axis1D>,
    pub axis_2d: Vec<Axis2D>,
}

impl ControllerData {
    pub fn controller_type(&self) -> Option<ControllerType> {
        ControllerType::from_raw(self.controller_identifier)
    }

    fn validate(&self) -> Result<()> {
        let poses = [self.controller_pose, self.pointer_pose, self.tip_pose];
        if poses.iter().any(|pose| !pose.position.is_finite() || !pose.orientation.is_finite()) {
            return Err(IsarError::invalid_argument("controller_data", "non-finite pose"));
        }
        if self.axis_1d.iter().any(|axis| !axis.value.is_finite()) {
            return Err(IsarError::invalid_argument("axis_1d", "non-finite axis value"));
        }
        Ok(())
    }
}

/// One interaction event. The payload is the same for every kind; the enum
/// makes the active kind impossible to misread.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialInput {
    SourceDetected(ControllerData),
    SourceLost(ControllerData),
    SourcePressed(ControllerData),
    SourceUpdated(ControllerData),
    SourceReleased(ControllerData),
}

impl SpatialInput {
    pub fn new(kind: InputType, source: ControllerData) -> Self {
        match kind {
            InputType::SourceDetected => SpatialInput::SourceDetected(source),
            InputType::SourceLost => SpatialInput::SourceLost(source),
            InputType::SourcePressed => SpatialInput::SourcePressed(source),
            InputType::SourceUpdated => SpatialInput::SourceUpdated(source),
            InputType::SourceReleased => SpatialInput::SourceReleased(source),
        }
    }

    pub fn kind(&self) -> InputType {
        match self {
            SpatialInput::SourceDetected(_) => InputType::SourceDetected,
            SpatialInput::SourceLost(_) => InputType::SourceLost,
            SpatialInput::SourcePressed(_) => InputType::SourcePressed,
            SpatialInput::SourceUpdated(_) => InputType::SourceUpdated,
            SpatialInput::SourceReleased(_) => InputType::SourceReleased,
        }
    }

    pub fn source(&self) -> &ControllerData {
        match self {
            SpatialInput::SourceDetected(source)
            | SpatialInput::SourceLost(source)
            | SpatialInput::SourcePressed(source)
            | SpatialInput::SourceUpdated(source)
            | SpatialInput::SourceReleased(source) => source,
        }
    }

    pub fn into_source(self) -> ControllerData {
        match self {
            SpatialInput::SourceDetected(source)
            | SpatialInput::SourceLost(source)
            | SpatialInput::SourcePressed(source)
            | SpatialInput::SourceUpdated(source)
            | SpatialInput::SourceReleased(source) => source,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.source().validate()
    }
}
