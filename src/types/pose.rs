//! Stereo view pose with dual timestamps.

use serde::{Deserialize, Serialize};

use super::{Fov, Matrix4x4, Pose, Quaternion, Vector3};

/// Per-eye pose and field of view sampled on the client.
///
/// `frame_timestamp` names the render frame the pose belongs to and
/// `pose_timestamp` records when it was sampled, both in microseconds. The
/// server echoes both back unchanged in [`super::FrameInfo::pose`] so the
/// client can measure latency and reproject.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct XrPose {
    pub frame_timestamp: i64,
    pub pose_timestamp: i64,
    pub pose_left: Pose,
    pub pose_right: Pose,
    pub fov_left: Fov,
    pub fov_right: Fov,
}

impl XrPose {
    pub fn is_finite(&self) -> bool {
        [self.pose_left, self.pose_right]
            .iter()
            .all(|pose| pose.position.is_finite() && pose.orientation.is_finite())
    }
}

/// Pose layout of older clients (`IsarXrPose_Deprecated`): per-eye view and
/// projection matrices and a single timestamp.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LegacyXrPose {
    pub timestamp: i64,
    pub view_left: Matrix4x4,
    pub view_right: Matrix4x4,
    pub projection_left: Matrix4x4,
    pub projection_right: Matrix4x4,
}

impl LegacyXrPose {
    /// Converts to the current layout. The single timestamp becomes both
    /// the frame and the pose timestamp.
    pub fn to_xr_pose(&self) -> XrPose {
        XrPose {
            frame_timestamp: self.timestamp,
            pose_timestamp: self.timestamp,
            pose_left: pose_from_view(&self.view_left),
            pose_right: pose_from_view(&self.view_right),
            fov_left: fov_from_projection(&self.projection_left),
            fov_right: fov_from_projection(&self.projection_right),
        }
    }
}

/// Eye pose from a rigid world-to-eye matrix: the inverse transform.
fn pose_from_view(view: &Matrix4x4) -> Pose {
    let r = |row: usize, column: usize| view.at(row, column);
    let t = Vector3::new(r(0, 3), r(1, 3), r(2, 3));
    let position = Vector3::new(
        -(r(0, 0) * t.x + r(1, 0) * t.y + r(2, 0) * t.z),
        -(r(0, 1) * t.x + r(1, 1) * t.y + r(2, 1) * t.z),
        -(r(0, 2) * t.x + r(1, 2) * t.y + r(2, 2) * t.z),
    );
    Pose { position, orientation: quaternion_from_rotation(|row, column| r(column, row)) }
}

fn quaternion_from_rotation(m: impl Fn(usize, usize) -> f32) -> Quaternion {
    let trace = m(0, 0) + m(1, 1) + m(2, 2);
    let q = if trace > 0.0 {
        let s = (trace + 1.0).sqrt() * 2.0;
        Quaternion::new((m(2, 1) - m(1, 2)) / s, (m(0, 2) - m(2, 0)) / s, (m(1, 0) - m(0, 1)) / s, 0.25 * s)
    } else if m(0, 0) > m(1, 1) && m(0, 0) > m(2, 2) {
        let s = (1.0 + m(0, 0) - m(1, 1) - m(2, 2)).sqrt() * 2.0;
        Quaternion::new(0.25 * s, (m(0, 1) + m(1, 0)) / s, (m(0, 2) + m(2, 0)) / s, (m(2, 1) - m(1, 2)) / s)
    } else if m(1, 1) > m(2, 2) {
        let s = (1.0 + m(1, 1) - m(0, 0) - m(2, 2)).sqrt() * 2.0;
        Quaternion::new((m(0, 1) + m(1, 0)) / s, 0.25 * s, (m(1, 2) + m(2, 1)) / s, (m(0, 2) - m(2, 0)) / s)
    } else {
        let s = (1.0 + m(2, 2) - m(0, 0) - m(1, 1)).sqrt() * 2.0;
        Quaternion::new((m(0, 2) + m(2, 0)) / s, (m(1, 2) + m(2, 1)) / s, 0.25 * s, (m(1, 0) - m(0, 1)) / s)
    };
    q.normalize()
}

/// Half-angles of an off-axis perspective projection.
fn fov_from_projection(projection: &Matrix4x4) -> Fov {
    let (p00, p02) = (projection.at(0, 0), projection.at(0, 2));
    let (p11, p12) = (projection.at(1, 1), projection.at(1, 2));
    if p00 == 0.0 || p11 == 0.0 {
        return Fov::default();
    }
    Fov {
        left: ((p02 - 1.0) / p00).atan(),
        right: ((p02 + 1.0) / p00).atan(),
        up: ((p12 + 1.0) / p11).atan(),
        down: ((p12 - 1.0) / p11).atan(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn view_translation_is_inverted() {
        let mut view = Matrix4x4::IDENTITY;
        // Column-major: translation lives in the last column.
        view.m[14] = -2.0;
        let pose = pose_from_view(&view);
        assert!(close(pose.position.z, 2.0));
        assert_eq!(pose.orientation, Quaternion::IDENTITY);
    }

    #[test]
    fn view_rotation_is_inverted() {
        // 90 degrees around +y.
        let mut view = Matrix4x4::IDENTITY;
        view.m[0] = 0.0;
        view.m[10] = 0.0;
        view.m[8] = 1.0;
        view.m[2] = -1.0;
        let orientation = pose_from_view(&view).orientation;
        assert!(close(orientation.y, -FRAC_PI_4.sin()));
        assert!(close(orientation.w, FRAC_PI_4.cos()));
    }

    #[test]
    fn symmetric_projection_yields_symmetric_fov() {
        let fov = fov_from_projection(&Matrix4x4::IDENTITY);
        assert!(close(fov.left, -FRAC_PI_4));
        assert!(close(fov.right, FRAC_PI_4));
        assert!(close(fov.up, FRAC_PI_4));
        assert!(close(fov.down, -FRAC_PI_4));
    }

    #[test]
    fn legacy_timestamp_fills_both_fields() {
        let legacy = LegacyXrPose { timestamp: 1_234, ..Default::default() };
        let pose = legacy.to_xr_pose();
        assert_eq!((pose.frame_timestamp, pose.pose_timestamp), (1_234, 1_234));
        assert!(pose.is_finite());
    }
}
