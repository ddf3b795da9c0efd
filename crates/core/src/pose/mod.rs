//! Rigid pose helpers shared by every stage of the pipeline.
//!
//! Poses are `nalgebra` isometries in a Y-up, Z-forward frame. Composition
//! `parent * local` expresses `local` in `parent`'s frame.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Position and orientation of a node relative to its parent.
pub type Pose = Isometry3<f32>;

const DEGENERATE_EPSILON: f32 = 1.0e-6;

/// Builds a pose from a position and a rotation.
pub fn from_parts(position: Vector3<f32>, rotation: UnitQuaternion<f32>) -> Pose {
    Isometry3::from_parts(Translation3::from(position), rotation)
}

/// Builds a translation-only pose.
pub fn from_position(x: f32, y: f32, z: f32) -> Pose {
    from_parts(Vector3::new(x, y, z), UnitQuaternion::identity())
}

/// Rotation from Euler angles in degrees, applied Z first, then X, then Y.
pub fn euler_degrees(x: f32, y: f32, z: f32) -> UnitQuaternion<f32> {
    let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), y.to_radians());
    let pitch = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), x.to_radians());
    let roll = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), z.to_radians());
    yaw * pitch * roll
}

/// Rotation whose local +Z points along `forward` and whose +Y leans towards
/// `up`. Degenerate inputs fall back to the identity.
pub fn look_rotation(forward: &Vector3<f32>, up: &Vector3<f32>) -> UnitQuaternion<f32> {
    if forward.norm_squared() < DEGENERATE_EPSILON {
        return UnitQuaternion::identity();
    }

    if forward.cross(up).norm_squared() < DEGENERATE_EPSILON {
        return UnitQuaternion::rotation_between(&Vector3::z(), forward)
            .unwrap_or_else(UnitQuaternion::identity);
    }

    UnitQuaternion::face_towards(forward, up)
}

/// Removes the component of `vector` along `normal`.
pub fn project_on_plane(vector: &Vector3<f32>, normal: &Vector3<f32>) -> Vector3<f32> {
    let length_squared = normal.norm_squared();
    if length_squared < DEGENERATE_EPSILON {
        return *vector;
    }
    vector - normal * (vector.dot(normal) / length_squared)
}

/// Local +Z axis of `rotation`.
pub fn forward(rotation: &UnitQuaternion<f32>) -> Vector3<f32> {
    rotation * Vector3::z()
}

/// Local +Y axis of `rotation`.
pub fn up(rotation: &UnitQuaternion<f32>) -> Vector3<f32> {
    rotation * Vector3::y()
}

/// Returns `pose` with its translation multiplied by `scale`.
pub fn scale_translation(pose: &Pose, scale: f32) -> Pose {
    from_parts(pose.translation.vector * scale, pose.rotation)
}

/// True when both translation and rotation agree within `tolerance`
/// (metres and radians respectively).
pub fn approx_eq(a: &Pose, b: &Pose, tolerance: f32) -> bool {
    (a.translation.vector - b.translation.vector).norm() <= tolerance
        && a.rotation.angle_to(&b.rotation) <= tolerance
}

/// Serialisable pose used by the settings and calibration stores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredPose {
    /// Position (x, y, z).
    pub position: [f32; 3],
    /// Rotation quaternion (x, y, z, w).
    pub rotation: [f32; 4],
}

impl StoredPose {
    pub fn new(position: [f32; 3], rotation: [f32; 4]) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self {
            position: [0.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Converts to a pose, renormalising the stored quaternion. A zero
    /// quaternion decodes as the identity rotation.
    pub fn to_pose(&self) -> Pose {
        let [x, y, z, w] = self.rotation;
        let raw = nalgebra::Quaternion::new(w, x, y, z);
        let rotation = if raw.norm() < DEGENERATE_EPSILON {
            UnitQuaternion::identity()
        } else {
            UnitQuaternion::from_quaternion(raw)
        };
        from_parts(Vector3::from(self.position), rotation)
    }
}

impl Default for StoredPose {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<&Pose> for StoredPose {
    fn from(pose: &Pose) -> Self {
        let t = pose.translation.vector;
        let q = pose.rotation.quaternion();
        Self {
            position: [t.x, t.y, t.z],
            rotation: [q.i, q.j, q.k, q.w],
        }
    }
}

impl From<Pose> for StoredPose {
    fn from(pose: Pose) -> Self {
        Self::from(&pose)
    }
}

impl From<StoredPose> for Pose {
    fn from(stored: StoredPose) -> Self {
        stored.to_pose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaw_turns_forward_around_up() {
        let rotation = euler_degrees(0.0, 90.0, 0.0);
        let turned = forward(&rotation);
        assert!((turned - Vector3::x()).norm() < 1.0e-5);
    }

    #[test]
    fn look_rotation_maps_forward_and_keeps_up() {
        let rotation = look_rotation(&Vector3::new(1.0, 0.0, 0.0), &Vector3::y());
        assert!((forward(&rotation) - Vector3::x()).norm() < 1.0e-5);
        assert!((up(&rotation) - Vector3::y()).norm() < 1.0e-5);
    }

    #[test]
    fn look_rotation_survives_parallel_up() {
        let rotation = look_rotation(&Vector3::y(), &Vector3::y());
        assert!((forward(&rotation) - Vector3::y()).norm() < 1.0e-5);
    }

    #[test]
    fn projection_drops_normal_component() {
        let projected = project_on_plane(&Vector3::new(1.0, 2.0, 3.0), &Vector3::y());
        assert_eq!(projected, Vector3::new(1.0, 0.0, 3.0));
    }

    #[test]
    fn stored_pose_keeps_rotation() {
        let pose = from_parts(Vector3::new(0.1, 0.9, 0.2), euler_degrees(10.0, 45.0, 0.0));
        let restored = StoredPose::from(&pose).to_pose();
        assert!(approx_eq(&pose, &restored, 1.0e-5));
    }

    #[test]
    fn zero_quaternion_decodes_as_identity() {
        let stored = StoredPose::new([0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(stored.to_pose().rotation, UnitQuaternion::identity());
    }
}
