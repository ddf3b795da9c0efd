//! Avatar descriptions and the measurements taken from them when spawned.

pub mod arm_span;

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::ik::SecondaryMotionSpec;
use crate::pose::{self, Pose, StoredPose};
use crate::role::RoleMap;
use crate::{Result, TrackedRole, TrackingError};

/// Eye height used when the avatar has no usable head reference.
pub const DEFAULT_EYE_HEIGHT: f32 = 1.7;
/// Arm span used when the avatar is missing arm bones or hand references.
pub const DEFAULT_ARM_SPAN: f32 = 1.8;

const TARGET_DISPLACEMENT_TOLERANCE: f32 = 0.001;
const LOW_WEIGHT_THRESHOLD: f32 = 0.1;

/// One optional pose per body role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyPoses {
    pub head: Option<StoredPose>,
    pub left_hand: Option<StoredPose>,
    pub right_hand: Option<StoredPose>,
    pub waist: Option<StoredPose>,
    pub left_foot: Option<StoredPose>,
    pub right_foot: Option<StoredPose>,
}

impl BodyPoses {
    pub fn get(&self, role: TrackedRole) -> Option<Pose> {
        let stored = match role {
            TrackedRole::Head => self.head,
            TrackedRole::LeftHand => self.left_hand,
            TrackedRole::RightHand => self.right_hand,
            TrackedRole::Waist => self.waist,
            TrackedRole::LeftFoot => self.left_foot,
            TrackedRole::RightFoot => self.right_foot,
            TrackedRole::Origin | TrackedRole::Unknown => None,
        };
        stored.map(|stored| stored.to_pose())
    }
}

/// World poses of the skeleton bones, avatar at the origin with unit scale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarBones {
    pub head: Option<StoredPose>,
    pub pelvis: Option<StoredPose>,
    pub left_shoulder: Option<StoredPose>,
    pub left_upper_arm: Option<StoredPose>,
    pub left_forearm: Option<StoredPose>,
    pub left_hand: Option<StoredPose>,
    pub right_shoulder: Option<StoredPose>,
    pub right_upper_arm: Option<StoredPose>,
    pub right_forearm: Option<StoredPose>,
    pub right_hand: Option<StoredPose>,
    pub left_foot: Option<StoredPose>,
    pub left_toes: Option<StoredPose>,
    pub right_foot: Option<StoredPose>,
    pub right_toes: Option<StoredPose>,
}

impl AvatarBones {
    /// Bone an IK target for `role` drives. Feet prefer the toes bone.
    pub fn for_role(&self, role: TrackedRole) -> Option<Pose> {
        let stored = match role {
            TrackedRole::Head => self.head,
            TrackedRole::LeftHand => self.left_hand,
            TrackedRole::RightHand => self.right_hand,
            TrackedRole::Waist => self.pelvis,
            TrackedRole::LeftFoot => self.left_toes.or(self.left_foot),
            TrackedRole::RightFoot => self.right_toes.or(self.right_foot),
            TrackedRole::Origin | TrackedRole::Unknown => None,
        };
        stored.map(|stored| stored.to_pose())
    }

    fn arm(&self, left: bool) -> Option<[Vector3<f32>; 4]> {
        let chain = if left {
            [self.left_shoulder, self.left_upper_arm, self.left_forearm, self.left_hand]
        } else {
            [self.right_shoulder, self.right_upper_arm, self.right_forearm, self.right_hand]
        };

        let mut points = [Vector3::zeros(); 4];
        for (point, bone) in points.iter_mut().zip(chain) {
            *point = Vector3::from(bone?.position);
        }
        Some(points)
    }
}

/// Authored influence of one IK target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetWeights {
    pub position: f32,
    pub rotation: f32,
}

impl TargetWeights {
    pub const ZERO: TargetWeights = TargetWeights {
        position: 0.0,
        rotation: 0.0,
    };
}

impl Default for TargetWeights {
    fn default() -> Self {
        Self {
            position: 1.0,
            rotation: 1.0,
        }
    }
}

/// Solver settings authored on the avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IkSettings {
    pub head: TargetWeights,
    pub left_arm: TargetWeights,
    pub right_arm: TargetWeights,
    pub pelvis: TargetWeights,
    pub left_leg: TargetWeights,
    pub right_leg: TargetWeights,
    pub maintain_pelvis_position: f32,
    pub plant_feet: bool,
    pub locomotion_weight: f32,
    pub fix_transforms: bool,
}

impl Default for IkSettings {
    fn default() -> Self {
        Self {
            head: TargetWeights::default(),
            left_arm: TargetWeights::default(),
            right_arm: TargetWeights::default(),
            pelvis: TargetWeights::default(),
            left_leg: TargetWeights::default(),
            right_leg: TargetWeights::default(),
            maintain_pelvis_position: 0.2,
            plant_feet: true,
            locomotion_weight: 1.0,
            fix_transforms: true,
        }
    }
}

impl IkSettings {
    pub fn weights(&self, role: TrackedRole) -> TargetWeights {
        match role {
            TrackedRole::Head => self.head,
            TrackedRole::LeftHand => self.left_arm,
            TrackedRole::RightHand => self.right_arm,
            TrackedRole::Waist => self.pelvis,
            TrackedRole::LeftFoot => self.left_leg,
            TrackedRole::RightFoot => self.right_leg,
            TrackedRole::Origin | TrackedRole::Unknown => TargetWeights::ZERO,
        }
    }
}

/// Everything the pipeline needs to know about an avatar file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarDescription {
    /// Key for per-avatar settings and manual calibration.
    pub file_name: String,
    pub display_name: String,
    /// World poses of the nodes the player's devices drive.
    pub tracking_references: BodyPoses,
    pub bones: AvatarBones,
    /// Solver targets, relative to the tracking reference of the same role.
    pub ik_targets: BodyPoses,
    pub ik: IkSettings,
    pub supports_automatic_calibration: bool,
    pub secondary_motion: Vec<SecondaryMotionSpec>,
}

impl AvatarDescription {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Measurements taken once per avatar load.
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarGeometry {
    pub eye_height: f32,
    pub arm_span: f32,
    offsets: RoleMap<Pose>,
    references: RoleMap<Pose>,
    warnings: Vec<String>,
}

impl AvatarGeometry {
    pub fn extract(description: &AvatarDescription) -> Self {
        let mut warnings = Vec::new();
        let mut references = RoleMap::new();

        for role in TrackedRole::BODY {
            let reference = description.tracking_references.get(role);
            let target = reference
                .zip(description.ik_targets.get(role))
                .map(|(reference, local)| reference * local);

            if target.is_some() {
                check_target_weight(role, description.ik.weights(role), &mut warnings);
            }

            let Some(mut reference) = reference else {
                continue;
            };

            match (description.bones.for_role(role), target) {
                (None, _) => warn_about(&mut warnings, format!("could not find {role} bone")),
                (Some(_), None) => {}
                (Some(bone), Some(target)) => {
                    let displacement = target.translation.vector - bone.translation.vector;
                    if displacement.norm() > TARGET_DISPLACEMENT_TOLERANCE {
                        warn_about(
                            &mut warnings,
                            format!(
                                "{role} bone and target positions differ; moving reference by \
                                 ({:.3}, {:.3}, {:.3})",
                                displacement.x, displacement.y, displacement.z
                            ),
                        );
                        reference.translation.vector -= displacement;
                    }
                }
            }

            references.insert(role, reference);
        }

        let mut offsets = RoleMap::new();
        for role in TrackedRole::BODY {
            let offset = static_offset(
                role,
                references.get(role),
                description.bones.for_role(role),
                description.ik_targets.get(role),
                &mut warnings,
            );
            offsets.insert(role, offset);
        }

        let eye_height = eye_height(references.get(TrackedRole::Head), &mut warnings);
        let arm_span = arm_span(
            &description.bones,
            references.get(TrackedRole::LeftHand),
            references.get(TrackedRole::RightHand),
            &mut warnings,
        );

        info!(
            avatar = %description.file_name,
            eye_height,
            arm_span,
            warnings = warnings.len(),
            "extracted avatar geometry"
        );

        Self {
            eye_height,
            arm_span,
            offsets,
            references,
            warnings,
        }
    }

    /// Pose of the solver target relative to the tracking reference of `role`.
    pub fn offset(&self, role: TrackedRole) -> Pose {
        self.offsets.get(role).copied().unwrap_or_else(Pose::identity)
    }

    /// World pose of the tracking reference of `role`, after target fixes.
    pub fn reference(&self, role: TrackedRole) -> Option<Pose> {
        self.references.get(role).copied()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

fn warn_about(warnings: &mut Vec<String>, message: String) {
    warn!("{message}");
    warnings.push(message);
}

fn check_target_weight(role: TrackedRole, weights: TargetWeights, warnings: &mut Vec<String>) {
    if weights.position <= LOW_WEIGHT_THRESHOLD {
        warn_about(
            warnings,
            format!("{role} position weight is very small ({:.2})", weights.position),
        );
    }
    if weights.rotation <= LOW_WEIGHT_THRESHOLD {
        warn_about(
            warnings,
            format!("{role} rotation weight is very small ({:.2})", weights.rotation),
        );
    }
}

fn static_offset(
    role: TrackedRole,
    reference: Option<&Pose>,
    bone: Option<Pose>,
    local_target: Option<Pose>,
    warnings: &mut Vec<String>,
) -> Pose {
    let Some(reference) = reference else {
        warn_about(warnings, format!("no tracking reference for {role}"));
        return Pose::identity();
    };

    let inverse_rotation = reference.rotation.inverse();
    let anchor = match (local_target.map(|local| reference * local), bone) {
        (Some(target), _) => target,
        (None, Some(bone)) => bone,
        (None, None) => {
            warn_about(warnings, format!("no bone nor IK target for {role}"));
            return pose::from_parts(Vector3::zeros(), inverse_rotation);
        }
    };

    let position = inverse_rotation * (anchor.translation.vector - reference.translation.vector);
    let rotation: UnitQuaternion<f32> = inverse_rotation * anchor.rotation;
    pose::from_parts(position, rotation)
}

fn eye_height(head: Option<&Pose>, warnings: &mut Vec<String>) -> f32 {
    let Some(head) = head else {
        warn_about(warnings, "avatar does not have a head tracking reference".to_string());
        return DEFAULT_EYE_HEIGHT;
    };

    let height = head.translation.y;
    if height <= 0.0 {
        debug!(height, "head reference is below the floor, using default eye height");
        return DEFAULT_EYE_HEIGHT;
    }

    trace!(height, "measured eye height");
    height
}

fn arm_span(
    bones: &AvatarBones,
    left_hand: Option<&Pose>,
    right_hand: Option<&Pose>,
    warnings: &mut Vec<String>,
) -> f32 {
    let (Some(left), Some(right)) = (bones.arm(true), bones.arm(false)) else {
        warn_about(warnings, "could not calculate arm span due to missing bones".to_string());
        return DEFAULT_ARM_SPAN;
    };

    let (Some(left_hand), Some(right_hand)) = (left_hand, right_hand) else {
        warn_about(
            warnings,
            "could not calculate arm span due to missing tracking references".to_string(),
        );
        return DEFAULT_ARM_SPAN;
    };

    let length = |chain: &[Vector3<f32>; 4], hand: &Pose| {
        chain.windows(2).map(|pair| (pair[1] - pair[0]).norm()).sum::<f32>()
            + (hand.translation.vector - chain[3]).norm()
    };

    let span = length(&left, left_hand) + (left[0] - right[0]).norm() + length(&right, right_hand);
    trace!(span, "measured arm span");
    span
}

/// An avatar instance in the scene, with its geometry and uniform scale.
#[derive(Debug, Clone)]
pub struct SpawnedAvatar {
    description: AvatarDescription,
    geometry: AvatarGeometry,
    scale: f32,
}

impl SpawnedAvatar {
    pub fn new(description: AvatarDescription) -> Self {
        let geometry = AvatarGeometry::extract(&description);
        Self {
            description,
            geometry,
            scale: 1.0,
        }
    }

    pub fn description(&self) -> &AvatarDescription {
        &self.description
    }

    pub fn geometry(&self) -> &AvatarGeometry {
        &self.geometry
    }

    pub fn file_name(&self) -> &str {
        &self.description.file_name
    }

    pub fn ik_settings(&self) -> &IkSettings {
        &self.description.ik
    }

    pub fn supports_automatic_calibration(&self) -> bool {
        self.description.supports_automatic_calibration
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) -> Result<()> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(TrackingError::InvalidInput(
                "avatar scale must be positive and finite",
            ));
        }

        info!(avatar = %self.description.file_name, scale, "resizing avatar");
        self.scale = scale;
        Ok(())
    }

    /// Scales the avatar so its arm span matches the player's.
    pub fn fit_to_arm_span(&mut self, player_arm_span: f32) -> Result<()> {
        self.set_scale(player_arm_span / self.geometry.arm_span)
    }

    /// Static target offset for `role`, scaled with the avatar.
    pub fn static_offset(&self, role: TrackedRole) -> Pose {
        pose::scale_translation(&self.geometry.offset(role), self.scale)
    }

    /// Tracking reference pose for `role`, scaled with the avatar.
    pub fn reference_pose(&self, role: TrackedRole) -> Option<Pose> {
        self.geometry
            .reference(role)
            .map(|reference| pose::scale_translation(&reference, self.scale))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn stored(x: f32, y: f32, z: f32) -> Option<StoredPose> {
        Some(StoredPose::from(pose::from_position(x, y, z)))
    }

    pub(crate) fn humanoid() -> AvatarDescription {
        let mut description = AvatarDescription {
            file_name: "humanoid.avatar".to_string(),
            display_name: "Humanoid".to_string(),
            supports_automatic_calibration: true,
            ..Default::default()
        };

        description.bones = AvatarBones {
            head: stored(0.0, 1.6, 0.0),
            pelvis: stored(0.0, 1.0, 0.0),
            left_shoulder: stored(-0.1, 1.4, 0.0),
            left_upper_arm: stored(-0.2, 1.4, 0.0),
            left_forearm: stored(-0.45, 1.4, 0.0),
            left_hand: stored(-0.7, 1.4, 0.0),
            right_shoulder: stored(0.1, 1.4, 0.0),
            right_upper_arm: stored(0.2, 1.4, 0.0),
            right_forearm: stored(0.45, 1.4, 0.0),
            right_hand: stored(0.7, 1.4, 0.0),
            left_foot: stored(-0.1, 0.1, 0.0),
            right_foot: stored(0.1, 0.1, 0.0),
            ..Default::default()
        };

        description.tracking_references = BodyPoses {
            head: stored(0.0, 1.65, 0.1),
            left_hand: stored(-0.8, 1.4, 0.0),
            right_hand: stored(0.8, 1.4, 0.0),
            waist: stored(0.0, 1.0, 0.1),
            left_foot: stored(-0.1, 0.1, 0.0),
            right_foot: stored(0.1, 0.1, 0.0),
        };

        description
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{humanoid, stored};
    use super::*;

    #[test]
    fn measures_eye_height_and_arm_span() {
        let geometry = AvatarGeometry::extract(&humanoid());

        assert!((geometry.eye_height - 1.65).abs() < 1.0e-6);
        // 0.6 per arm chain, 0.1 wrist to reference per side, 0.2 across shoulders.
        assert!((geometry.arm_span - 1.6).abs() < 1.0e-5);
        assert!(geometry.warnings().is_empty());
    }

    #[test]
    fn falls_back_to_default_metrics() {
        let mut description = humanoid();
        description.tracking_references.head = None;
        description.bones.left_forearm = None;
        let geometry = AvatarGeometry::extract(&description);

        assert_eq!(geometry.eye_height, DEFAULT_EYE_HEIGHT);
        assert_eq!(geometry.arm_span, DEFAULT_ARM_SPAN);
        assert_eq!(geometry.offset(TrackedRole::Head), Pose::identity());

        description = humanoid();
        description.tracking_references.head = stored(0.0, -0.2, 0.0);
        assert_eq!(AvatarGeometry::extract(&description).eye_height, DEFAULT_EYE_HEIGHT);
    }

    #[test]
    fn offsets_map_reference_to_bone() {
        let geometry = AvatarGeometry::extract(&humanoid());

        let waist = geometry.offset(TrackedRole::Waist);
        assert!(pose::approx_eq(&waist, &pose::from_position(0.0, 0.0, -0.1), 1.0e-6));
        let foot = geometry.offset(TrackedRole::LeftFoot);
        assert!(pose::approx_eq(&foot, &Pose::identity(), 1.0e-6));
    }

    #[test]
    fn offsets_are_expressed_in_the_reference_frame() {
        let mut description = humanoid();
        let turned = pose::from_parts(
            Vector3::new(0.0, 1.0, 0.1),
            pose::euler_degrees(0.0, 90.0, 0.0),
        );
        description.tracking_references.waist = Some(StoredPose::from(turned));
        let geometry = AvatarGeometry::extract(&description);

        let offset = geometry.offset(TrackedRole::Waist);
        let bone = (turned * offset).translation.vector;
        assert!(bone.metric_distance(&Vector3::new(0.0, 1.0, 0.0)) < 1.0e-5);
        assert!(offset.rotation.angle_to(&pose::euler_degrees(0.0, -90.0, 0.0)) < 1.0e-5);
    }

    #[test]
    fn no_bone_and_no_target_keeps_inverse_rotation() {
        let mut description = humanoid();
        let turned = pose::from_parts(
            Vector3::new(0.0, 1.0, 0.0),
            pose::euler_degrees(0.0, 90.0, 0.0),
        );
        description.tracking_references.waist = Some(StoredPose::from(turned));
        description.bones.pelvis = None;
        let geometry = AvatarGeometry::extract(&description);

        let offset = geometry.offset(TrackedRole::Waist);
        assert_eq!(offset.translation.vector, Vector3::zeros());
        assert!(offset.rotation.angle_to(&turned.rotation.inverse()) < 1.0e-6);
        assert!(!geometry.warnings().is_empty());
    }

    #[test]
    fn displaced_target_moves_the_reference() {
        let mut description = humanoid();
        description.ik_targets.waist = stored(0.0, 0.05, -0.1);
        let geometry = AvatarGeometry::extract(&description);

        let reference = geometry.reference(TrackedRole::Waist).unwrap();
        assert!(pose::approx_eq(&reference, &pose::from_position(0.0, 0.95, 0.1), 1.0e-6));
        let target = reference * geometry.offset(TrackedRole::Waist);
        assert!(pose::approx_eq(&target, &pose::from_position(0.0, 1.0, 0.0), 1.0e-6));
        assert_eq!(geometry.warnings().len(), 1);
    }

    #[test]
    fn feet_prefer_toes() {
        let mut description = humanoid();
        description.bones.left_toes = stored(-0.1, 0.0, 0.15);
        let geometry = AvatarGeometry::extract(&description);

        let foot = geometry.offset(TrackedRole::LeftFoot);
        assert!(pose::approx_eq(&foot, &pose::from_position(0.0, -0.1, 0.15), 1.0e-6));
    }

    #[test]
    fn warns_about_tiny_target_weights() {
        let mut description = humanoid();
        description.ik_targets.right_hand = stored(-0.1, 0.0, 0.0);
        description.ik.right_arm.rotation = 0.05;
        let geometry = AvatarGeometry::extract(&description);

        assert!(geometry
            .warnings()
            .iter()
            .any(|warning| warning.contains("rotation weight")));
    }

    #[test]
    fn rejects_invalid_scales() {
        let mut avatar = SpawnedAvatar::new(humanoid());

        assert!(avatar.set_scale(0.0).is_err());
        assert!(avatar.set_scale(f32::NAN).is_err());
        assert!(avatar.set_scale(-1.0).is_err());
        assert_eq!(avatar.scale(), 1.0);

        avatar.set_scale(2.0).unwrap();
        let offset = avatar.static_offset(TrackedRole::Waist);
        assert!(pose::approx_eq(&offset, &pose::from_position(0.0, 0.0, -0.2), 1.0e-6));
    }

    #[test]
    fn fits_to_player_arm_span() {
        let mut avatar = SpawnedAvatar::new(humanoid());
        avatar.fit_to_arm_span(1.6 * 1.25).unwrap();

        assert!((avatar.scale() - 1.25).abs() < 1.0e-5);
    }
}
