//! Automatic and manual full-body calibration.

use nalgebra::Vector3;
use tracing::{info, warn};

use super::{CalibrationSlot, FullBodyCalibration};
use crate::avatar::SpawnedAvatar;
use crate::config::Settings;
use crate::player::PlayerSpace;
use crate::pose::{self, Pose};
use crate::TrackedRole;

/// Waist height as a fraction of head height.
const WAIST_HEIGHT_RATIO: f32 = 14.0 / 22.5;

/// Where `role`'s tracker should sit once calibrated, in the player's space,
/// given the raw head and tracker poses.
pub fn automatic_target(role: TrackedRole, head: &Pose, raw: &Pose) -> Option<Pose> {
    let up = Vector3::y();
    let position = raw.translation.vector;

    match role {
        TrackedRole::Waist => {
            let facing = pose::project_on_plane(&pose::forward(&raw.rotation), &up);
            Some(pose::from_parts(
                Vector3::new(position.x, head.translation.y * WAIST_HEIGHT_RATIO, position.z),
                pose::look_rotation(&facing, &up),
            ))
        }
        TrackedRole::LeftFoot | TrackedRole::RightFoot => {
            let toes = pose::project_on_plane(&pose::up(&raw.rotation), &up);
            Some(pose::from_parts(
                Vector3::new(position.x, 0.0, position.z),
                pose::look_rotation(&up, &toes),
            ))
        }
        _ => None,
    }
}

/// Computes a full automatic calibration from the current readings. Roles
/// that are not tracked are left uncalibrated.
pub fn automatic_calibration(space: &PlayerSpace, head: &Pose) -> FullBodyCalibration {
    let mut calibration = FullBodyCalibration::default();

    for role in TrackedRole::FULL_BODY {
        let (raw, tracking) = space.raw_reading(role);
        let slot = match automatic_target(role, head, &raw) {
            Some(target) if tracking => CalibrationSlot::from_pose(&(raw.inverse() * target)),
            _ => CalibrationSlot::Uncalibrated,
        };
        calibration.set_slot(role, slot);
    }

    calibration.is_calibrated = true;
    calibration
}

/// Replaces the automatic calibration from the current readings and switches
/// the avatar to it. Needs a tracked head and an avatar that supports it.
pub fn calibrate_automatic(
    space: &mut PlayerSpace,
    settings: &mut Settings,
    avatar: Option<&SpawnedAvatar>,
) -> bool {
    let Some(avatar) = avatar else {
        warn!("no avatar spawned, skipping automatic calibration");
        return false;
    };

    if !avatar.supports_automatic_calibration() {
        warn!(avatar = %avatar.file_name(), "avatar does not support automatic calibration");
        return false;
    }

    let (head, head_tracking) = space.raw_reading(TrackedRole::Head);
    if !head_tracking {
        warn!("head is not tracked, skipping automatic calibration");
        return false;
    }

    let calibration = automatic_calibration(space, &head);
    space.calibration_mut().automatic = calibration;
    settings.avatar_mut(avatar.file_name()).use_automatic_calibration = true;

    info!(avatar = %avatar.file_name(), "calibrated full body tracking automatically");
    true
}

/// Starts manual calibration. Does nothing without an avatar.
pub fn begin_manual(space: &mut PlayerSpace) -> bool {
    space.enter_calibration_mode()
}

/// Captures the current readings as the avatar's manual calibration and
/// switches the avatar to it.
pub fn save_manual(space: &mut PlayerSpace, settings: &mut Settings) -> bool {
    let Some(file_name) = space.avatar_file_name().map(str::to_string) else {
        warn!("no avatar spawned, nothing to save");
        return false;
    };

    if !space.exit_calibration_mode(true) {
        return false;
    }

    settings.avatar_mut(&file_name).use_automatic_calibration = false;
    true
}

/// Leaves manual calibration without touching stored offsets.
pub fn cancel_manual(space: &mut PlayerSpace) {
    space.exit_calibration_mode(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::fixtures::humanoid;
    use crate::calibration::{CalibrationData, CalibrationKind};
    use crate::device::{DeviceRegistry, DeviceSlot, SimulatedBackend};
    use crate::source::PoseSources;

    fn space_with(
        head: Option<Pose>,
        waist: Pose,
        foot: Pose,
        settings: &Settings,
    ) -> (PlayerSpace, SpawnedAvatar) {
        let backend = SimulatedBackend::with_slots(vec![
            DeviceSlot::tracker("vive_tracker_waist", "Tracker 3", "W").with_pose(&waist),
            DeviceSlot::tracker("vive_tracker_left_foot", "Tracker 3", "L").with_pose(&foot),
        ]);
        let mut registry = DeviceRegistry::new(backend);
        registry.poll();

        let mut sources = PoseSources::new();
        if let Some(head) = head {
            let id = sources.register("headset");
            sources.set_pose(id, head);
            sources.push(TrackedRole::Head, id);
        }

        let avatar = SpawnedAvatar::new(humanoid());
        let mut space = PlayerSpace::new(CalibrationData::default());
        space.set_avatar(Some(&avatar));
        space.update(&registry, &sources, settings);
        (space, avatar)
    }

    #[test]
    fn waist_target_uses_head_height_and_flattened_facing() {
        let head = pose::from_position(0.0, 1.8, 0.0);
        let raw = pose::from_parts(
            Vector3::new(0.1, 1.0, 0.2),
            pose::euler_degrees(20.0, 45.0, 0.0),
        );
        let target = automatic_target(TrackedRole::Waist, &head, &raw).unwrap();

        assert!((target.translation.vector - Vector3::new(0.1, 1.12, 0.2)).norm() < 1.0e-5);
        assert!(target.rotation.angle_to(&pose::euler_degrees(0.0, 45.0, 0.0)) < 1.0e-4);
    }

    #[test]
    fn foot_target_lies_flat_on_the_floor() {
        let head = pose::from_position(0.0, 1.8, 0.0);
        let raw = pose::from_parts(
            Vector3::new(-0.1, 0.12, 0.05),
            pose::euler_degrees(90.0, 90.0, 0.0),
        );
        let target = automatic_target(TrackedRole::LeftFoot, &head, &raw).unwrap();

        assert!((target.translation.vector - Vector3::new(-0.1, 0.0, 0.05)).norm() < 1.0e-6);
        assert!((pose::forward(&target.rotation) - Vector3::y()).norm() < 1.0e-5);
        assert!((pose::up(&target.rotation) - Vector3::x()).norm() < 1.0e-5);
    }

    #[test]
    fn automatic_requires_a_tracked_head() {
        let mut settings = Settings::default();
        let (mut space, avatar) = space_with(None, Pose::identity(), Pose::identity(), &settings);

        assert!(!calibrate_automatic(&mut space, &mut settings, Some(&avatar)));
        assert_eq!(space.calibration().automatic, FullBodyCalibration::default());
        assert!(!settings.avatar("humanoid.avatar").use_automatic_calibration);
    }

    #[test]
    fn automatic_requires_support() {
        let mut settings = Settings::default();
        let head = Some(pose::from_position(0.0, 1.7, 0.0));
        let (mut space, _) = space_with(head, Pose::identity(), Pose::identity(), &settings);
        let mut description = humanoid();
        description.supports_automatic_calibration = false;
        let unsupported = SpawnedAvatar::new(description);

        assert!(!calibrate_automatic(&mut space, &mut settings, Some(&unsupported)));
        assert!(!calibrate_automatic(&mut space, &mut settings, None));
    }

    #[test]
    fn automatic_overwrites_the_slot_and_switches_the_avatar() {
        let mut settings = Settings::default();
        let head = Some(pose::from_position(0.0, 0.9 * 22.5 / 14.0, 0.0));
        let waist = pose::from_position(0.0, 0.95, 0.1);
        let (mut space, avatar) =
            space_with(head, waist, pose::from_position(-0.1, 0.1, 0.0), &settings);
        space.set_calibration_offset(
            CalibrationKind::Automatic,
            TrackedRole::RightFoot,
            CalibrationSlot::Identity,
        );

        assert!(calibrate_automatic(&mut space, &mut settings, Some(&avatar)));

        let automatic = &space.calibration().automatic;
        assert!(automatic.is_calibrated);
        assert_eq!(automatic.right_foot, CalibrationSlot::Uncalibrated);
        assert!(pose::approx_eq(
            &(waist * automatic.pose(TrackedRole::Waist)),
            &pose::from_position(0.0, 0.9, 0.1),
            1.0e-5
        ));
        assert!(settings.avatar("humanoid.avatar").use_automatic_calibration);

        let again = automatic.clone();
        assert!(calibrate_automatic(&mut space, &mut settings, Some(&avatar)));
        assert_eq!(space.calibration().automatic, again);
    }

    #[test]
    fn manual_save_switches_the_avatar_to_manual() {
        let mut settings = Settings::default();
        settings.avatar_mut("humanoid.avatar").use_automatic_calibration = true;
        let (mut space, _) =
            space_with(None, pose::from_position(0.0, 1.0, 0.0), Pose::identity(), &settings);

        assert!(!save_manual(&mut space, &mut settings));
        assert!(begin_manual(&mut space));
        assert!(save_manual(&mut space, &mut settings));

        assert!(!settings.avatar("humanoid.avatar").use_automatic_calibration);
        assert!(space.calibration().manual("humanoid.avatar").unwrap().is_calibrated);
        assert!(!space.is_calibration_mode_active());
    }

    #[test]
    fn cancel_leaves_offsets_alone() {
        let settings = Settings::default();
        let (mut space, _) =
            space_with(None, pose::from_position(0.0, 1.0, 0.0), Pose::identity(), &settings);

        begin_manual(&mut space);
        cancel_manual(&mut space);

        assert!(space.calibration().manual.is_empty());
        assert!(!space.is_calibration_mode_active());
    }
}
