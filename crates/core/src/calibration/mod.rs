//! Stored calibration offsets and the procedures that produce them.

pub mod procedures;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pose::{self, Pose, StoredPose};
use crate::{Result, TrackedRole};

const IDENTITY_TOLERANCE: f32 = 1.0e-6;

/// Which offset store a calibration reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalibrationKind {
    /// Single process-wide slot filled by the formula-based procedure.
    Automatic,
    /// One entry per avatar file, filled by the user aligning trackers.
    Manual,
}

/// Stored offset for one role.
///
/// `Uncalibrated` and `Identity` both apply as the identity transform but are
/// kept apart so a role that was never captured can be told from one that was
/// deliberately captured with no offset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CalibrationSlot {
    #[default]
    Uncalibrated,
    Identity,
    Offset { pose: StoredPose },
}

impl CalibrationSlot {
    pub fn from_pose(pose: &Pose) -> Self {
        if pose::approx_eq(pose, &Pose::identity(), IDENTITY_TOLERANCE) {
            CalibrationSlot::Identity
        } else {
            CalibrationSlot::Offset {
                pose: StoredPose::from(pose),
            }
        }
    }

    pub fn pose(&self) -> Pose {
        match self {
            CalibrationSlot::Uncalibrated | CalibrationSlot::Identity => Pose::identity(),
            CalibrationSlot::Offset { pose } => pose.to_pose(),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        !matches!(self, CalibrationSlot::Uncalibrated)
    }
}

/// Offsets for the three full-body roles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FullBodyCalibration {
    pub waist: CalibrationSlot,
    pub left_foot: CalibrationSlot,
    pub right_foot: CalibrationSlot,
    pub is_calibrated: bool,
}

impl FullBodyCalibration {
    pub fn slot(&self, role: TrackedRole) -> CalibrationSlot {
        match role {
            TrackedRole::Waist => self.waist,
            TrackedRole::LeftFoot => self.left_foot,
            TrackedRole::RightFoot => self.right_foot,
            _ => CalibrationSlot::Uncalibrated,
        }
    }

    /// Writes one role. Other roles are ignored.
    pub fn set_slot(&mut self, role: TrackedRole, slot: CalibrationSlot) {
        match role {
            TrackedRole::Waist => self.waist = slot,
            TrackedRole::LeftFoot => self.left_foot = slot,
            TrackedRole::RightFoot => self.right_foot = slot,
            _ => return,
        }
        self.is_calibrated = true;
    }

    pub fn pose(&self, role: TrackedRole) -> Pose {
        self.slot(role).pose()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Automatic slot plus per-avatar manual entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationData {
    pub automatic: FullBodyCalibration,
    pub manual: HashMap<String, FullBodyCalibration>,
}

impl CalibrationData {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let data: CalibrationData = serde_json::from_str(&content)?;
        Ok(data)
    }

    /// Reads calibration data, falling back to an empty store when the file
    /// is missing or malformed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!(?path, "no calibration file, starting uncalibrated");
            return Self::default();
        }

        match Self::load(path) {
            Ok(data) => data,
            Err(err) => {
                warn!(?path, %err, "failed to read calibration data, starting uncalibrated");
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn manual(&self, avatar: &str) -> Option<&FullBodyCalibration> {
        self.manual.get(avatar)
    }

    pub fn manual_mut(&mut self, avatar: &str) -> &mut FullBodyCalibration {
        self.manual.entry(avatar.to_string()).or_default()
    }

    /// Entry a calibration of `kind` reads from. Manual lookups for unknown
    /// avatars yield `None`.
    pub fn entry(
        &self,
        kind: CalibrationKind,
        avatar: Option<&str>,
    ) -> Option<&FullBodyCalibration> {
        match kind {
            CalibrationKind::Automatic => Some(&self.automatic),
            CalibrationKind::Manual => avatar.and_then(|avatar| self.manual(avatar)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_and_uncalibrated_stay_distinct() {
        assert_eq!(CalibrationSlot::from_pose(&Pose::identity()), CalibrationSlot::Identity);
        assert!(CalibrationSlot::Identity.is_calibrated());
        assert!(!CalibrationSlot::Uncalibrated.is_calibrated());
        assert_eq!(CalibrationSlot::Uncalibrated.pose(), CalibrationSlot::Identity.pose());
    }

    #[test]
    fn tri_state_survives_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");

        let mut data = CalibrationData::default();
        data.automatic
            .set_slot(
                TrackedRole::Waist,
                CalibrationSlot::from_pose(&pose::from_position(0.0, 0.9, 0.1)),
            );
        let manual = data.manual_mut("robot.avatar");
        manual.set_slot(TrackedRole::LeftFoot, CalibrationSlot::Identity);
        manual.set_slot(TrackedRole::RightFoot, CalibrationSlot::Uncalibrated);
        data.save(&path).unwrap();

        let loaded = CalibrationData::load(&path).unwrap();
        assert_eq!(loaded, data);
        let manual = loaded.manual("robot.avatar").unwrap();
        assert_eq!(manual.waist, CalibrationSlot::Uncalibrated);
        assert_eq!(manual.left_foot, CalibrationSlot::Identity);
        assert!(manual.is_calibrated);
    }

    #[test]
    fn malformed_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(&path, r#"{ "automatic": { "waist": { "state": "sideways" } } }"#).unwrap();

        assert_eq!(CalibrationData::load_or_default(&path), CalibrationData::default());
    }

    #[test]
    fn clearing_resets_every_slot() {
        let mut entry = FullBodyCalibration::default();
        entry.set_slot(TrackedRole::Waist, CalibrationSlot::Identity);
        entry.set_slot(TrackedRole::Head, CalibrationSlot::Identity);
        assert!(entry.is_calibrated);

        entry.clear();
        assert_eq!(entry, FullBodyCalibration::default());
    }
}
