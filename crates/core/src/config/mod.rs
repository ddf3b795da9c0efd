use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::avatar::DEFAULT_ARM_SPAN;
use crate::Result;

/// Persisted user settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Run automatic calibration as soon as full-body trackers show up after
    /// an avatar is spawned.
    pub calibrate_full_body_tracking_on_start: bool,
    /// Last measured distance between the player's hands with arms spread.
    pub player_arm_span: f32,
    /// Scale spawned avatars so their arm span matches the player's.
    pub resize_avatar_to_arm_span: bool,
    pub automatic_calibration: AutomaticCalibrationSettings,
    /// Keyed by avatar file name.
    pub avatars: HashMap<String, AvatarSpecificSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            calibrate_full_body_tracking_on_start: false,
            player_arm_span: DEFAULT_ARM_SPAN,
            resize_avatar_to_arm_span: false,
            automatic_calibration: AutomaticCalibrationSettings::default(),
            avatars: HashMap::new(),
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Reads settings, falling back to defaults when the file is missing or
    /// malformed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!(?path, "no settings file, using defaults");
            return Self::default();
        }

        match Self::load(path) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(?path, %err, "failed to read settings, using defaults");
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Settings for an avatar, defaulted when the avatar was never seen.
    pub fn avatar(&self, file_name: &str) -> AvatarSpecificSettings {
        self.avatars.get(file_name).cloned().unwrap_or_default()
    }

    pub fn avatar_mut(&mut self, file_name: &str) -> &mut AvatarSpecificSettings {
        self.avatars.entry(file_name.to_string()).or_default()
    }
}

/// Per-avatar switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarSpecificSettings {
    pub use_automatic_calibration: bool,
    /// Ignore every calibration offset for this avatar.
    pub bypass_calibration: bool,
    /// Stored for the avatar editor, which decides what to hide from the
    /// first-person view. Nothing in the tracking path reads it.
    pub ignore_exclusions: bool,
}

/// Inputs of the formula-based adjustment applied with automatic calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomaticCalibrationSettings {
    /// Metres between a foot tracker and the sole.
    pub leg_offset: f32,
    /// Metres between the waist tracker and the pelvis.
    pub pelvis_offset: f32,
    pub waist_tracker_facing: WaistTrackerFacing,
}

impl Default for AutomaticCalibrationSettings {
    fn default() -> Self {
        Self {
            leg_offset: 0.15,
            pelvis_offset: 0.1,
            waist_tracker_facing: WaistTrackerFacing::Front,
        }
    }
}

/// Side of the body the waist tracker is strapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WaistTrackerFacing {
    #[default]
    Front,
    Left,
    Right,
    Back,
}

impl WaistTrackerFacing {
    /// Yaw in degrees from a front-mounted tracker to this mounting.
    pub fn yaw_degrees(self) -> f32 {
        match self {
            WaistTrackerFacing::Front => 0.0,
            WaistTrackerFacing::Left => 90.0,
            WaistTrackerFacing::Right => -90.0,
            WaistTrackerFacing::Back => 180.0,
        }
    }
}

/// Where the pipeline reads and writes its persisted state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub settings_path: Option<String>,
    pub calibration_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(Settings::load(&path).is_err());
        assert_eq!(Settings::load_or_default(&path), Settings::default());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "automatic_calibration": { "leg_offset": 0.2 } }"#).unwrap();

        assert_eq!(settings.automatic_calibration.leg_offset, 0.2);
        assert_eq!(settings.automatic_calibration.pelvis_offset, 0.1);
        assert!(!settings.calibrate_full_body_tracking_on_start);
        assert_eq!(settings.player_arm_span, DEFAULT_ARM_SPAN);
    }

    #[test]
    fn saves_and_reloads_avatar_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.avatar_mut("robot.avatar").bypass_calibration = true;
        settings.avatar_mut("robot.avatar").ignore_exclusions = true;
        settings.automatic_calibration.waist_tracker_facing = WaistTrackerFacing::Back;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert!(loaded.avatar("robot.avatar").bypass_calibration);
        assert!(loaded.avatar("robot.avatar").ignore_exclusions);
        assert!(!loaded.avatar("other.avatar").bypass_calibration);
        assert_eq!(loaded.automatic_calibration.waist_tracker_facing, WaistTrackerFacing::Back);
    }
}
