//! The player's tracked space: one node chain per role on top of a
//! [`PoseGraph`].
//!
//! ```text
//! Origin
//! ├── Head / Left Hand / Right Hand        (pose source stack)
//! │   └── <role> Target                    (avatar static offset)
//! ├── Full Body Space
//! │   └── Waist / Left Foot / Right Foot   (raw device pose)
//! │       └── Calibration Offset           (automatic or manual calibration)
//! │           └── Manual Offset            (formula offset, automatic only)
//! │               └── <role> Target        (avatar static offset)
//! └── Calibration Space
//!     └── <role> Reference                 (avatar tracking reference)
//! ```
//!
//! While calibration mode is active each full-body target hangs off its
//! reference node instead of its manual offset node.

use tracing::{debug, info, warn};

use crate::avatar::SpawnedAvatar;
use crate::calibration::{CalibrationData, CalibrationKind, CalibrationSlot, FullBodyCalibration};
use crate::config::{AutomaticCalibrationSettings, Settings};
use crate::device::{DeviceRegistry, TrackingBackend};
use crate::pose::{self, Pose};
use crate::role::RoleMap;
use crate::source::PoseSources;
use crate::space::{NodeId, PoseGraph};
use crate::TrackedRole;

#[derive(Debug, Clone, Copy)]
struct SimpleChain {
    root: NodeId,
    target: NodeId,
}

#[derive(Debug, Clone, Copy)]
struct FullBodyChain {
    root: NodeId,
    calibration: NodeId,
    manual: NodeId,
    target: NodeId,
    reference: NodeId,
}

/// Snapshot of the spawned avatar the space needs every tick.
#[derive(Debug, Clone)]
struct AvatarFrame {
    file_name: String,
    offsets: RoleMap<Pose>,
    references: RoleMap<Pose>,
}

impl AvatarFrame {
    fn new(avatar: &SpawnedAvatar) -> Self {
        let mut offsets = RoleMap::new();
        let mut references = RoleMap::new();

        for role in TrackedRole::BODY {
            offsets.insert(role, avatar.static_offset(role));
            if let Some(reference) = avatar.reference_pose(role) {
                references.insert(role, reference);
            }
        }

        Self {
            file_name: avatar.file_name().to_string(),
            offsets,
            references,
        }
    }

    fn offset(&self, role: TrackedRole) -> Pose {
        self.offsets.get(role).copied().unwrap_or_else(Pose::identity)
    }
}

/// Layered pose chains for every role, plus the calibration offset store.
#[derive(Debug)]
pub struct PlayerSpace {
    graph: PoseGraph,
    origin: NodeId,
    simple: RoleMap<SimpleChain>,
    full_body: RoleMap<FullBodyChain>,
    tracking: RoleMap<bool>,
    calibration: CalibrationData,
    avatar: Option<AvatarFrame>,
    calibration_mode: bool,
}

impl PlayerSpace {
    pub fn new(calibration: CalibrationData) -> Self {
        let mut graph = PoseGraph::new();
        let origin = graph.add("Origin", None, Pose::identity());

        let mut simple = RoleMap::new();
        for role in [TrackedRole::Head, TrackedRole::LeftHand, TrackedRole::RightHand] {
            let name = node_name(role);
            let root = graph.add(name, Some(origin), Pose::identity());
            let target = graph.add(format!("{name} Target"), Some(root), Pose::identity());
            simple.insert(role, SimpleChain { root, target });
        }

        let full_body_space = graph.add("Full Body Space", Some(origin), Pose::identity());
        let calibration_space = graph.add("Calibration Space", Some(origin), Pose::identity());

        let mut full_body = RoleMap::new();
        for role in TrackedRole::FULL_BODY {
            let name = node_name(role);
            let root = graph.add(name, Some(full_body_space), Pose::identity());
            let calibration = graph.add("Calibration Offset", Some(root), Pose::identity());
            let manual = graph.add("Manual Offset", Some(calibration), Pose::identity());
            let target = graph.add(format!("{name} Target"), Some(manual), Pose::identity());
            let reference = graph.add(
                format!("{name} Reference"),
                Some(calibration_space),
                Pose::identity(),
            );
            full_body.insert(
                role,
                FullBodyChain {
                    root,
                    calibration,
                    manual,
                    target,
                    reference,
                },
            );
        }

        Self {
            graph,
            origin,
            simple,
            full_body,
            tracking: RoleMap::new(),
            calibration,
            avatar: None,
            calibration_mode: false,
        }
    }

    pub fn graph(&self) -> &PoseGraph {
        &self.graph
    }

    pub fn calibration(&self) -> &CalibrationData {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut CalibrationData {
        &mut self.calibration
    }

    pub fn avatar_file_name(&self) -> Option<&str> {
        self.avatar.as_ref().map(|avatar| avatar.file_name.as_str())
    }

    /// Points the space at a newly spawned, rescaled or unloaded avatar.
    /// Leaves calibration mode when the avatar goes away.
    pub fn set_avatar(&mut self, avatar: Option<&SpawnedAvatar>) {
        let switched = self.avatar_file_name() != avatar.map(SpawnedAvatar::file_name);
        if switched && self.calibration_mode {
            self.exit_calibration_mode(false);
        }

        self.avatar = avatar.map(AvatarFrame::new);

        let offset = |frame: &Option<AvatarFrame>, role| {
            frame.as_ref().map_or_else(Pose::identity, |frame| frame.offset(role))
        };

        for (role, chain) in self.simple.iter() {
            self.graph.set_local(chain.target, offset(&self.avatar, role));
        }

        for (role, chain) in self.full_body.iter() {
            self.graph.set_local(chain.target, offset(&self.avatar, role));
            let reference = self
                .avatar
                .as_ref()
                .and_then(|frame| frame.references.get(role).copied())
                .unwrap_or_else(Pose::identity);
            self.graph.set_local(chain.reference, reference);
        }
    }

    /// Refreshes every per-tick local pose from the current inputs.
    pub fn update<B: TrackingBackend>(
        &mut self,
        registry: &DeviceRegistry<B>,
        sources: &PoseSources,
        settings: &Settings,
    ) {
        let origin = sources.pose(TrackedRole::Origin).unwrap_or_else(Pose::identity);
        self.graph.set_local(self.origin, origin);

        for (role, chain) in self.simple.iter() {
            let pose = sources.pose(role);
            self.graph.set_local(chain.root, pose.unwrap_or_else(Pose::identity));
            self.tracking.insert(role, pose.is_some());
        }

        let avatar = self.avatar.as_ref().map(|frame| frame.file_name.as_str());
        let avatar_settings = avatar.map(|file_name| settings.avatar(file_name));
        let entry = match &avatar_settings {
            Some(avatar_settings) if !avatar_settings.bypass_calibration => {
                let kind = if avatar_settings.use_automatic_calibration {
                    CalibrationKind::Automatic
                } else {
                    CalibrationKind::Manual
                };
                self.calibration.entry(kind, avatar)
            }
            _ => None,
        };
        let use_manual_offset = avatar_settings
            .as_ref()
            .map_or(false, |avatar_settings| avatar_settings.use_automatic_calibration);

        for (role, chain) in self.full_body.iter() {
            let (raw, tracking) = registry.try_get_role_pose(role);
            self.graph.set_local(chain.root, raw);
            self.tracking.insert(role, tracking);

            let calibration = entry.map_or_else(Pose::identity, |entry| entry.pose(role));
            self.graph.set_local(chain.calibration, calibration);

            let manual = if use_manual_offset {
                manual_offset(role, &settings.automatic_calibration)
            } else {
                Pose::identity()
            };
            self.graph.set_local(chain.manual, manual);
        }
    }

    /// Final world pose of `role` and whether it is currently tracked.
    pub fn resolve(&self, role: TrackedRole) -> (Pose, bool) {
        if role == TrackedRole::Origin {
            return (self.graph.world(self.origin), true);
        }

        let target = match (self.simple.get(role), self.full_body.get(role)) {
            (Some(chain), _) => chain.target,
            (_, Some(chain)) => chain.target,
            _ => return (Pose::identity(), false),
        };

        let tracking = self.tracking.get(role).copied().unwrap_or(false);
        (self.graph.world(target), tracking)
    }

    /// Pose of `role`'s device in the player's space, before any offset.
    pub fn raw_reading(&self, role: TrackedRole) -> (Pose, bool) {
        let root = match (self.simple.get(role), self.full_body.get(role)) {
            (Some(chain), _) => chain.root,
            (_, Some(chain)) => chain.root,
            _ => return (Pose::identity(), false),
        };

        let tracking = self.tracking.get(role).copied().unwrap_or(false);
        (self.graph.local(root), tracking)
    }

    /// Stores one role's offset in the automatic slot or the current
    /// avatar's manual entry. Returns `false` for a manual offset without an
    /// avatar, or for a role outside the full-body chain.
    pub fn set_calibration_offset(
        &mut self,
        kind: CalibrationKind,
        role: TrackedRole,
        slot: CalibrationSlot,
    ) -> bool {
        if !role.is_full_body() {
            warn!(%role, "only full-body roles carry calibration offsets");
            return false;
        }

        match kind {
            CalibrationKind::Automatic => self.calibration.automatic.set_slot(role, slot),
            CalibrationKind::Manual => match &self.avatar {
                Some(frame) => self.calibration.manual_mut(&frame.file_name).set_slot(role, slot),
                None => {
                    warn!(%role, "cannot store a manual offset without an avatar");
                    return false;
                }
            },
        }

        debug!(?kind, %role, ?slot, "stored calibration offset");
        true
    }

    /// Resets a calibration kind. Manual clears target `avatar`, or the
    /// current avatar when `None`.
    pub fn clear_calibration_offset(
        &mut self,
        kind: CalibrationKind,
        avatar: Option<&str>,
    ) -> bool {
        match kind {
            CalibrationKind::Automatic => {
                self.calibration.automatic.clear();
                info!("cleared automatic calibration");
                true
            }
            CalibrationKind::Manual => {
                let Some(file_name) = avatar
                    .map(str::to_string)
                    .or_else(|| self.avatar.as_ref().map(|frame| frame.file_name.clone()))
                else {
                    warn!("no avatar to clear manual calibration for");
                    return false;
                };

                match self.calibration.manual.get_mut(&file_name) {
                    Some(entry) => {
                        entry.clear();
                        info!(avatar = %file_name, "cleared manual calibration");
                    }
                    None => debug!(avatar = %file_name, "no manual calibration stored"),
                }
                true
            }
        }
    }

    pub fn is_calibration_mode_active(&self) -> bool {
        self.calibration_mode
    }

    /// Hangs every full-body target off its avatar reference so trackers can
    /// be lined up against the avatar. Does nothing without an avatar.
    pub fn enter_calibration_mode(&mut self) -> bool {
        if self.avatar.is_none() {
            warn!("cannot enter calibration mode without an avatar");
            return false;
        }

        if self.calibration_mode {
            return true;
        }

        for (_, chain) in self.full_body.iter() {
            self.graph.set_parent(chain.target, Some(chain.reference));
        }

        self.calibration_mode = true;
        info!("entered calibration mode");
        true
    }

    /// Restores the regular chains. With `save`, first writes each tracked
    /// role's `raw⁻¹ · reference` into the current avatar's manual entry and
    /// marks untracked roles uncalibrated.
    pub fn exit_calibration_mode(&mut self, save: bool) -> bool {
        if !self.calibration_mode {
            return false;
        }

        let saved = save && self.save_manual_calibration();

        for (_, chain) in self.full_body.iter() {
            self.graph.set_parent(chain.target, Some(chain.manual));
        }

        self.calibration_mode = false;
        info!(saved, "exited calibration mode");
        saved
    }

    /// Tracker pose relative to its avatar reference, while calibrating.
    pub fn calibration_reading(&self, role: TrackedRole) -> Option<Pose> {
        if !self.calibration_mode {
            return None;
        }

        let chain = self.full_body.get(role)?;
        Some(self.graph.relative(chain.root, chain.reference))
    }

    fn save_manual_calibration(&mut self) -> bool {
        let Some(frame) = &self.avatar else {
            return false;
        };

        let mut entry = FullBodyCalibration::default();
        for (role, chain) in self.full_body.iter() {
            let slot = if self.tracking.get(role).copied().unwrap_or(false) {
                let raw = self.graph.world(chain.root);
                let reference = self.graph.world(chain.reference);
                CalibrationSlot::from_pose(&(raw.inverse() * reference))
            } else {
                CalibrationSlot::Uncalibrated
            };
            entry.set_slot(role, slot);
        }

        info!(avatar = %frame.file_name, "saved manual calibration");
        let file_name = frame.file_name.clone();
        *self.calibration.manual_mut(&file_name) = entry;
        true
    }
}

/// Formula offset between the calibrated tracker and the body part.
pub fn manual_offset(role: TrackedRole, settings: &AutomaticCalibrationSettings) -> Pose {
    match role {
        TrackedRole::Waist => {
            let yaw = settings.waist_tracker_facing.yaw_degrees();
            let rotation = pose::euler_degrees(0.0, yaw, 0.0);
            let position =
                rotation.inverse() * nalgebra::Vector3::new(0.0, 0.0, settings.pelvis_offset);
            pose::from_parts(position, rotation)
        }
        TrackedRole::LeftFoot | TrackedRole::RightFoot => {
            pose::from_position(0.0, -settings.leg_offset, 0.0)
        }
        _ => Pose::identity(),
    }
}

fn node_name(role: TrackedRole) -> &'static str {
    match role {
        TrackedRole::Head => "Head",
        TrackedRole::LeftHand => "Left Hand",
        TrackedRole::RightHand => "Right Hand",
        TrackedRole::Waist => "Waist",
        TrackedRole::LeftFoot => "Left Foot",
        TrackedRole::RightFoot => "Right Foot",
        TrackedRole::Origin => "Origin",
        TrackedRole::Unknown => "Unknown",
    }
}
