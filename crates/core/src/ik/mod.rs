//! Binding final role poses to the external body solver.
//!
//! The solver itself is a black box behind [`IkSolver`]. Each tick the
//! [`IkTargetBinder`] either binds a role's pose with the avatar's authored
//! weights or clears the slot with zero weight, feeds platform motion, and
//! runs secondary motion around the solve.

mod recording;
mod secondary;

use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, info};

pub use recording::{PlatformMotion, RecordingSolver};
pub use secondary::{
    SecondaryMotion, SecondaryMotionKind, SecondaryMotionList, SecondaryMotionSpec, TracedMotion,
};

use crate::avatar::{IkSettings, TargetWeights};
use crate::input::AvatarInput;
use crate::pose::Pose;
use crate::TrackedRole;

/// Named target slots of the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IkTargetSlot {
    /// Head target of the spine chain.
    Spine,
    LeftArm,
    RightArm,
    Pelvis,
    LeftLeg,
    RightLeg,
}

impl IkTargetSlot {
    pub const ALL: [IkTargetSlot; 6] = [
        IkTargetSlot::Spine,
        IkTargetSlot::LeftArm,
        IkTargetSlot::RightArm,
        IkTargetSlot::Pelvis,
        IkTargetSlot::LeftLeg,
        IkTargetSlot::RightLeg,
    ];

    pub fn for_role(role: TrackedRole) -> Option<Self> {
        match role {
            TrackedRole::Head => Some(IkTargetSlot::Spine),
            TrackedRole::LeftHand => Some(IkTargetSlot::LeftArm),
            TrackedRole::RightHand => Some(IkTargetSlot::RightArm),
            TrackedRole::Waist => Some(IkTargetSlot::Pelvis),
            TrackedRole::LeftFoot => Some(IkTargetSlot::LeftLeg),
            TrackedRole::RightFoot => Some(IkTargetSlot::RightLeg),
            TrackedRole::Origin | TrackedRole::Unknown => None,
        }
    }

    pub fn role(self) -> TrackedRole {
        match self {
            IkTargetSlot::Spine => TrackedRole::Head,
            IkTargetSlot::LeftArm => TrackedRole::LeftHand,
            IkTargetSlot::RightArm => TrackedRole::RightHand,
            IkTargetSlot::Pelvis => TrackedRole::Waist,
            IkTargetSlot::LeftLeg => TrackedRole::LeftFoot,
            IkTargetSlot::RightLeg => TrackedRole::RightFoot,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// State of one solver target slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkTarget {
    pub pose: Option<Pose>,
    pub weights: TargetWeights,
}

impl IkTarget {
    pub fn bound(pose: Pose, weights: TargetWeights) -> Self {
        Self {
            pose: Some(pose),
            weights,
        }
    }

    pub fn cleared() -> Self {
        Self {
            pose: None,
            weights: TargetWeights::ZERO,
        }
    }
}

impl Default for IkTarget {
    fn default() -> Self {
        Self::cleared()
    }
}

/// Surface of the external full-body solver.
pub trait IkSolver {
    fn set_target(&mut self, slot: IkTargetSlot, target: IkTarget);

    fn set_plant_feet(&mut self, plant: bool);

    fn set_maintain_pelvis_position(&mut self, weight: f32);

    fn set_locomotion_weight(&mut self, weight: f32);

    /// Moves the solved body along with its parent. Must be called before
    /// [`IkSolver::solve`] in the same tick.
    fn add_platform_motion(
        &mut self,
        delta_position: Vector3<f32>,
        delta_rotation: UnitQuaternion<f32>,
        pivot: Vector3<f32>,
    );

    /// Resets bones to their authored local poses before solving.
    fn fix_transforms(&mut self);

    fn solve(&mut self);
}

/// Drives an [`IkSolver`] from role poses for one spawned avatar.
#[derive(Debug)]
pub struct IkTargetBinder {
    settings: IkSettings,
    motions: SecondaryMotionList,
    previous_parent: Option<Pose>,
    locomotion_enabled: bool,
}

impl IkTargetBinder {
    pub fn new(settings: IkSettings, motions: SecondaryMotionList) -> Self {
        Self {
            settings,
            motions,
            previous_parent: None,
            locomotion_enabled: false,
        }
    }

    /// Applies the locomotion weight and starts secondary motion.
    pub fn start<S: IkSolver>(&mut self, solver: &mut S) {
        self.apply_locomotion(solver);
        self.motions.start();
        debug!(secondary_motion = self.motions.len(), "IK binder started");
    }

    pub fn set_locomotion_enabled<S: IkSolver>(&mut self, enabled: bool, solver: &mut S) {
        self.locomotion_enabled = enabled;
        self.apply_locomotion(solver);
    }

    pub fn secondary_motion(&self) -> &SecondaryMotionList {
        &self.motions
    }

    /// Binds or clears every target slot from `input`.
    pub fn update_targets<I, S>(&self, input: &I, solver: &mut S)
    where
        I: AvatarInput + ?Sized,
        S: IkSolver,
    {
        for slot in IkTargetSlot::ALL {
            let role = slot.role();
            let target = match input.try_get_role_transform(role) {
                Some(pose) => IkTarget::bound(pose, self.settings.weights(role)),
                None => IkTarget::cleared(),
            };

            if slot == IkTargetSlot::Pelvis {
                if target.pose.is_some() {
                    solver.set_maintain_pelvis_position(0.0);
                    solver.set_plant_feet(false);
                } else {
                    solver.set_maintain_pelvis_position(self.settings.maintain_pelvis_position);
                    solver.set_plant_feet(self.settings.plant_feet);
                }
            }

            solver.set_target(slot, target);
        }
    }

    /// Everything that must happen before the solve: target binding,
    /// platform motion of `parent`, transform fixing and secondary-motion
    /// pre-update.
    pub fn tick<I, S>(&mut self, input: &I, parent: &Pose, solver: &mut S)
    where
        I: AvatarInput + ?Sized,
        S: IkSolver,
    {
        self.update_targets(input, solver);
        self.apply_platform_motion(parent, solver);

        if self.settings.fix_transforms {
            solver.fix_transforms();
        }

        self.motions.pre_update();
    }

    /// Solves, then runs secondary motion in registration order.
    pub fn late_tick<S: IkSolver>(&mut self, solver: &mut S) {
        solver.solve();
        self.motions.late_update();
    }

    fn apply_platform_motion<S: IkSolver>(&mut self, parent: &Pose, solver: &mut S) {
        if let Some(previous) = self.previous_parent {
            let delta_position = parent.translation.vector - previous.translation.vector;
            let delta_rotation = parent.rotation * previous.rotation.inverse();
            solver.add_platform_motion(delta_position, delta_rotation, parent.translation.vector);
        }

        self.previous_parent = Some(*parent);
    }

    fn apply_locomotion<S: IkSolver>(&self, solver: &mut S) {
        let weight = if self.locomotion_enabled {
            self.settings.locomotion_weight
        } else {
            0.0
        };
        info!(enabled = self.locomotion_enabled, weight, "updating locomotion");
        solver.set_locomotion_weight(weight);
    }
}
