use nalgebra::{UnitQuaternion, Vector3};

use super::{IkSolver, IkTarget, IkTargetSlot};

/// Motion handed to [`IkSolver::add_platform_motion`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlatformMotion {
    pub delta_position: Vector3<f32>,
    pub delta_rotation: UnitQuaternion<f32>,
    pub pivot: Vector3<f32>,
}

/// Solver that keeps the last state it was given. Used by the CLI and tests
/// in place of a real body solver.
#[derive(Debug, Clone)]
pub struct RecordingSolver {
    targets: [IkTarget; 6],
    pub plant_feet: bool,
    pub maintain_pelvis_position: f32,
    pub locomotion_weight: f32,
    /// Last motion handed in.
    pub platform_motion: Option<PlatformMotion>,
    pub fix_transforms_calls: u64,
    pub solves: u64,
}

impl RecordingSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self, slot: IkTargetSlot) -> &IkTarget {
        &self.targets[slot.index()]
    }

    pub fn targets(&self) -> impl Iterator<Item = (IkTargetSlot, &IkTarget)> {
        IkTargetSlot::ALL.into_iter().map(|slot| (slot, self.target(slot)))
    }
}

impl Default for RecordingSolver {
    fn default() -> Self {
        Self {
            targets: [IkTarget::default(); 6],
            plant_feet: true,
            maintain_pelvis_position: 0.0,
            locomotion_weight: 0.0,
            platform_motion: None,
            fix_transforms_calls: 0,
            solves: 0,
        }
    }
}

impl IkSolver for RecordingSolver {
    fn set_target(&mut self, slot: IkTargetSlot, target: IkTarget) {
        self.targets[slot.index()] = target;
    }

    fn set_plant_feet(&mut self, plant: bool) {
        self.plant_feet = plant;
    }

    fn set_maintain_pelvis_position(&mut self, weight: f32) {
        self.maintain_pelvis_position = weight;
    }

    fn set_locomotion_weight(&mut self, weight: f32) {
        self.locomotion_weight = weight;
    }

    fn add_platform_motion(
        &mut self,
        delta_position: Vector3<f32>,
        delta_rotation: UnitQuaternion<f32>,
        pivot: Vector3<f32>,
    ) {
        self.platform_motion = Some(PlatformMotion {
            delta_position,
            delta_rotation,
            pivot,
        });
    }

    fn fix_transforms(&mut self) {
        self.fix_transforms_calls += 1;
    }

    fn solve(&mut self) {
        self.solves += 1;
    }
}
