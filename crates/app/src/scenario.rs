//! Scripted device scenarios for the `simulate` command.

use fbt_pipeline_core::{
    AvatarDescription, DeviceSlot, IkTargetSlot, PipelineConfig, RecordingSolver, Result,
    SimulatedBackend, StoredPose, TrackedRole, TrackingPipeline,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub avatar: Option<AvatarDescription>,
    /// Devices present before the first frame, by slot index.
    pub devices: Vec<DeviceSlot>,
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Frame {
    pub dt: f32,
    pub devices: Vec<DeviceUpdate>,
    /// Run after the frame's tick and before its solve.
    pub actions: Vec<Action>,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            dt: 1.0 / 90.0,
            devices: Vec::new(),
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceUpdate {
    pub slot: usize,
    pub connect: Option<DeviceSlot>,
    pub disconnect: bool,
    pub pose: Option<StoredPose>,
    pub tracking: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CalibrateAutomatic,
    BeginManualCalibration,
    SaveManualCalibration,
    CancelManualCalibration,
    ClearAutomaticCalibration,
    ClearManualCalibration,
    MeasureArmSpan,
    SetLocomotion(bool),
    SetAvatarScale(f32),
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub frame: usize,
    pub roles: Vec<RoleReport>,
    pub targets: Vec<TargetReport>,
    pub plant_feet: bool,
    pub maintain_pelvis_position: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleReport {
    pub role: TrackedRole,
    pub tracking: bool,
    pub pose: StoredPose,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub role: TrackedRole,
    pub pose: Option<StoredPose>,
    pub position_weight: f32,
    pub rotation_weight: f32,
}

/// Plays `scenario` through a fresh pipeline and reports every frame.
pub fn run(
    scenario: Scenario,
    config: PipelineConfig,
    auto_calibrate: bool,
) -> Result<Vec<FrameReport>> {
    let backend = SimulatedBackend::with_slots(scenario.devices);
    let mut pipeline = TrackingPipeline::new(backend, RecordingSolver::new(), config);
    pipeline.init();

    if let Some(avatar) = scenario.avatar {
        pipeline.spawn_avatar(avatar);
    }

    let mut reports = Vec::with_capacity(scenario.frames.len());
    for (index, frame) in scenario.frames.into_iter().enumerate() {
        for update in &frame.devices {
            apply_update(pipeline.backend_mut(), update);
        }

        pipeline.tick(frame.dt);

        if auto_calibrate && index == 0 && !pipeline.calibrate_automatic() {
            warn!("automatic calibration on the first frame did not run");
        }
        for action in frame.actions {
            run_action(&mut pipeline, action)?;
        }

        pipeline.late_tick();
        reports.push(report(index, &pipeline));
    }

    pipeline.shutdown();
    info!(frames = reports.len(), "scenario finished");
    Ok(reports)
}

fn apply_update(backend: &mut SimulatedBackend, update: &DeviceUpdate) {
    if update.disconnect {
        backend.disconnect(update.slot);
    }
    if let Some(slot) = &update.connect {
        backend.connect(update.slot, slot.clone());
    }
    if let Some(pose) = &update.pose {
        backend.set_pose(update.slot, &pose.to_pose());
    }
    if let Some(tracking) = update.tracking {
        backend.set_tracking(update.slot, tracking);
    }
}

fn run_action(
    pipeline: &mut TrackingPipeline<SimulatedBackend, RecordingSolver>,
    action: Action,
) -> Result<()> {
    let done = match action {
        Action::CalibrateAutomatic => pipeline.calibrate_automatic(),
        Action::BeginManualCalibration => pipeline.begin_manual_calibration(),
        Action::SaveManualCalibration => pipeline.save_manual_calibration(),
        Action::CancelManualCalibration => {
            pipeline.cancel_manual_calibration();
            true
        }
        Action::ClearAutomaticCalibration => {
            pipeline.clear_automatic_calibration();
            true
        }
        Action::ClearManualCalibration => pipeline.clear_manual_calibration(),
        Action::MeasureArmSpan => pipeline.measure_arm_span(),
        Action::SetLocomotion(enabled) => {
            pipeline.set_locomotion_enabled(enabled);
            true
        }
        Action::SetAvatarScale(scale) => {
            pipeline.set_avatar_scale(scale)?;
            true
        }
    };

    if !done {
        warn!(?action, "scenario action had no effect");
    }
    Ok(())
}

fn report(
    frame: usize,
    pipeline: &TrackingPipeline<SimulatedBackend, RecordingSolver>,
) -> FrameReport {
    let roles = TrackedRole::BODY
        .into_iter()
        .map(|role| {
            let (pose, tracking) = pipeline.resolve(role);
            RoleReport {
                role,
                tracking,
                pose: StoredPose::from(pose),
            }
        })
        .collect();

    let solver = pipeline.solver();
    let targets = IkTargetSlot::ALL
        .into_iter()
        .map(|slot| {
            let target = solver.target(slot);
            TargetReport {
                role: slot.role(),
                pose: target.pose.map(StoredPose::from),
                position_weight: target.weights.position,
                rotation_weight: target.weights.rotation,
            }
        })
        .collect();

    FrameReport {
        frame,
        roles,
        targets,
        plant_feet: solver.plant_feet,
        maintain_pelvis_position: solver.maintain_pelvis_position,
    }
}
