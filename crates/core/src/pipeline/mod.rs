//! Owns every stage and runs them in order once per tick.
//!
//! `tick` polls devices, refreshes the pose sources and the player space,
//! then binds IK targets and runs the pre-solve work. `late_tick` solves and
//! runs secondary motion. Nothing blocks and nothing runs on another thread.

use tracing::{error, info, warn};

use crate::avatar::arm_span::{ArmSpanEvent, ArmSpanMeasurer};
use crate::avatar::{AvatarDescription, SpawnedAvatar};
use crate::calibration::{procedures, CalibrationData, CalibrationKind};
use crate::config::{PipelineConfig, Settings};
use crate::device::{DeviceRegistry, TrackingBackend};
use crate::ik::{
    IkSolver, IkTargetBinder, SecondaryMotion, SecondaryMotionList, SecondaryMotionSpec,
    TracedMotion,
};
use crate::input::PlayerInput;
use crate::player::PlayerSpace;
use crate::pose::Pose;
use crate::role::RoleMap;
use crate::source::{PoseSources, ProducerId};
use crate::{Result, TrackedRole};

/// Roles whose device poses feed a pose source stack.
const DEVICE_SOURCE_ROLES: [TrackedRole; 3] =
    [TrackedRole::Head, TrackedRole::LeftHand, TrackedRole::RightHand];

pub struct TrackingPipeline<B, S> {
    config: PipelineConfig,
    registry: DeviceRegistry<B>,
    sources: PoseSources,
    device_producers: RoleMap<ProducerId>,
    space: PlayerSpace,
    settings: Settings,
    solver: S,
    avatar: Option<SpawnedAvatar>,
    binder: Option<IkTargetBinder>,
    arm_span: ArmSpanMeasurer,
    calibrate_on_next_full_body: bool,
    elapsed: f32,
    initialized: bool,
}

impl<B: TrackingBackend, S: IkSolver> TrackingPipeline<B, S> {
    pub fn new(backend: B, solver: S, config: PipelineConfig) -> Self {
        Self {
            config,
            registry: DeviceRegistry::new(backend),
            sources: PoseSources::new(),
            device_producers: RoleMap::new(),
            space: PlayerSpace::new(CalibrationData::default()),
            settings: Settings::default(),
            solver,
            avatar: None,
            binder: None,
            arm_span: ArmSpanMeasurer::new(),
            calibrate_on_next_full_body: false,
            elapsed: 0.0,
            initialized: false,
        }
    }

    /// Loads persisted state and registers the device pose sources.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }

        if let Some(path) = &self.config.settings_path {
            self.settings = Settings::load_or_default(path);
        }
        if let Some(path) = &self.config.calibration_path {
            *self.space.calibration_mut() = CalibrationData::load_or_default(path);
        }

        for role in DEVICE_SOURCE_ROLES {
            let id = self.sources.register(format!("{role} device"));
            self.sources.set_valid(id, false);
            self.device_producers.insert(role, id);
        }

        self.initialized = true;
        info!("tracking pipeline initialized");
    }

    /// Runs everything up to the solve.
    pub fn tick(&mut self, dt: f32) {
        if !self.initialized {
            self.init();
        }
        self.elapsed += dt;

        self.registry.poll();
        self.update_device_sources();
        self.space.update(&self.registry, &self.sources, &self.settings);

        if self.calibrate_on_next_full_body
            && TrackedRole::FULL_BODY
                .into_iter()
                .any(|role| self.space.raw_reading(role).1)
        {
            self.calibrate_on_next_full_body = false;
            self.calibrate_automatic();
        }

        self.update_arm_span();

        if let Some(binder) = &mut self.binder {
            let input = PlayerInput::new(&self.space, &self.registry);
            let (parent, _) = self.space.resolve(TrackedRole::Origin);
            binder.tick(&input, &parent, &mut self.solver);
        }
    }

    /// Solves and runs secondary motion.
    pub fn late_tick(&mut self) {
        if let Some(binder) = &mut self.binder {
            binder.late_tick(&mut self.solver);
        }
    }

    /// Abandons in-flight procedures and writes the settings.
    pub fn shutdown(&mut self) {
        if self.space.is_calibration_mode_active() {
            procedures::cancel_manual(&mut self.space);
        }
        self.arm_span.cancel();
        self.unload_avatar();
        self.persist_settings();
        self.initialized = false;
        info!("tracking pipeline shut down");
    }

    pub fn spawn_avatar(&mut self, description: AvatarDescription) {
        self.spawn_avatar_with(description, |spec| Box::new(TracedMotion::new(spec)));
    }

    /// Spawns an avatar, building its secondary motion through `factory`.
    pub fn spawn_avatar_with<F>(&mut self, description: AvatarDescription, factory: F)
    where
        F: FnMut(&SecondaryMotionSpec) -> Box<dyn SecondaryMotion>,
    {
        let motions = SecondaryMotionList::build(&description.secondary_motion, factory);
        let mut avatar = SpawnedAvatar::new(description);

        if self.settings.resize_avatar_to_arm_span {
            if let Err(err) = avatar.fit_to_arm_span(self.settings.player_arm_span) {
                warn!(%err, "could not resize avatar to arm span");
            }
        }

        let mut binder = IkTargetBinder::new(avatar.ik_settings().clone(), motions);
        binder.start(&mut self.solver);

        self.calibrate_on_next_full_body = self.settings.calibrate_full_body_tracking_on_start
            && avatar.supports_automatic_calibration();

        info!(avatar = %avatar.file_name(), "spawned avatar");
        self.space.set_avatar(Some(&avatar));
        self.avatar = Some(avatar);
        self.binder = Some(binder);
    }

    pub fn unload_avatar(&mut self) {
        if let Some(avatar) = self.avatar.take() {
            info!(avatar = %avatar.file_name(), "unloaded avatar");
        }
        self.binder = None;
        self.calibrate_on_next_full_body = false;
        self.space.set_avatar(None);
    }

    pub fn set_avatar_scale(&mut self, scale: f32) -> Result<()> {
        let Some(avatar) = &mut self.avatar else {
            return Err(crate::TrackingError::msg("no avatar spawned"));
        };

        avatar.set_scale(scale)?;
        self.space.set_avatar(Some(&*avatar));
        Ok(())
    }

    pub fn set_locomotion_enabled(&mut self, enabled: bool) {
        if let Some(binder) = &mut self.binder {
            binder.set_locomotion_enabled(enabled, &mut self.solver);
        }
    }

    /// Runs automatic calibration and persists it on success.
    pub fn calibrate_automatic(&mut self) -> bool {
        let calibrated = procedures::calibrate_automatic(
            &mut self.space,
            &mut self.settings,
            self.avatar.as_ref(),
        );
        if calibrated {
            self.refresh_space();
            self.persist_calibration();
            self.persist_settings();
        }
        calibrated
    }

    pub fn begin_manual_calibration(&mut self) -> bool {
        procedures::begin_manual(&mut self.space)
    }

    /// Stores the current readings as the avatar's manual calibration.
    pub fn save_manual_calibration(&mut self) -> bool {
        let saved = procedures::save_manual(&mut self.space, &mut self.settings);
        if saved {
            self.refresh_space();
            self.persist_calibration();
            self.persist_settings();
        }
        saved
    }

    pub fn cancel_manual_calibration(&mut self) {
        procedures::cancel_manual(&mut self.space);
    }

    pub fn clear_automatic_calibration(&mut self) {
        self.space.clear_calibration_offset(CalibrationKind::Automatic, None);
        self.refresh_space();
        self.persist_calibration();
    }

    pub fn clear_manual_calibration(&mut self) -> bool {
        let cleared = self.space.clear_calibration_offset(CalibrationKind::Manual, None);
        if cleared {
            self.refresh_space();
            self.persist_calibration();
        }
        cleared
    }

    /// Starts measuring the player's arm span. Needs both hands assigned.
    pub fn measure_arm_span(&mut self) -> bool {
        let hands_assigned = self.registry.try_get_role(TrackedRole::LeftHand).is_some()
            && self.registry.try_get_role(TrackedRole::RightHand).is_some();
        self.arm_span.start(self.elapsed, hands_assigned)
    }

    pub fn cancel_arm_span(&mut self) {
        self.arm_span.cancel();
    }

    pub fn is_measuring_arm_span(&self) -> bool {
        self.arm_span.is_measuring()
    }

    pub fn input(&self) -> PlayerInput<'_, B> {
        PlayerInput::new(&self.space, &self.registry)
    }

    pub fn registry(&self) -> &DeviceRegistry<B> {
        &self.registry
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.registry.backend_mut()
    }

    pub fn sources(&self) -> &PoseSources {
        &self.sources
    }

    /// Producers other than devices (e.g. a replay) register and push here.
    pub fn sources_mut(&mut self) -> &mut PoseSources {
        &mut self.sources
    }

    pub fn space(&self) -> &PlayerSpace {
        &self.space
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn avatar(&self) -> Option<&SpawnedAvatar> {
        self.avatar.as_ref()
    }

    pub fn resolve(&self, role: TrackedRole) -> (Pose, bool) {
        self.space.resolve(role)
    }

    /// Re-applies stored offsets and per-avatar switches to the chain so the
    /// current tick binds the calibrated poses.
    fn refresh_space(&mut self) {
        self.space.update(&self.registry, &self.sources, &self.settings);
    }

    fn update_device_sources(&mut self) {
        for role in DEVICE_SOURCE_ROLES {
            let Some(&id) = self.device_producers.get(role) else {
                continue;
            };

            let (pose, tracking) = self.registry.try_get_role_pose(role);
            self.sources.set_pose(id, pose);
            self.sources.set_valid(id, tracking);

            let stacked = self
                .sources
                .stack(role)
                .map_or(false, |stack| stack.entries().contains(&id));
            if tracking && !stacked {
                self.sources.push(role, id);
            }
        }

        self.sources.refresh();
    }

    fn update_arm_span(&mut self) {
        if !self.arm_span.is_measuring() {
            return;
        }

        let hands = match (
            self.registry.try_get_role(TrackedRole::LeftHand),
            self.registry.try_get_role(TrackedRole::RightHand),
        ) {
            (Some(left), Some(right)) => {
                Some((left.pose.translation.vector, right.pose.translation.vector))
            }
            _ => None,
        };

        if let Some(ArmSpanEvent::Completed(span)) = self.arm_span.sample(self.elapsed, hands) {
            self.settings.player_arm_span = span;
            self.persist_settings();

            if self.settings.resize_avatar_to_arm_span {
                if let Some(avatar) = &mut self.avatar {
                    match avatar.fit_to_arm_span(span) {
                        Ok(()) => self.space.set_avatar(Some(&*avatar)),
                        Err(err) => warn!(%err, "could not resize avatar to arm span"),
                    }
                }
            }
        }
    }

    fn persist_settings(&self) {
        if let Some(path) = &self.config.settings_path {
            if let Err(err) = self.settings.save(path) {
                error!(?path, %err, "failed to save settings");
            }
        }
    }

    fn persist_calibration(&self) {
        if let Some(path) = &self.config.calibration_path {
            if let Err(err) = self.space.calibration().save(path) {
                error!(?path, %err, "failed to save calibration data");
            }
        }
    }
}
