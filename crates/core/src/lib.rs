//! Core library for the full-body tracking pipeline.
//!
//! Raw device poses come in through a [`device::TrackingBackend`], get an
//! authoritative source per role, pass through the calibration and avatar
//! offset layers of the [`player::PlayerSpace`] and end up as targets of an
//! [`ik::IkSolver`]. [`TrackingPipeline`] owns the stages and runs them in
//! order each tick.

pub mod avatar;
pub mod calibration;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod ik;
pub mod input;
pub mod pipeline;
pub mod player;
pub mod pose;
pub mod role;
pub mod source;
pub mod space;

pub use avatar::{AvatarDescription, AvatarGeometry, SpawnedAvatar};
pub use calibration::{CalibrationData, CalibrationKind, CalibrationSlot, FullBodyCalibration};
pub use config::{PipelineConfig, Settings};
pub use device::{DeviceRegistry, DeviceSlot, SimulatedBackend, TrackedDevice, TrackingBackend};
pub use error::{Result, TrackingError};
pub use ik::{IkSolver, IkTarget, IkTargetBinder, IkTargetSlot, RecordingSolver};
pub use input::{AvatarInput, FingerCurl, PlayerInput};
pub use pipeline::TrackingPipeline;
pub use player::PlayerSpace;
pub use pose::{Pose, StoredPose};
pub use role::{RoleMap, TrackedRole};
pub use source::{PoseSources, ProducerId};
