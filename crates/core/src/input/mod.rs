use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::{DeviceRegistry, TrackingBackend};
use crate::player::PlayerSpace;
use crate::pose::Pose;
use crate::TrackedRole;

/// Per-finger curl in `[0, 1]`, 1 being fully closed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FingerCurl {
    pub thumb: f32,
    pub index: f32,
    pub middle: f32,
    pub ring: f32,
    pub little: f32,
}

impl FingerCurl {
    pub fn new(thumb: f32, index: f32, middle: f32, ring: f32, little: f32) -> Self {
        Self {
            thumb,
            index,
            middle,
            ring,
            little,
        }
    }
}

/// Query surface the IK binder and UI read final poses from.
pub trait AvatarInput {
    /// Final world pose for `role`, or `None` when the role is not tracked.
    fn try_get_role_transform(&self, role: TrackedRole) -> Option<Pose>;

    /// Finger curl for a hand role. Other roles always return `None`.
    fn try_get_finger_curl(&self, role: TrackedRole) -> Option<FingerCurl>;
}

/// [`AvatarInput`] backed by the player space and the device registry.
pub struct PlayerInput<'a, B> {
    space: &'a PlayerSpace,
    registry: &'a DeviceRegistry<B>,
}

impl<'a, B: TrackingBackend> PlayerInput<'a, B> {
    pub fn new(space: &'a PlayerSpace, registry: &'a DeviceRegistry<B>) -> Self {
        Self { space, registry }
    }
}

impl<B: TrackingBackend> AvatarInput for PlayerInput<'_, B> {
    fn try_get_role_transform(&self, role: TrackedRole) -> Option<Pose> {
        match self.space.resolve(role) {
            (pose, true) => Some(pose),
            (_, false) => None,
        }
    }

    fn try_get_finger_curl(&self, role: TrackedRole) -> Option<FingerCurl> {
        if !role.is_hand() {
            debug!(%role, "finger curl is only available for hands");
            return None;
        }

        self.registry.finger_curl(role)
    }
}
