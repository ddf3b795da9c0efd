use serde::{Deserialize, Serialize};

use crate::input::FingerCurl;
use crate::pose::{Pose, StoredPose};
use crate::TrackedRole;

/// Hardware class reported by the tracking runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    #[default]
    Invalid,
    HeadMounted,
    Controller,
    GenericTracker,
    TrackingReference,
}

/// Handedness the runtime assigned to a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerRole {
    #[default]
    Invalid,
    LeftHand,
    RightHand,
}

/// Tracking state reported alongside each pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingResult {
    #[default]
    Uninitialized,
    CalibratingInProgress,
    CalibratingOutOfRange,
    RunningOk,
    RunningOutOfRange,
}

impl TrackingResult {
    /// Results for which the reported pose may be used.
    pub fn is_usable(self) -> bool {
        matches!(
            self,
            TrackingResult::RunningOk
                | TrackingResult::RunningOutOfRange
                | TrackingResult::CalibratingOutOfRange
        )
    }
}

/// Raw state of one device index as enumerated by a backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSlot {
    pub connected: bool,
    pub pose_valid: bool,
    pub tracking_result: TrackingResult,
    pub class: DeviceClass,
    pub controller_role: ControllerRole,
    pub model_name: Option<String>,
    pub serial_number: Option<String>,
    /// Vendor controller-type string, e.g. `vive_tracker_waist`.
    pub role_hint: Option<String>,
    /// Full-body role the user bound to this tracker in the runtime. Used
    /// when the role hint names none.
    pub assigned_role: Option<TrackedRole>,
    pub pose: StoredPose,
}

impl DeviceSlot {
    fn connected(class: DeviceClass, model: &str, serial: &str) -> Self {
        Self {
            connected: true,
            pose_valid: true,
            tracking_result: TrackingResult::RunningOk,
            class,
            model_name: Some(model.to_string()),
            serial_number: Some(serial.to_string()),
            ..Default::default()
        }
    }

    pub fn head_mounted(model: &str, serial: &str) -> Self {
        Self::connected(DeviceClass::HeadMounted, model, serial)
    }

    pub fn controller(hand: ControllerRole, model: &str, serial: &str) -> Self {
        Self {
            controller_role: hand,
            ..Self::connected(DeviceClass::Controller, model, serial)
        }
    }

    pub fn tracker(role_hint: &str, model: &str, serial: &str) -> Self {
        Self {
            role_hint: Some(role_hint.to_string()),
            ..Self::connected(DeviceClass::GenericTracker, model, serial)
        }
    }

    pub fn with_assigned_role(mut self, role: TrackedRole) -> Self {
        self.assigned_role = Some(role);
        self
    }

    pub fn with_pose(mut self, pose: &Pose) -> Self {
        self.pose = StoredPose::from(pose);
        self
    }

    /// Whether the runtime considers the pose trustworthy.
    pub fn is_tracking(&self) -> bool {
        self.connected && self.pose_valid && self.tracking_result.is_usable()
    }
}

/// Source of device enumerations, polled once per tick.
pub trait TrackingBackend {
    /// Replaces the contents of `slots` with one entry per device index.
    fn read_slots(&mut self, slots: &mut Vec<DeviceSlot>);

    /// Skeletal summary for a hand, when the runtime provides one.
    fn finger_curl(&self, _hand: TrackedRole) -> Option<FingerCurl> {
        None
    }
}

/// In-memory backend driven by tests and scripted scenarios.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    slots: Vec<DeviceSlot>,
    left_curl: Option<FingerCurl>,
    right_curl: Option<FingerCurl>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slots(slots: Vec<DeviceSlot>) -> Self {
        Self {
            slots,
            ..Default::default()
        }
    }

    pub fn slots(&self) -> &[DeviceSlot] {
        &self.slots
    }

    /// Replaces the whole enumeration at once.
    pub fn set_slots(&mut self, slots: Vec<DeviceSlot>) {
        self.slots = slots;
    }

    /// Places a device at `index`, growing the slot table as needed.
    pub fn connect(&mut self, index: usize, slot: DeviceSlot) {
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, DeviceSlot::default);
        }
        self.slots[index] = slot;
    }

    pub fn disconnect(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = DeviceSlot::default();
        }
    }

    pub fn set_pose(&mut self, index: usize, pose: &Pose) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.pose = StoredPose::from(pose);
        }
    }

    pub fn set_tracking(&mut self, index: usize, tracking: bool) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.pose_valid = tracking;
            slot.tracking_result = if tracking {
                TrackingResult::RunningOk
            } else {
                TrackingResult::Uninitialized
            };
        }
    }

    pub fn set_finger_curl(&mut self, hand: TrackedRole, curl: Option<FingerCurl>) {
        match hand {
            TrackedRole::LeftHand => self.left_curl = curl,
            TrackedRole::RightHand => self.right_curl = curl,
            _ => {}
        }
    }
}

impl TrackingBackend for SimulatedBackend {
    fn read_slots(&mut self, slots: &mut Vec<DeviceSlot>) {
        slots.clear();
        slots.extend(self.slots.iter().cloned());
    }

    fn finger_curl(&self, hand: TrackedRole) -> Option<FingerCurl> {
        match hand {
            TrackedRole::LeftHand => self.left_curl,
            TrackedRole::RightHand => self.right_curl,
            _ => None,
        }
    }
}
