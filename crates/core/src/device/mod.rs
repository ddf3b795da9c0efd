//! Device enumeration, identity and role assignment.
//!
//! [`DeviceRegistry::poll`] reads every backend slot once per tick, diffs the
//! result against the previous snapshot and, only when something observable
//! changed, rebuilds the role assignment table from the fresh snapshot.

mod backend;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nalgebra::UnitQuaternion;
use tracing::{debug, info, trace, warn};

pub use backend::{
    ControllerRole, DeviceClass, DeviceSlot, SimulatedBackend, TrackingBackend, TrackingResult,
};

use crate::events::{Observers, SubscriptionId};
use crate::input::FingerCurl;
use crate::pose::{self, Pose};
use crate::role::RoleMap;
use crate::TrackedRole;

/// Generic-tracker role hints recognised by exact match.
const TRACKER_ROLE_HINTS: [(&str, TrackedRole); 6] = [
    ("vive_tracker_waist", TrackedRole::Waist),
    ("vive_tracker_left_foot", TrackedRole::LeftFoot),
    ("vive_tracker_right_foot", TrackedRole::RightFoot),
    ("d4vr_tracker_waist", TrackedRole::Waist),
    ("d4vr_tracker_left_foot", TrackedRole::LeftFoot),
    ("d4vr_tracker_right_foot", TrackedRole::RightFoot),
];

/// A connected device as seen during the current tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDevice {
    pub id: String,
    pub slot: usize,
    pub role: TrackedRole,
    pub class: DeviceClass,
    pub role_hint: Option<String>,
    pub is_tracking: bool,
    /// Pose in tracking space with vendor corrections applied. Identity while
    /// not tracking.
    pub pose: Pose,
}

/// Per-slot memory used to detect changes between polls.
#[derive(Debug, Clone, Default)]
struct SlotState {
    id: Option<String>,
    connected: bool,
    tracking: bool,
    class: DeviceClass,
    controller_role: ControllerRole,
    role_hint: Option<String>,
    assigned_role: Option<TrackedRole>,
}

/// Polls a [`TrackingBackend`] and maintains the role assignment table.
pub struct DeviceRegistry<B> {
    backend: B,
    scratch: Vec<DeviceSlot>,
    states: Vec<SlotState>,
    devices: Vec<TrackedDevice>,
    assignments: RoleMap<String>,
    devices_changed: Observers<RoleMap<String>>,
}

impl<B: TrackingBackend> DeviceRegistry<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            scratch: Vec::new(),
            states: Vec::new(),
            devices: Vec::new(),
            assignments: RoleMap::new(),
            devices_changed: Observers::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Re-enumerates the backend. Returns whether anything observable changed;
    /// listeners are notified at most once per call, and only then.
    pub fn poll(&mut self) -> bool {
        self.backend.read_slots(&mut self.scratch);

        if self.states.len() < self.scratch.len() {
            self.states.resize_with(self.scratch.len(), SlotState::default);
        }

        self.devices.clear();
        let mut changed = false;

        for (index, slot) in self.scratch.iter().enumerate() {
            let state = &mut self.states[index];

            if slot.connected != state.connected {
                if slot.connected {
                    let id = device_id(slot, index);
                    info!(device = %id, "device connected");
                    state.id = Some(id);
                } else {
                    info!(device = ?state.id, "device disconnected");
                }
                changed = true;
            }

            if !slot.connected {
                *state = SlotState::default();
                continue;
            }

            let id = match &state.id {
                Some(id) => id.clone(),
                None => {
                    let id = device_id(slot, index);
                    state.id = Some(id.clone());
                    id
                }
            };

            if slot.class != state.class {
                trace!(device = %id, from = ?state.class, to = ?slot.class, "device class changed");
                changed = true;
            }

            if slot.controller_role != state.controller_role {
                trace!(
                    device = %id,
                    from = ?state.controller_role,
                    to = ?slot.controller_role,
                    "controller role changed"
                );
                changed = true;
            }

            if slot.role_hint != state.role_hint {
                trace!(
                    device = %id,
                    from = ?state.role_hint,
                    to = ?slot.role_hint,
                    "role hint changed"
                );
                changed = true;
            }

            if slot.assigned_role != state.assigned_role {
                trace!(
                    device = %id,
                    from = ?state.assigned_role,
                    to = ?slot.assigned_role,
                    "assigned role changed"
                );
                changed = true;
            }

            let role = classify(slot);
            let is_tracking = slot.is_tracking();

            if is_tracking != state.tracking {
                if is_tracking {
                    info!(device = %id, "acquired tracking");
                } else {
                    info!(device = %id, "lost tracking");
                }
                changed = true;
            }

            let pose = if is_tracking {
                let raw = slot.pose.to_pose();
                match slot
                    .role_hint
                    .as_deref()
                    .and_then(|hint| orientation_correction(hint, role))
                {
                    Some(correction) => {
                        pose::from_parts(raw.translation.vector, raw.rotation * correction)
                    }
                    None => raw,
                }
            } else {
                Pose::identity()
            };

            state.connected = true;
            state.tracking = is_tracking;
            state.class = slot.class;
            state.controller_role = slot.controller_role;
            state.role_hint = slot.role_hint.clone();
            state.assigned_role = slot.assigned_role;

            self.devices.push(TrackedDevice {
                id,
                slot: index,
                role,
                class: slot.class,
                role_hint: slot.role_hint.clone(),
                is_tracking,
                pose,
            });
        }

        // Slots the backend stopped enumerating count as disconnects.
        for state in self.states.iter_mut().skip(self.scratch.len()) {
            if state.connected {
                info!(device = ?state.id, "device disconnected");
                *state = SlotState::default();
                changed = true;
            }
        }

        if changed {
            self.assign_devices();
            self.devices_changed.emit(&self.assignments);
        }

        changed
    }

    /// Device currently assigned to `role`, if any.
    pub fn try_get_role(&self, role: TrackedRole) -> Option<&TrackedDevice> {
        let id = self.assignments.get(role)?;
        self.devices.iter().find(|device| &device.id == id)
    }

    /// Pose of the device assigned to `role` and whether it is tracking. An
    /// unassigned role reports the identity pose, untracked.
    pub fn try_get_role_pose(&self, role: TrackedRole) -> (Pose, bool) {
        match self.try_get_role(role) {
            Some(device) => (device.pose, device.is_tracking),
            None => (Pose::identity(), false),
        }
    }

    pub fn finger_curl(&self, hand: TrackedRole) -> Option<FingerCurl> {
        self.backend.finger_curl(hand)
    }

    pub fn assignments(&self) -> &RoleMap<String> {
        &self.assignments
    }

    pub fn devices(&self) -> &[TrackedDevice] {
        &self.devices
    }

    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&RoleMap<String>) + 'static,
    ) -> SubscriptionId {
        self.devices_changed.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.devices_changed.unsubscribe(id)
    }

    fn assign_devices(&mut self) {
        info!("device change detected, updating device assignments");

        let mut next = RoleMap::new();

        for device in &self.devices {
            trace!(device = %device.id, role = %device.role, "got device");

            if device.role == TrackedRole::Unknown {
                continue;
            }

            if let Some(existing) = next.get(device.role) {
                warn!(
                    device = %device.id,
                    kept = %existing,
                    role = %device.role,
                    "ignoring duplicate device for role"
                );
                continue;
            }

            next.insert(device.role, device.id.clone());
        }

        for role in TrackedRole::BODY {
            log_assignment(self.assignments.get(role), next.get(role), role);
        }

        self.assignments = next;
    }
}

impl<B> std::fmt::Debug for DeviceRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices)
            .field("assignments", &self.assignments)
            .finish()
    }
}

fn log_assignment(current: Option<&String>, potential: Option<&String>, role: TrackedRole) {
    match (current, potential) {
        (current, potential) if current == potential => {}
        (Some(current), None) => info!(device = %current, %role, "lost device"),
        (Some(current), Some(potential)) => {
            info!(from = %current, to = %potential, %role, "replacing device")
        }
        (None, Some(potential)) => info!(device = %potential, %role, "using device"),
        (None, None) => {}
    }
}

/// Maps a slot to the role it can fill.
fn classify(slot: &DeviceSlot) -> TrackedRole {
    match slot.class {
        DeviceClass::HeadMounted => TrackedRole::Head,
        DeviceClass::Controller => match slot.controller_role {
            ControllerRole::LeftHand => TrackedRole::LeftHand,
            ControllerRole::RightHand => TrackedRole::RightHand,
            ControllerRole::Invalid => TrackedRole::Unknown,
        },
        DeviceClass::GenericTracker => slot
            .role_hint
            .as_deref()
            .and_then(|hint| {
                TRACKER_ROLE_HINTS
                    .iter()
                    .find(|(known, _)| *known == hint)
                    .map(|(_, role)| *role)
            })
            .or(slot.assigned_role.filter(|role| role.is_full_body()))
            .unwrap_or(TrackedRole::Unknown),
        DeviceClass::Invalid | DeviceClass::TrackingReference => TrackedRole::Unknown,
    }
}

/// Fixed rotation some drivers need to match the orientation other trackers
/// report for the same role.
fn orientation_correction(role_hint: &str, role: TrackedRole) -> Option<UnitQuaternion<f32>> {
    if role_hint.starts_with("d4vr_tracker_") && role.is_foot() {
        return Some(pose::euler_degrees(-90.0, 180.0, 0.0));
    }

    if role_hint == "kinect_device" {
        return match role {
            TrackedRole::Waist => Some(pose::euler_degrees(-90.0, 180.0, 0.0)),
            TrackedRole::LeftFoot | TrackedRole::RightFoot => {
                Some(pose::euler_degrees(0.0, 180.0, 0.0))
            }
            _ => None,
        };
    }

    None
}

/// `"{model} {serial hash}@{slot}"`.
fn device_id(slot: &DeviceSlot, index: usize) -> String {
    let mut hasher = DefaultHasher::new();
    slot.serial_number.as_deref().unwrap_or_default().hash(&mut hasher);
    let serial_hash = hasher.finish() as u32;
    let id = format!(
        "{} {}@{}",
        slot.model_name.as_deref().unwrap_or("Unknown"),
        serial_hash,
        index
    );
    debug!(device = %id, "derived device id");
    id
}
