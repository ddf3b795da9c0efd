use serde::{Deserialize, Serialize};

/// Anatomical role a tracked device or pose source can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrackedRole {
    Head,
    LeftHand,
    RightHand,
    Waist,
    LeftFoot,
    RightFoot,
    Origin,
    Unknown,
}

impl TrackedRole {
    /// The six roles that drive IK targets, in binding order.
    pub const BODY: [TrackedRole; 6] = [
        TrackedRole::Head,
        TrackedRole::LeftHand,
        TrackedRole::RightHand,
        TrackedRole::Waist,
        TrackedRole::LeftFoot,
        TrackedRole::RightFoot,
    ];

    /// Roles resolved through the calibration chain.
    pub const FULL_BODY: [TrackedRole; 3] = [
        TrackedRole::Waist,
        TrackedRole::LeftFoot,
        TrackedRole::RightFoot,
    ];

    /// Roles fed by a pose source stack.
    pub const SIMPLE: [TrackedRole; 4] = [
        TrackedRole::Head,
        TrackedRole::LeftHand,
        TrackedRole::RightHand,
        TrackedRole::Origin,
    ];

    pub fn is_full_body(self) -> bool {
        matches!(
            self,
            TrackedRole::Waist | TrackedRole::LeftFoot | TrackedRole::RightFoot
        )
    }

    pub fn is_hand(self) -> bool {
        matches!(self, TrackedRole::LeftHand | TrackedRole::RightHand)
    }

    pub fn is_foot(self) -> bool {
        matches!(self, TrackedRole::LeftFoot | TrackedRole::RightFoot)
    }

    fn index(self) -> Option<usize> {
        TrackedRole::BODY.iter().position(|role| *role == self)
    }
}

impl std::fmt::Display for TrackedRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrackedRole::Head => "head",
            TrackedRole::LeftHand => "left hand",
            TrackedRole::RightHand => "right hand",
            TrackedRole::Waist => "waist",
            TrackedRole::LeftFoot => "left foot",
            TrackedRole::RightFoot => "right foot",
            TrackedRole::Origin => "origin",
            TrackedRole::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Fixed-size table keyed by the six body roles.
///
/// `Origin` and `Unknown` have no slot: reads return `None` and writes are
/// ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleMap<T> {
    slots: [Option<T>; 6],
}

impl<T> RoleMap<T> {
    pub fn new() -> Self {
        Self {
            slots: [None, None, None, None, None, None],
        }
    }

    pub fn get(&self, role: TrackedRole) -> Option<&T> {
        role.index().and_then(|index| self.slots[index].as_ref())
    }

    pub fn set(&mut self, role: TrackedRole, value: Option<T>) {
        if let Some(index) = role.index() {
            self.slots[index] = value;
        }
    }

    pub fn insert(&mut self, role: TrackedRole, value: T) {
        self.set(role, Some(value));
    }

    /// Iterates over the occupied slots in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (TrackedRole, &T)> {
        TrackedRole::BODY
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(role, slot)| slot.as_ref().map(|value| (*role, value)))
    }
}

impl<T> Default for RoleMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_map_ignores_roles_without_slots() {
        let mut map = RoleMap::new();
        map.insert(TrackedRole::Origin, 1);
        map.insert(TrackedRole::Waist, 2);

        assert_eq!(map.get(TrackedRole::Origin), None);
        assert_eq!(map.get(TrackedRole::Waist), Some(&2));
        assert_eq!(map.iter().count(), 1);
    }
}
