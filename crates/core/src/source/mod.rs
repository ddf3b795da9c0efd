//! Prioritised pose producers for the roles that more than one system can
//! drive (head, hands and the play-space origin).
//!
//! Each stack is ordered oldest to newest and the newest still-valid producer
//! wins. Producers are owned by a shared [`PoseProducers`] table; a producer
//! that goes away is invalidated rather than dropped so stale stack entries
//! are simply skipped.

use tracing::{info, warn};

use crate::events::{Observers, SubscriptionId};
use crate::pose::Pose;
use crate::TrackedRole;

/// Handle to a registered pose producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(usize);

#[derive(Debug, Clone)]
struct Producer {
    name: String,
    pose: Pose,
    valid: bool,
}

/// Table of every pose producer known to the pipeline.
#[derive(Debug, Default)]
pub struct PoseProducers {
    producers: Vec<Producer>,
}

impl PoseProducers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a producer. It starts valid at the identity pose.
    pub fn register(&mut self, name: impl Into<String>) -> ProducerId {
        let id = ProducerId(self.producers.len());
        self.producers.push(Producer {
            name: name.into(),
            pose: Pose::identity(),
            valid: true,
        });
        id
    }

    pub fn set_pose(&mut self, id: ProducerId, pose: Pose) {
        if let Some(producer) = self.producers.get_mut(id.0) {
            producer.pose = pose;
        }
    }

    pub fn set_valid(&mut self, id: ProducerId, valid: bool) {
        if let Some(producer) = self.producers.get_mut(id.0) {
            producer.valid = valid;
        }
    }

    pub fn invalidate(&mut self, id: ProducerId) {
        self.set_valid(id, false);
    }

    /// Current pose of a valid producer.
    pub fn pose(&self, id: ProducerId) -> Option<Pose> {
        self.producers
            .get(id.0)
            .filter(|producer| producer.valid)
            .map(|producer| producer.pose)
    }

    pub fn is_valid(&self, id: ProducerId) -> bool {
        self.pose(id).is_some()
    }

    pub fn name(&self, id: ProducerId) -> &str {
        self.producers
            .get(id.0)
            .map(|producer| producer.name.as_str())
            .unwrap_or("<unregistered>")
    }
}

/// Ordered stack of producers for one role.
#[derive(Debug)]
pub struct PoseSourceStack {
    role: TrackedRole,
    entries: Vec<ProducerId>,
    current: Option<ProducerId>,
    changed: Observers<Option<ProducerId>>,
}

impl PoseSourceStack {
    pub fn new(role: TrackedRole) -> Self {
        Self {
            role,
            entries: Vec::new(),
            current: None,
            changed: Observers::new(),
        }
    }

    pub fn role(&self) -> TrackedRole {
        self.role
    }

    /// Makes `id` the most recent entry. Pushing the current top is a no-op;
    /// pushing an entry further down moves it to the top.
    pub fn push(&mut self, producers: &PoseProducers, id: ProducerId) {
        if !producers.is_valid(id) {
            warn!(
                role = %self.role,
                producer = producers.name(id),
                "refusing to push an invalid pose source"
            );
            return;
        }

        if self.entries.last() == Some(&id) {
            return;
        }

        self.entries.retain(|entry| *entry != id);
        self.entries.push(id);

        info!(role = %self.role, producer = producers.name(id), "using pose source");

        self.update_current(producers);
    }

    /// Drops `id` from the stack. Removing an absent producer is a no-op.
    pub fn remove(&mut self, producers: &PoseProducers, id: ProducerId) {
        let before = self.entries.len();
        self.entries.retain(|entry| *entry != id);

        if self.entries.len() == before {
            return;
        }

        self.prune(producers);

        match self.top(producers) {
            Some(top) => {
                info!(role = %self.role, producer = producers.name(top), "using pose source")
            }
            None => info!(role = %self.role, "no pose source left in stack"),
        }

        self.update_current(producers);
    }

    /// Re-evaluates validity after producers changed outside the stack.
    pub fn refresh(&mut self, producers: &PoseProducers) {
        self.prune(producers);
        self.update_current(producers);
    }

    /// Pose of the newest valid producer.
    pub fn current(&self, producers: &PoseProducers) -> Option<Pose> {
        self.top(producers).and_then(|id| producers.pose(id))
    }

    /// Producer that was authoritative after the last mutation or refresh.
    pub fn current_producer(&self) -> Option<ProducerId> {
        self.current
    }

    pub fn entries(&self) -> &[ProducerId] {
        &self.entries
    }

    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&Option<ProducerId>) + 'static,
    ) -> SubscriptionId {
        self.changed.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.changed.unsubscribe(id)
    }

    fn top(&self, producers: &PoseProducers) -> Option<ProducerId> {
        self.entries
            .iter()
            .rev()
            .find(|entry| producers.is_valid(**entry))
            .copied()
    }

    fn prune(&mut self, producers: &PoseProducers) {
        while let Some(last) = self.entries.last() {
            if producers.is_valid(*last) {
                break;
            }
            self.entries.pop();
        }
    }

    fn update_current(&mut self, producers: &PoseProducers) {
        let next = self.top(producers);
        if next != self.current {
            self.current = next;
            self.changed.emit(&next);
        }
    }
}

/// Producer table plus the four role stacks.
#[derive(Debug)]
pub struct PoseSources {
    producers: PoseProducers,
    head: PoseSourceStack,
    left_hand: PoseSourceStack,
    right_hand: PoseSourceStack,
    origin: PoseSourceStack,
}

impl PoseSources {
    pub fn new() -> Self {
        Self {
            producers: PoseProducers::new(),
            head: PoseSourceStack::new(TrackedRole::Head),
            left_hand: PoseSourceStack::new(TrackedRole::LeftHand),
            right_hand: PoseSourceStack::new(TrackedRole::RightHand),
            origin: PoseSourceStack::new(TrackedRole::Origin),
        }
    }

    pub fn producers(&self) -> &PoseProducers {
        &self.producers
    }

    pub fn register(&mut self, name: impl Into<String>) -> ProducerId {
        self.producers.register(name)
    }

    pub fn set_pose(&mut self, id: ProducerId, pose: Pose) {
        self.producers.set_pose(id, pose);
    }

    pub fn set_valid(&mut self, id: ProducerId, valid: bool) {
        self.producers.set_valid(id, valid);
    }

    pub fn stack(&self, role: TrackedRole) -> Option<&PoseSourceStack> {
        match role {
            TrackedRole::Head => Some(&self.head),
            TrackedRole::LeftHand => Some(&self.left_hand),
            TrackedRole::RightHand => Some(&self.right_hand),
            TrackedRole::Origin => Some(&self.origin),
            _ => None,
        }
    }

    pub fn push(&mut self, role: TrackedRole, id: ProducerId) {
        if let Some((stack, producers)) = self.split(role) {
            stack.push(producers, id);
        }
    }

    pub fn remove(&mut self, role: TrackedRole, id: ProducerId) {
        if let Some((stack, producers)) = self.split(role) {
            stack.remove(producers, id);
        }
    }

    pub fn subscribe(
        &mut self,
        role: TrackedRole,
        listener: impl FnMut(&Option<ProducerId>) + 'static,
    ) -> Option<SubscriptionId> {
        self.split(role).map(|(stack, _)| stack.subscribe(listener))
    }

    /// Refreshes every stack against the current producer validity.
    pub fn refresh(&mut self) {
        for role in TrackedRole::SIMPLE {
            if let Some((stack, producers)) = self.split(role) {
                stack.refresh(producers);
            }
        }
    }

    /// Pose of the authoritative producer for `role`.
    pub fn pose(&self, role: TrackedRole) -> Option<Pose> {
        self.stack(role)
            .and_then(|stack| stack.current(&self.producers))
    }

    fn split(&mut self, role: TrackedRole) -> Option<(&mut PoseSourceStack, &PoseProducers)> {
        let stack = match role {
            TrackedRole::Head => &mut self.head,
            TrackedRole::LeftHand => &mut self.left_hand,
            TrackedRole::RightHand => &mut self.right_hand,
            TrackedRole::Origin => &mut self.origin,
            _ => return None,
        };
        Some((stack, &self.producers))
    }
}

impl Default for PoseSources {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::pose;

    fn setup() -> (PoseProducers, PoseSourceStack, ProducerId, ProducerId) {
        let mut producers = PoseProducers::new();
        let a = producers.register("controller");
        let b = producers.register("tracked device");
        producers.set_pose(a, pose::from_position(1.0, 0.0, 0.0));
        producers.set_pose(b, pose::from_position(2.0, 0.0, 0.0));
        (producers, PoseSourceStack::new(TrackedRole::Head), a, b)
    }

    #[test]
    fn newest_push_wins_and_removal_restores_previous() {
        let (producers, mut stack, a, b) = setup();
        stack.push(&producers, a);
        stack.push(&producers, b);
        assert_eq!(stack.current_producer(), Some(b));

        stack.remove(&producers, b);
        assert_eq!(stack.current_producer(), Some(a));
        assert_eq!(stack.current(&producers), producers.pose(a));
    }

    #[test]
    fn re_pushed_producer_becomes_most_recent_again() {
        let (producers, mut stack, a, b) = setup();
        stack.push(&producers, a);
        stack.remove(&producers, a);
        stack.push(&producers, b);
        stack.push(&producers, a);

        assert_eq!(stack.entries(), &[b, a]);
        assert_eq!(stack.current_producer(), Some(a));
    }

    #[test]
    fn pushing_the_top_twice_changes_nothing() {
        let (producers, mut stack, a, _) = setup();
        let events = Rc::new(RefCell::new(0));
        let counter = events.clone();
        stack.subscribe(move |_| *counter.borrow_mut() += 1);

        stack.push(&producers, a);
        stack.push(&producers, a);

        assert_eq!(stack.entries(), &[a]);
        assert_eq!(*events.borrow(), 1);
    }

    #[test]
    fn removing_absent_or_buried_entries_keeps_current() {
        let (producers, mut stack, a, b) = setup();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        stack.subscribe(move |current| sink.borrow_mut().push(*current));

        stack.push(&producers, a);
        stack.remove(&producers, b);
        stack.push(&producers, b);
        stack.remove(&producers, a);

        assert_eq!(stack.current_producer(), Some(b));
        assert_eq!(*events.borrow(), vec![Some(a), Some(b)]);
    }

    #[test]
    fn invalid_entries_are_skipped_and_pruned() {
        let (mut producers, mut stack, a, b) = setup();
        stack.push(&producers, a);
        stack.push(&producers, b);

        producers.invalidate(b);
        assert_eq!(stack.current(&producers), producers.pose(a));

        stack.refresh(&producers);
        assert_eq!(stack.entries(), &[a]);
        assert_eq!(stack.current_producer(), Some(a));

        producers.invalidate(a);
        stack.refresh(&producers);
        assert_eq!(stack.current(&producers), None);
        assert!(stack.entries().is_empty());
    }

    #[test]
    fn removing_top_skips_buried_invalid_entries() {
        let mut producers = PoseProducers::new();
        let a = producers.register("a");
        let b = producers.register("b");
        let c = producers.register("c");
        let mut stack = PoseSourceStack::new(TrackedRole::LeftHand);
        stack.push(&producers, a);
        stack.push(&producers, b);
        stack.push(&producers, c);

        producers.invalidate(b);
        stack.remove(&producers, c);

        assert_eq!(stack.entries(), &[a]);
        assert_eq!(stack.current_producer(), Some(a));
    }

    #[test]
    fn sources_route_roles_to_their_stack() {
        let mut sources = PoseSources::new();
        let origin = sources.register("room adjust");
        sources.set_pose(origin, pose::from_position(0.0, 0.5, 0.0));
        sources.push(TrackedRole::Origin, origin);
        sources.push(TrackedRole::Waist, origin);

        assert_eq!(sources.pose(TrackedRole::Origin), Some(pose::from_position(0.0, 0.5, 0.0)));
        assert!(sources.pose(TrackedRole::Head).is_none());
        assert!(sources.stack(TrackedRole::Waist).is_none());
    }
}
