use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Families of post-solve motion an avatar can author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryMotionKind {
    TwistRelaxer,
    DynamicBone,
}

impl SecondaryMotionKind {
    /// Twist relaxers correct the solved pose, dynamic bones then simulate on
    /// top of it.
    fn order(self) -> u8 {
        match self {
            SecondaryMotionKind::TwistRelaxer => 0,
            SecondaryMotionKind::DynamicBone => 1,
        }
    }
}

/// One secondary-motion component as authored on the avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryMotionSpec {
    pub name: String,
    pub kind: SecondaryMotionKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// A component that runs around the IK solve.
pub trait SecondaryMotion {
    fn start(&mut self) {}

    /// Runs before the solve, in the same tick.
    fn pre_update(&mut self) {}

    /// Runs after the solve.
    fn late_update(&mut self);
}

/// Stand-in used when no simulation is plugged in; it only traces calls.
#[derive(Debug, Clone)]
pub struct TracedMotion {
    spec: SecondaryMotionSpec,
}

impl TracedMotion {
    pub fn new(spec: &SecondaryMotionSpec) -> Self {
        Self { spec: spec.clone() }
    }
}

impl SecondaryMotion for TracedMotion {
    fn start(&mut self) {
        trace!(name = %self.spec.name, kind = ?self.spec.kind, "start");
    }

    fn late_update(&mut self) {
        trace!(name = %self.spec.name, kind = ?self.spec.kind, "late update");
    }
}

/// Secondary motion registered at avatar load, iterated in registration order.
#[derive(Default)]
pub struct SecondaryMotionList {
    entries: Vec<(SecondaryMotionSpec, Box<dyn SecondaryMotion>)>,
    started: bool,
}

impl SecondaryMotionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every enabled spec through `factory`, twist relaxers first.
    /// Disabled specs are skipped for the lifetime of the list.
    pub fn build<F>(specs: &[SecondaryMotionSpec], mut factory: F) -> Self
    where
        F: FnMut(&SecondaryMotionSpec) -> Box<dyn SecondaryMotion>,
    {
        let mut ordered: Vec<&SecondaryMotionSpec> =
            specs.iter().filter(|spec| spec.enabled).collect();
        ordered.sort_by_key(|spec| spec.kind.order());

        let mut list = Self::new();
        for spec in ordered {
            list.register(spec.clone(), factory(spec));
        }

        let skipped = specs.len() - list.len();
        if skipped > 0 {
            debug!(skipped, "skipping disabled secondary motion");
        }
        list
    }

    pub fn register(&mut self, spec: SecondaryMotionSpec, motion: Box<dyn SecondaryMotion>) {
        self.entries.push((spec, motion));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(spec, _)| spec.name.as_str())
    }

    /// Starts every entry. Later calls do nothing.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        for (_, motion) in &mut self.entries {
            motion.start();
        }
    }

    pub fn pre_update(&mut self) {
        for (_, motion) in &mut self.entries {
            motion.pre_update();
        }
    }

    pub fn late_update(&mut self) {
        for (_, motion) in &mut self.entries {
            motion.late_update();
        }
    }
}

impl fmt::Debug for SecondaryMotionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct Recorder {
        name: String,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl SecondaryMotion for Recorder {
        fn start(&mut self) {
            self.log.borrow_mut().push(format!("start {}", self.name));
        }

        fn pre_update(&mut self) {
            self.log.borrow_mut().push(format!("pre {}", self.name));
        }

        fn late_update(&mut self) {
            self.log.borrow_mut().push(format!("late {}", self.name));
        }
    }

    fn spec(name: &str, kind: SecondaryMotionKind, enabled: bool) -> SecondaryMotionSpec {
        SecondaryMotionSpec {
            name: name.to_string(),
            kind,
            enabled,
        }
    }

    #[test]
    fn registers_enabled_entries_with_relaxers_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let specs = [
            spec("hair", SecondaryMotionKind::DynamicBone, true),
            spec("tail", SecondaryMotionKind::DynamicBone, false),
            spec("forearm", SecondaryMotionKind::TwistRelaxer, true),
        ];
        let mut list = SecondaryMotionList::build(&specs, |spec| {
            Box::new(Recorder {
                name: spec.name.clone(),
                log: log.clone(),
            })
        });

        assert_eq!(list.names().collect::<Vec<_>>(), ["forearm", "hair"]);

        list.start();
        list.start();
        list.pre_update();
        list.late_update();

        assert_eq!(
            *log.borrow(),
            [
                "start forearm",
                "start hair",
                "pre forearm",
                "pre hair",
                "late forearm",
                "late hair",
            ]
        );
    }

    #[test]
    fn specs_default_to_enabled() {
        let spec: SecondaryMotionSpec =
            serde_json::from_str(r#"{ "name": "skirt", "kind": "dynamic_bone" }"#).unwrap();
        assert!(spec.enabled);
    }
}
