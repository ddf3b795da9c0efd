//! Index-addressed pose hierarchy.
//!
//! Every node stores a parent index and a pose local to that parent. World
//! poses are computed on demand by walking the parent chain, so changing one
//! node's local pose or parent never touches any other node.

use tracing::warn;

use crate::pose::Pose;

/// Index of a node inside a [`PoseGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct PoseNode {
    name: String,
    parent: Option<NodeId>,
    local: Pose,
}

/// Arena of pose nodes. Nodes are never removed; the graph is kept acyclic by
/// [`PoseGraph::set_parent`].
#[derive(Debug, Clone, Default)]
pub struct PoseGraph {
    nodes: Vec<PoseNode>,
}

impl PoseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, parent: Option<NodeId>, local: Pose) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PoseNode {
            name: name.into(),
            parent,
            local,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn name(&self, node: NodeId) -> &str {
        &self.nodes[node.0].name
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn local(&self, node: NodeId) -> Pose {
        self.nodes[node.0].local
    }

    pub fn set_local(&mut self, node: NodeId, local: Pose) {
        self.nodes[node.0].local = local;
    }

    /// Moves `node` under `parent`, keeping its local pose. Returns `false`
    /// and leaves the graph untouched if the move would create a cycle.
    pub fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>) -> bool {
        if let Some(parent) = parent {
            if self.is_descendant_or_self(parent, node) {
                warn!(
                    node = self.name(node),
                    parent = self.name(parent),
                    "refusing to reparent a node under its own subtree"
                );
                return false;
            }
        }

        self.nodes[node.0].parent = parent;
        true
    }

    /// Pose of `node` relative to the graph root.
    pub fn world(&self, node: NodeId) -> Pose {
        let mut pose = self.nodes[node.0].local;
        let mut cursor = self.nodes[node.0].parent;

        while let Some(parent) = cursor {
            let parent_node = &self.nodes[parent.0];
            pose = parent_node.local * pose;
            cursor = parent_node.parent;
        }

        pose
    }

    /// Pose of `node` expressed in `frame`'s coordinates.
    pub fn relative(&self, node: NodeId, frame: NodeId) -> Pose {
        self.world(frame).inverse() * self.world(node)
    }

    /// Path from the root, e.g. `Origin/Waist/Calibration Offset`.
    pub fn path(&self, node: NodeId) -> String {
        let mut names = vec![self.name(node)];
        let mut cursor = self.parent(node);

        while let Some(parent) = cursor {
            names.push(self.name(parent));
            cursor = self.parent(parent);
        }

        names.reverse();
        names.join("/")
    }

    fn is_descendant_or_self(&self, candidate: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(candidate);

        while let Some(node) = cursor {
            if node == ancestor {
                return true;
            }
            cursor = self.nodes[node.0].parent;
        }

        false
    }
}
