//! What an entity shows.
//!
//! Rebuilt from scratch on every mode change. The root transform is kept on
//! the entity, so a rebuild never moves it.

use std::collections::HashSet;

use space_shared::{math::Vec3, node::Node};
use tracing::warn;

/// Name of the root group of every visual.
pub const ROOT_NODE: &str = "$root";

/// Where a rebuild takes its content from.
#[derive(Debug, Clone, Copy)]
pub enum VisualSource<'a> {
    /// Schema unknown, upload in progress or load in flight.
    Pending,
    /// No usable blueprint (dead, or the load failed).
    Failed,
    Blueprint(&'a Node),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Visual {
    Loading(Node),
    Error(Node),
    Built(Node),
}

impl Visual {
    pub fn build(source: VisualSource<'_>) -> Self {
        match source {
            VisualSource::Pending => Visual::Loading(placeholder("loading", "blue")),
            VisualSource::Failed => Visual::Error(placeholder("error", "red")),
            VisualSource::Blueprint(blueprint) => {
                let root = blueprint.clone();
                warn_duplicate_names(&root);
                Visual::Built(root)
            }
        }
    }

    pub fn root(&self) -> &Node {
        match self {
            Visual::Loading(root) | Visual::Error(root) | Visual::Built(root) => root,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Visual::Loading(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Visual::Error(_))
    }

    pub fn is_built(&self) -> bool {
        matches!(self, Visual::Built(_))
    }
}

impl Default for Visual {
    fn default() -> Self {
        Visual::build(VisualSource::Pending)
    }
}

/// A unit box standing on the origin.
fn placeholder(name: &str, color: &str) -> Node {
    Node::group(ROOT_NODE).with_child(Node::cube(name, color, Vec3::new(0.0, 0.5, 0.0)))
}

// Scripts look nodes up by name; duplicates make that ambiguous.
fn warn_duplicate_names(root: &Node) {
    let mut seen = HashSet::new();
    root.traverse(&mut |node| {
        if !seen.insert(node.name.as_str()) {
            warn!(name = %node.name, "duplicate node name in blueprint");
        }
    });
}
