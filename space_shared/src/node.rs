//! Visual node trees.
//!
//! A blueprint is a [`Node`] tree decoded from a model asset. Entities clone
//! it on every rebuild and hand the clone to the renderer.

use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3};

/// Node payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Group,
    Box {
        #[serde(default = "default_box_size")]
        size: [f32; 3],
        #[serde(default = "default_box_color")]
        color: String,
    },
    Mesh {
        model: String,
    },
}

fn default_box_size() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

fn default_box_color() -> String {
    "blue".to_string()
}

/// A named node with a local transform and children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub quaternion: Quat,
    /// Whether physics should create an actor for this node.
    #[serde(default)]
    pub collider: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Group,
            position: Vec3::ZERO,
            quaternion: Quat::IDENTITY,
            collider: false,
            children: Vec::new(),
        }
    }

    pub fn cube(name: impl Into<String>, color: impl Into<String>, position: Vec3) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Box {
                size: default_box_size(),
                color: color.into(),
            },
            position,
            quaternion: Quat::IDENTITY,
            collider: false,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_collider(mut self) -> Self {
        self.collider = true;
        self
    }

    /// Depth-first, parent before children.
    pub fn traverse<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        for child in &self.children {
            child.traverse(f);
        }
    }

    pub fn find(&self, name: &str) -> Option<&Node> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blueprint_json_decodes_with_defaults() {
        let raw = r#"{
            "name": "$root", "type": "group",
            "children": [
                {"name": "body", "type": "box", "color": "red", "collider": true},
                {"name": "hat", "type": "mesh", "model": "hat.glb", "position": [0, 2, 0]}
            ]
        }"#;
        let node: Node = serde_json::from_str(raw).unwrap();
        assert_eq!(node.count(), 3);
        let body = node.find("body").unwrap();
        assert!(body.collider);
        assert_eq!(
            body.kind,
            NodeKind::Box {
                size: [1.0, 1.0, 1.0],
                color: "red".into()
            }
        );
        assert_eq!(node.find("hat").unwrap().position, Vec3::new(0.0, 2.0, 0.0));
    }
}
