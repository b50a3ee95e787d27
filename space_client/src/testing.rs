//! Helpers for tests and headless runs.

use std::sync::{Arc, Mutex, MutexGuard};

use space_shared::{
    math::{Transform, Vec3},
    net::{ClientId, EntityData, EntityId, Mode, StateMap},
    node::Node,
    render::Renderer,
};

/// One call made on a [`RecordingRenderer`].
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    /// `shown` is the name of the root's first child (`loading`, `error`, ...).
    Mount { entity: EntityId, shown: String },
    Unmount { entity: EntityId },
    Move { entity: EntityId, transform: Transform },
}

/// Renderer that records every call. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    log: Arc<Mutex<Vec<RenderOp>>>,
}

impl RecordingRenderer {
    fn log(&self) -> MutexGuard<'_, Vec<RenderOp>> {
        // a poisoned log is still a log
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ops(&self) -> Vec<RenderOp> {
        self.log().clone()
    }

    pub fn mounts_of(&self, entity: &str) -> usize {
        self.log()
            .iter()
            .filter(|op| matches!(op, RenderOp::Mount { entity: e, .. } if e.as_str() == entity))
            .count()
    }

    /// Whether the entity's latest mount was not followed by an unmount.
    pub fn mounted_now(&self, entity: &str) -> bool {
        self.log()
            .iter()
            .rev()
            .find_map(|op| match op {
                RenderOp::Mount { entity: e, .. } if e.as_str() == entity => Some(true),
                RenderOp::Unmount { entity: e } if e.as_str() == entity => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }

    /// What the entity's latest mount showed.
    pub fn last_shown(&self, entity: &str) -> Option<String> {
        self.log().iter().rev().find_map(|op| match op {
            RenderOp::Mount { entity: e, shown } if e.as_str() == entity => Some(shown.clone()),
            _ => None,
        })
    }

    /// Last transform the entity was moved to.
    pub fn last_move(&self, entity: &str) -> Option<Transform> {
        self.log().iter().rev().find_map(|op| match op {
            RenderOp::Move { entity: e, transform } if e.as_str() == entity => Some(*transform),
            _ => None,
        })
    }
}

impl Renderer for RecordingRenderer {
    fn mount(&mut self, entity: &EntityId, root: &Node, _transform: &Transform) {
        let shown = root
            .children
            .first()
            .map_or_else(|| root.name.clone(), |c| c.name.clone());
        self.log().push(RenderOp::Mount {
            entity: entity.clone(),
            shown,
        });
    }

    fn unmount(&mut self, entity: &EntityId) {
        self.log().push(RenderOp::Unmount {
            entity: entity.clone(),
        });
    }

    fn move_root(&mut self, entity: &EntityId, transform: &Transform) {
        self.log().push(RenderOp::Move {
            entity: entity.clone(),
            transform: *transform,
        });
    }
}

/// A `$root` group holding one named box with a collider.
pub fn blueprint(name: &str) -> Node {
    Node::group("$root").with_child(Node::cube(name, "grey", Vec3::ZERO).with_collider())
}

/// An active entity at the origin, owned by `authority`.
pub fn entity_data(id: &str, schema_id: &str, authority: ClientId) -> EntityData {
    EntityData {
        id: EntityId::new(id),
        schema_id: schema_id.to_string(),
        creator: format!("user-{authority}"),
        authority,
        uploading: None,
        mode: Mode::Active,
        mode_client_id: None,
        position: Vec3::ZERO,
        quaternion: Default::default(),
        state: StateMap::new(),
    }
}
