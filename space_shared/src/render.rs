//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend.
//! Entities mount, move and unmount whole node trees through this trait.

use crate::{math::Transform, net::EntityId, node::Node};

/// The scene operations an entity needs.
pub trait Renderer: Send {
    /// Adds the tree to the scene at `transform`. Replaces an existing mount.
    fn mount(&mut self, entity: &EntityId, root: &Node, transform: &Transform);
    fn unmount(&mut self, entity: &EntityId);
    fn move_root(&mut self, entity: &EntityId, transform: &Transform);
}

/// A no-op renderer useful for headless clients and tests.
#[derive(Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn mount(&mut self, _entity: &EntityId, _root: &Node, _transform: &Transform) {}
    fn unmount(&mut self, _entity: &EntityId) {}
    fn move_root(&mut self, _entity: &EntityId, _transform: &Transform) {}
}
