//! Physics abstraction.
//!
//! Actors are created for collider nodes of a mounted entity and follow the
//! entity root transform. Simulation itself belongs to the backend.

use crate::{math::Transform, net::EntityId, node::Node};

/// Opaque actor handle issued by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorHandle(pub u64);

/// Physics stepper trait.
pub trait PhysicsBackend: Send {
    fn add_actor(&mut self, entity: &EntityId, node: &Node, transform: &Transform) -> ActorHandle;
    fn remove_actor(&mut self, handle: ActorHandle);
    fn set_actor_transform(&mut self, handle: ActorHandle, transform: &Transform);
    fn step(&mut self, dt_sec: f32);
}

/// No-op physics that still hands out distinct handles.
#[derive(Default)]
pub struct NullPhysics {
    next: u64,
}

impl PhysicsBackend for NullPhysics {
    fn add_actor(&mut self, _entity: &EntityId, _node: &Node, _transform: &Transform) -> ActorHandle {
        self.next += 1;
        ActorHandle(self.next)
    }

    fn remove_actor(&mut self, _handle: ActorHandle) {}

    fn set_actor_transform(&mut self, _handle: ActorHandle, _transform: &Transform) {}

    fn step(&mut self, _dt_sec: f32) {}
}
