//! Input handling.
//!
//! Windowing and raw devices live outside this crate. The application feeds
//! an [`InputState`] per frame; while this client drives an entity (it is in
//! `moving` or `editing` mode with us as `modeClientId`) that input is turned
//! into local transform writes on the bound entity.

use space_shared::{
    math::{Quat, Vec3},
    net::{EntityId, EntityProps, Mode},
};
use tracing::debug;

/// Which control an entity is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Pointer drag.
    Move,
    /// Transform gizmo.
    Edit,
}

impl Binding {
    pub fn for_mode(mode: Mode) -> Option<Binding> {
        match mode {
            Mode::Moving => Some(Binding::Move),
            Mode::Editing => Some(Binding::Edit),
            Mode::Active | Mode::Dead => None,
        }
    }
}

/// Sampled input for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    /// Where the driven entity should be.
    pub target: Option<Vec3>,
    pub rotation: Option<Quat>,
}

impl InputState {
    pub fn is_empty(&self) -> bool {
        self.target.is_none() && self.rotation.is_none()
    }

    pub fn to_props(self) -> EntityProps {
        EntityProps {
            position: self.target,
            quaternion: self.rotation,
            ..EntityProps::default()
        }
    }
}

/// The entity currently driven by local input. At most one.
#[derive(Debug, Default)]
pub struct InputBinding {
    bound: Option<(EntityId, Binding)>,
}

impl InputBinding {
    pub fn bind(&mut self, id: EntityId, binding: Binding) {
        if let Some((prev, _)) = &self.bound {
            if *prev != id {
                debug!(from = %prev, to = %id, "input rebound");
            }
        }
        self.bound = Some((id, binding));
    }

    /// Releases the binding if `id` holds it.
    pub fn release(&mut self, id: &EntityId) -> bool {
        match &self.bound {
            Some((bound, _)) if bound == id => {
                self.bound = None;
                true
            }
            _ => false,
        }
    }

    pub fn bound(&self) -> Option<(&EntityId, Binding)> {
        self.bound.as_ref().map(|(id, b)| (id, *b))
    }

    pub fn is_bound(&self, id: &EntityId) -> bool {
        matches!(&self.bound, Some((bound, _)) if bound == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_only_clears_the_holder() {
        let mut input = InputBinding::default();
        let a = EntityId::new("1.1");
        let b = EntityId::new("1.2");
        input.bind(a.clone(), Binding::Move);
        assert!(!input.release(&b));
        assert!(input.is_bound(&a));
        input.bind(b.clone(), Binding::Edit);
        assert!(!input.release(&a));
        assert_eq!(input.bound(), Some((&b, Binding::Edit)));
        assert!(input.release(&b));
        assert!(input.bound().is_none());
    }

    #[test]
    fn only_moving_modes_bind() {
        assert_eq!(Binding::for_mode(Mode::Moving), Some(Binding::Move));
        assert_eq!(Binding::for_mode(Mode::Editing), Some(Binding::Edit));
        assert_eq!(Binding::for_mode(Mode::Active), None);
    }
}
