//! Entity scripts.
//!
//! A schema may name a script. The loader resolves it to a [`ScriptModule`];
//! every rebuild in `active` mode instantiates fresh [`ScriptHooks`] from it.
//! Scripts never see the entity itself. They get a [`ScriptContext`] that
//! exposes exactly what they may touch, and writes through it are gated on
//! authority the same way local prop changes are.
//!
//! Every hook runs fault-isolated: an `Err` or a panic ends up as a
//! [`ScriptError`] and the caller kills the entity.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use serde_json::Value;
use space_shared::{
    math::{Quat, Transform, Vec3},
    net::{EntityId, EntityProps, StateMap},
    node::Node,
    packet::PacketBuilder,
};
use tracing::warn;

/// Failure raised by (or on behalf of) a script.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("script error: {0}")]
    Failed(String),
    #[error("script panicked in `{hook}`: {message}")]
    Panicked { hook: &'static str, message: String },
}

impl ScriptError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ScriptError::Failed(msg.into())
    }
}

/// A loaded script. Shared by every entity whose schema names it.
pub trait ScriptModule: Send + Sync {
    /// Runs the script's top level for one entity and returns its handlers.
    fn instantiate(&self, ctx: &mut ScriptContext<'_>) -> Result<Box<dyn ScriptHooks>, ScriptError>;
}

/// Lifecycle handlers registered by a script instance. All optional.
pub trait ScriptHooks: Send {
    fn setup(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<(), ScriptError> {
        Ok(())
    }

    fn start(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<(), ScriptError> {
        Ok(())
    }

    fn update(&mut self, _ctx: &mut ScriptContext<'_>, _delta: f32) -> Result<(), ScriptError> {
        Ok(())
    }

    fn fixed_update(&mut self, _ctx: &mut ScriptContext<'_>, _delta: f32) -> Result<(), ScriptError> {
        Ok(())
    }

    fn late_update(&mut self, _ctx: &mut ScriptContext<'_>, _delta: f32) -> Result<(), ScriptError> {
        Ok(())
    }

    /// Called after remote state was merged. `ctx.state_changes()` holds the diff.
    fn on_state(&mut self, _ctx: &mut ScriptContext<'_>) -> Result<(), ScriptError> {
        Ok(())
    }
}

/// Handle to a script variable created with [`ScriptContext::create_var`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptVar(String);

impl ScriptVar {
    /// Key of the variable inside the entity state (`$0`, `$1`, ...).
    pub fn key(&self) -> &str {
        &self.0
    }
}

/// What a running script may read and write.
pub struct ScriptContext<'a> {
    id: &'a EntityId,
    authority: bool,
    transform: &'a mut Transform,
    state: &'a mut StateMap,
    state_changes: &'a StateMap,
    var_count: &'a mut u32,
    root: &'a Node,
    packet: &'a mut PacketBuilder,
    moved: bool,
}

impl<'a> ScriptContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: &'a EntityId,
        authority: bool,
        transform: &'a mut Transform,
        state: &'a mut StateMap,
        state_changes: &'a StateMap,
        var_count: &'a mut u32,
        root: &'a Node,
        packet: &'a mut PacketBuilder,
    ) -> Self {
        Self {
            id,
            authority,
            transform,
            state,
            state_changes,
            var_count,
            root,
            packet,
            moved: false,
        }
    }

    pub fn id(&self) -> &EntityId {
        self.id
    }

    /// True on exactly one client: the one allowed to write this entity.
    pub fn is_authority(&self) -> bool {
        self.authority
    }

    pub fn state(&self) -> &StateMap {
        self.state
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Keys changed by the most recent remote state update.
    pub fn state_changes(&self) -> &StateMap {
        self.state_changes
    }

    /// Writes a state key and schedules it for replication.
    ///
    /// Ignored (returns false) unless this client is the authority.
    pub fn set_state(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if !self.authority {
            warn!(entity = %self.id, %key, "script state write without authority ignored");
            return false;
        }
        self.state.insert(key.clone(), value.clone());
        let mut diff = StateMap::new();
        diff.insert(key, value);
        self.packet.push_entity_update(self.id, |p| p.merge_state(diff));
        true
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    pub fn quaternion(&self) -> Quat {
        self.transform.quaternion
    }

    /// Moves the entity root. Authority only; replicated.
    pub fn set_position(&mut self, position: Vec3) -> bool {
        if !self.authority {
            return false;
        }
        self.transform.position = position;
        self.moved = true;
        self.packet.push_entity_update(self.id, |p| {
            p.merge_props(EntityProps {
                position: Some(position),
                ..EntityProps::default()
            })
        });
        true
    }

    /// Rotates the entity root. Authority only; replicated.
    pub fn set_quaternion(&mut self, quaternion: Quat) -> bool {
        if !self.authority {
            return false;
        }
        self.transform.quaternion = quaternion;
        self.moved = true;
        self.packet.push_entity_update(self.id, |p| {
            p.merge_props(EntityProps {
                quaternion: Some(quaternion),
                ..EntityProps::default()
            })
        });
        true
    }

    /// Looks up a node of the current visual by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.root.find(name)
    }

    /// Declares a replicated variable.
    ///
    /// Variables are numbered in creation order, so every client running the
    /// same script agrees on the keys. An existing value (from the network or a
    /// previous build) is kept; otherwise `initial` is stored locally.
    pub fn create_var(&mut self, initial: Value) -> ScriptVar {
        let key = format!("${}", *self.var_count);
        *self.var_count += 1;
        self.state.entry(key.clone()).or_insert(initial);
        ScriptVar(key)
    }

    pub fn var(&self, var: &ScriptVar) -> Option<&Value> {
        self.state.get(var.key())
    }

    /// Sets a variable. Authority only; replicated.
    pub fn set_var(&mut self, var: &ScriptVar, value: Value) -> bool {
        self.set_state(var.key().to_string(), value)
    }

    pub(crate) fn moved(&self) -> bool {
        self.moved
    }
}

/// Runs a script hook, turning panics into [`ScriptError::Panicked`].
pub(crate) fn guard<T>(
    hook: &'static str,
    f: impl FnOnce() -> Result<T, ScriptError>,
) -> Result<T, ScriptError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(ScriptError::Panicked {
            hook,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Fixture {
        id: EntityId,
        transform: Transform,
        state: StateMap,
        changes: StateMap,
        vars: u32,
        root: Node,
        packet: PacketBuilder,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                id: EntityId::new("1.1"),
                transform: Transform::default(),
                state: StateMap::new(),
                changes: StateMap::new(),
                vars: 0,
                root: Node::group("$root").with_child(Node::cube("door", "red", Vec3::ZERO)),
                packet: PacketBuilder::new(0.2),
            }
        }

        fn ctx(&mut self, authority: bool) -> ScriptContext<'_> {
            ScriptContext::new(
                &self.id,
                authority,
                &mut self.transform,
                &mut self.state,
                &self.changes,
                &mut self.vars,
                &self.root,
                &mut self.packet,
            )
        }
    }

    #[test]
    fn authority_writes_are_replicated() {
        let mut fx = Fixture::new();
        {
            let mut ctx = fx.ctx(true);
            assert!(ctx.set_state("open", json!(true)));
            assert!(ctx.set_position(Vec3::new(1.0, 0.0, 0.0)));
            assert!(ctx.moved());
            assert!(ctx.node("door").is_some());
        }
        let patch = &fx.packet.pending().entities[&fx.id];
        assert_eq!(patch.state.as_ref().unwrap()["open"], json!(true));
        assert_eq!(
            patch.props.as_ref().unwrap().position,
            Some(Vec3::new(1.0, 0.0, 0.0))
        );
    }

    #[test]
    fn non_authority_writes_are_ignored() {
        let mut fx = Fixture::new();
        {
            let mut ctx = fx.ctx(false);
            assert!(!ctx.set_state("open", json!(true)));
            assert!(!ctx.set_position(Vec3::new(1.0, 0.0, 0.0)));
            assert!(!ctx.moved());
        }
        assert!(fx.state.is_empty());
        assert!(fx.packet.is_empty());
    }

    #[test]
    fn vars_are_numbered_and_keep_existing_values() {
        let mut fx = Fixture::new();
        fx.state.insert("$1".into(), json!("remote"));
        let mut ctx = fx.ctx(false);
        let a = ctx.create_var(json!(0));
        let b = ctx.create_var(json!("local"));
        assert_eq!(a.key(), "$0");
        assert_eq!(b.key(), "$1");
        assert_eq!(ctx.var(&a), Some(&json!(0)));
        assert_eq!(ctx.var(&b), Some(&json!("remote")));
    }

    #[test]
    fn guard_catches_panics() {
        let result: Result<(), _> = guard("update", || panic!("boom"));
        assert_eq!(
            result,
            Err(ScriptError::Panicked {
                hook: "update",
                message: "boom".into()
            })
        );
        assert_eq!(guard("start", || Ok(3)), Ok(3));
    }
}
