//! Scripts compiled into the standalone client.

use std::sync::Arc;

use serde_json::json;
use space_shared::math::Quat;
use tracing::debug;

use crate::script::{ScriptContext, ScriptError, ScriptHooks, ScriptModule, ScriptVar};

/// `(url, module)` pairs to register with a loader.
pub fn builtin_scripts() -> Vec<(&'static str, Arc<dyn ScriptModule>)> {
    vec![("spin.js", Arc::new(Spin))]
}

/// Rotates the entity around Y. Speed comes from the `speed` state key
/// (radians per second, default 1).
pub struct Spin;

struct SpinHooks {
    angle: ScriptVar,
}

impl ScriptModule for Spin {
    fn instantiate(&self, ctx: &mut ScriptContext<'_>) -> Result<Box<dyn ScriptHooks>, ScriptError> {
        let angle = ctx.create_var(json!(0.0));
        Ok(Box::new(SpinHooks { angle }))
    }
}

impl ScriptHooks for SpinHooks {
    fn fixed_update(&mut self, ctx: &mut ScriptContext<'_>, delta: f32) -> Result<(), ScriptError> {
        if !ctx.is_authority() {
            return Ok(());
        }
        let speed = ctx.get("speed").and_then(|v| v.as_f64()).unwrap_or(1.0) as f32;
        let angle = ctx
            .var(&self.angle)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ScriptError::failed("spin angle is not a number"))? as f32;
        let angle = (angle + speed * delta) % std::f32::consts::TAU;
        ctx.set_var(&self.angle, json!(angle));
        ctx.set_quaternion(Quat::from_rotation_y(angle));
        Ok(())
    }

    fn on_state(&mut self, ctx: &mut ScriptContext<'_>) -> Result<(), ScriptError> {
        if let Some(speed) = ctx.state_changes().get("speed") {
            debug!(entity = %ctx.id(), %speed, "spin speed changed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use space_shared::{
        math::Transform,
        net::{EntityId, StateMap},
        node::Node,
        packet::PacketBuilder,
    };

    use super::*;

    #[test]
    fn spin_advances_on_authority_only() {
        let id = EntityId::new("1.1");
        let root = Node::group("$root");
        let changes = StateMap::new();
        let mut transform = Transform::default();
        let mut state = StateMap::new();
        state.insert("speed".into(), json!(2.0));
        let mut packet = PacketBuilder::new(0.2);

        for authority in [false, true] {
            let mut vars = 0;
            let mut ctx = ScriptContext::new(
                &id,
                authority,
                &mut transform,
                &mut state,
                &changes,
                &mut vars,
                &root,
                &mut packet,
            );
            let mut hooks = Spin.instantiate(&mut ctx).unwrap();
            hooks.fixed_update(&mut ctx, 0.5).unwrap();
        }
        // first pass created $0 and did nothing, second reused $0 and spun
        assert_eq!(state["$0"], json!(1.0));
        assert_eq!(transform.quaternion, Quat::from_rotation_y(1.0));
        assert!(!packet.is_empty());
    }
}
