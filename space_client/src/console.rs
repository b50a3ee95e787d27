//! Text commands for the standalone client.
//!
//! Commands:
//!   status                  - Show connection and world summary
//!   clients                 - List connected clients
//!   entities                - List entities with mode and visual
//!   spawn <schema> [x y z]  - Create a locally owned entity
//!   grab <id> [edit]        - Start moving (or editing) an entity
//!   move <id> <x> <y> <z>   - Move an entity you drive or own
//!   release <id>            - Hand the entity back to its script
//!   set <id> <key> <json>   - Write a state key
//!   reload <id>             - Reload an entity's assets
//!   remove <id>             - Remove an entity
//!   name <name>             - Change your display name

use anyhow::Context;
use space_shared::{
    math::{Transform, Vec3},
    net::{EntityId, EntityProps, Mode, StateMap},
};

use crate::space::{LocalIdentity, Space};

/// Runs one command line against the space. Returns lines to print.
pub fn exec(space: &mut Space, line: &str) -> anyhow::Result<Vec<String>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&cmd, args)) = tokens.split_first() else {
        return Ok(Vec::new());
    };

    match cmd {
        "status" => {
            let mut out = Vec::new();
            out.push(format!("Active: {}", space.is_active()));
            if let Some(id) = space.self_id() {
                out.push(format!("Client ID: {id}"));
            }
            if let Some(meta) = space.meta() {
                out.push(format!("Space: {}", meta.name));
            }
            out.push(format!("Frame: {}", space.frame()));
            out.push(format!("Clients: {}", space.clients().len()));
            out.push(format!("Entities: {}", space.entities().len()));
            out.push(format!("Active entities: {}", space.entities().active().len()));
            out.push(format!("Loads in flight: {}", space.loads_in_flight()));
            Ok(out)
        }
        "clients" => Ok(space
            .clients()
            .iter()
            .map(|c| {
                let name = c.user.name.as_deref().unwrap_or("-");
                format!("{} {} ({})", c.id, name, c.user.id)
            })
            .collect()),
        "entities" => {
            let mut out: Vec<String> = space
                .entities()
                .iter()
                .map(|e| {
                    let visual = match e.visual() {
                        v if v.is_loading() => "loading",
                        v if v.is_error() => "error",
                        _ => "built",
                    };
                    let p = e.local_transform().position;
                    format!(
                        "{} schema={} mode={} visual={} pos=({:.2}, {:.2}, {:.2})",
                        e.id(),
                        e.schema_id(),
                        e.mode(),
                        visual,
                        p.x,
                        p.y,
                        p.z
                    )
                })
                .collect();
            out.sort();
            Ok(out)
        }
        "spawn" => {
            let Some(schema) = args.first() else {
                return Ok(vec!["Usage: spawn <schema> [x y z]".to_string()]);
            };
            let position = if args.len() >= 4 {
                parse_vec3(&args[1..4])?
            } else {
                Vec3::ZERO
            };
            let id = space.spawn_local(schema, Transform::from_position(position), StateMap::new())?;
            Ok(vec![format!("Spawned {id}")])
        }
        "grab" => {
            let Some(id) = args.first() else {
                return Ok(vec!["Usage: grab <id> [edit]".to_string()]);
            };
            let mode = if args.get(1) == Some(&"edit") {
                Mode::Editing
            } else {
                Mode::Moving
            };
            space.grab(&EntityId::new(*id), mode)?;
            Ok(vec![format!("Grabbed {id} ({mode})")])
        }
        "move" => {
            if args.len() < 4 {
                return Ok(vec!["Usage: move <id> <x> <y> <z>".to_string()]);
            }
            let position = parse_vec3(&args[1..4])?;
            space.set_props(
                &EntityId::new(args[0]),
                EntityProps {
                    position: Some(position),
                    ..EntityProps::default()
                },
            )?;
            Ok(vec![])
        }
        "release" => {
            let Some(id) = args.first() else {
                return Ok(vec!["Usage: release <id>".to_string()]);
            };
            space.release(&EntityId::new(*id))?;
            Ok(vec![format!("Released {id}")])
        }
        "set" => {
            if args.len() < 3 {
                return Ok(vec!["Usage: set <id> <key> <json>".to_string()]);
            }
            let raw = args[2..].join(" ");
            let value: serde_json::Value =
                serde_json::from_str(&raw).with_context(|| format!("parse value {raw}"))?;
            let mut state = StateMap::new();
            state.insert(args[1].to_string(), value);
            space.set_state(&EntityId::new(args[0]), state)?;
            Ok(vec![])
        }
        "reload" => {
            let Some(id) = args.first() else {
                return Ok(vec!["Usage: reload <id>".to_string()]);
            };
            space.reload(&EntityId::new(*id))?;
            Ok(vec![format!("Reloading {id}")])
        }
        "remove" => {
            let Some(id) = args.first() else {
                return Ok(vec!["Usage: remove <id>".to_string()]);
            };
            space.remove_local(&EntityId::new(*id))?;
            Ok(vec![format!("Removed {id}")])
        }
        "name" => {
            if args.is_empty() {
                return Ok(vec!["Usage: name <name>".to_string()]);
            }
            let changed = space.set_identity(LocalIdentity {
                name: Some(args.join(" ")),
                address: None,
            });
            Ok(vec![if changed { "Name updated" } else { "Name unchanged" }.to_string()])
        }
        other => Ok(vec![format!("Unknown command: {other}")]),
    }
}

fn parse_vec3(args: &[&str]) -> anyhow::Result<Vec3> {
    let mut v = [0.0f32; 3];
    for (slot, raw) in v.iter_mut().zip(args) {
        *slot = raw.parse().with_context(|| format!("parse coordinate {raw}"))?;
    }
    Ok(Vec3::from(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coordinates() {
        assert_eq!(
            parse_vec3(&["1", "2.5", "-3"]).unwrap(),
            Vec3::new(1.0, 2.5, -3.0)
        );
        assert!(parse_vec3(&["1", "x", "3"]).is_err());
    }
}
