//! Outbound change batching.
//!
//! Local mutations from every locally authoritative entity are merged into a
//! single [`Packet`] and sent at a fixed wall-clock rate. Writes to the same
//! entity and key within one send window overwrite each other; an empty
//! accumulator never produces traffic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    net::{EntityId, EntityProps, StateMap},
    schema::Schema,
};

/// Per-entity diff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EntityPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<EntityProps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateMap>,
}

impl EntityPatch {
    /// Merges props; later fields win.
    pub fn merge_props(&mut self, props: EntityProps) {
        self.props.get_or_insert_with(EntityProps::default).merge(props);
    }

    /// Merges state keys; later values win.
    pub fn merge_state(&mut self, state: StateMap) {
        let target = self.state.get_or_insert_with(StateMap::new);
        for (k, v) in state {
            target.insert(k, v);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.props.as_ref().map_or(true, EntityProps::is_empty)
            && self.state.as_ref().map_or(true, StateMap::is_empty)
    }
}

/// Coalesced diff for one send window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Packet {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schemas: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entities: BTreeMap<EntityId, EntityPatch>,
}

impl Packet {
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty() && self.entities.is_empty()
    }
}

/// Accumulates local changes and releases them at `send_period` intervals.
#[derive(Debug)]
pub struct PacketBuilder {
    packet: Packet,
    send_period: f32,
    since_send: f32,
}

impl PacketBuilder {
    /// `send_period` is in seconds (0.2 for 5 packets per second).
    pub fn new(send_period: f32) -> Self {
        Self {
            packet: Packet::default(),
            send_period,
            since_send: 0.0,
        }
    }

    pub fn send_period(&self) -> f32 {
        self.send_period
    }

    /// Marks a schema for the next send. Last write wins.
    pub fn push_schema(&mut self, schema: Schema) {
        self.packet.schemas.insert(schema.id.clone(), schema);
    }

    /// Lazily creates the patch for `id` and lets `f` mutate it in place.
    pub fn push_entity_update<F>(&mut self, id: &EntityId, f: F)
    where
        F: FnOnce(&mut EntityPatch),
    {
        let patch = self.packet.entities.entry(id.clone()).or_default();
        f(patch);
    }

    /// Drops any pending patch for an entity (e.g. it was removed locally).
    pub fn forget_entity(&mut self, id: &EntityId) {
        self.packet.entities.remove(id);
    }

    pub fn is_empty(&self) -> bool {
        self.packet.is_empty()
    }

    pub fn pending(&self) -> &Packet {
        &self.packet
    }

    /// Advances the send clock. Returns the accumulated packet when the
    /// interval has elapsed and there is something to send.
    pub fn advance(&mut self, delta: f32) -> Option<Packet> {
        self.since_send += delta;
        if self.since_send < self.send_period {
            return None;
        }
        self.since_send = 0.0;
        self.take()
    }

    /// Takes the accumulated packet regardless of the clock, if non-empty.
    pub fn take(&mut self) -> Option<Packet> {
        if self.packet.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.packet))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::math::Vec3;

    fn state(v: serde_json::Value) -> StateMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn two_updates_for_one_entity_merge_into_one_record() {
        let mut builder = PacketBuilder::new(0.2);
        let id = EntityId::new("1.1");

        builder.push_entity_update(&id, |p| {
            p.merge_props(EntityProps {
                position: Some(Vec3::new(1.0, 0.0, 0.0)),
                ..Default::default()
            })
        });
        builder.push_entity_update(&id, |p| p.merge_state(state(json!({"open": true}))));
        builder.push_entity_update(&id, |p| {
            p.merge_props(EntityProps {
                position: Some(Vec3::new(2.0, 0.0, 0.0)),
                ..Default::default()
            })
        });

        let packet = builder.advance(0.25).expect("packet due");
        assert_eq!(packet.entities.len(), 1);
        let patch = &packet.entities[&id];
        assert_eq!(
            patch.props.as_ref().unwrap().position,
            Some(Vec3::new(2.0, 0.0, 0.0))
        );
        assert_eq!(patch.state.as_ref().unwrap()["open"], json!(true));
        assert!(builder.is_empty());
    }

    #[test]
    fn empty_accumulator_never_sends() {
        let mut builder = PacketBuilder::new(0.2);
        for _ in 0..10 {
            assert!(builder.advance(0.5).is_none());
        }
    }

    #[test]
    fn sends_only_when_interval_elapses() {
        let mut builder = PacketBuilder::new(0.2);
        builder.push_schema(Schema::new("a", "a.glb"));
        assert!(builder.advance(0.1).is_none());
        assert!(builder.advance(0.05).is_none());
        let packet = builder.advance(0.06).expect("interval elapsed");
        assert!(packet.schemas.contains_key("a"));
        // Clock reset: a new change waits for a full period again.
        builder.push_schema(Schema::new("b", "b.glb"));
        assert!(builder.advance(0.1).is_none());
    }

    #[test]
    fn schema_push_is_last_write_wins() {
        let mut builder = PacketBuilder::new(0.2);
        builder.push_schema(Schema::new("a", "v1.glb"));
        builder.push_schema(Schema::new("a", "v2.glb"));
        let packet = builder.take().unwrap();
        assert_eq!(packet.schemas["a"].model, "v2.glb");
    }
}
