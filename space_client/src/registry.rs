//! Entity registry.
//!
//! Owns every entity of the space plus the active set: the entities that get
//! per-frame callbacks. Membership is reference counted because an entity can
//! be active for more than one reason (running script, being moved).

use std::collections::HashMap;

use space_shared::{
    error::WorldError,
    net::{EntityData, EntityId, EntityUpdate},
    schema::SchemaStore,
};
use tracing::warn;

use crate::{
    entity::{Entity, EntityCtx, Env},
    loader::LoadCompletion,
};

/// Reference-counted, insertion-ordered set of entities receiving ticks.
#[derive(Debug, Default)]
pub struct ActiveSet {
    order: Vec<EntityId>,
    refs: HashMap<EntityId, u32>,
}

impl ActiveSet {
    /// Adds one reference. Returns the new count.
    pub fn inc(&mut self, id: &EntityId) -> u32 {
        let count = self.refs.entry(id.clone()).or_insert(0);
        if *count == 0 {
            self.order.push(id.clone());
        }
        *count += 1;
        *count
    }

    /// Drops one reference, or all of them with `force`. Returns whether the
    /// entity left the set.
    pub fn dec(&mut self, id: &EntityId, force: bool) -> bool {
        let Some(count) = self.refs.get_mut(id) else {
            return false;
        };
        *count = if force { 0 } else { count.saturating_sub(1) };
        if *count > 0 {
            return false;
        }
        self.refs.remove(id);
        self.order.retain(|e| e != id);
        true
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.refs.contains_key(id)
    }

    pub fn refs(&self, id: &EntityId) -> u32 {
        self.refs.get(id).copied().unwrap_or(0)
    }

    /// Members at this instant. Iterate this, not the set, while ticking.
    pub fn snapshot(&self) -> Vec<EntityId> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Default)]
pub struct EntityRegistry {
    entities: HashMap<EntityId, Entity>,
    active: ActiveSet,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entity and starts loading it. An unknown schema is not an
    /// error: the entity shows the loading placeholder until reloaded.
    pub fn add_instance(
        &mut self,
        data: EntityData,
        schemas: &SchemaStore,
        env: &mut Env<'_>,
    ) -> Result<&Entity, WorldError> {
        if self.entities.contains_key(&data.id) {
            return Err(WorldError::EntityExists(data.id));
        }
        let schema = match schemas.get_schema(&data.schema_id) {
            Ok(schema) => Some(schema),
            Err(err) => {
                warn!(entity = %data.id, %err, "adding entity with unknown schema");
                None
            }
        };
        let id = data.id.clone();
        let mut entity = Entity::new(data, schema);
        entity.load(&mut EntityCtx {
            env,
            active: &mut self.active,
        });
        Ok(self.entities.entry(id).or_insert(entity))
    }

    pub fn remove_instance(
        &mut self,
        id: &EntityId,
        env: &mut Env<'_>,
    ) -> Result<Entity, WorldError> {
        let mut entity = self
            .entities
            .remove(id)
            .ok_or_else(|| WorldError::EntityNotFound(id.clone()))?;
        entity.destroy(&mut EntityCtx {
            env: &mut *env,
            active: &mut self.active,
        });
        env.packet.forget_entity(id);
        Ok(entity)
    }

    pub fn get_instance(&self, id: &EntityId) -> Result<&Entity, WorldError> {
        self.entities
            .get(id)
            .ok_or_else(|| WorldError::EntityNotFound(id.clone()))
    }

    /// Runs `f` on one entity with a context built from `env`.
    pub fn with_instance<R>(
        &mut self,
        id: &EntityId,
        env: &mut Env<'_>,
        f: impl FnOnce(&mut Entity, &mut EntityCtx<'_, '_>) -> R,
    ) -> Result<R, WorldError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| WorldError::EntityNotFound(id.clone()))?;
        let mut ctx = EntityCtx {
            env,
            active: &mut self.active,
        };
        Ok(f(entity, &mut ctx))
    }

    /// Applies an `update-entity`: state first, then props.
    pub fn apply_update(
        &mut self,
        update: EntityUpdate,
        env: &mut Env<'_>,
    ) -> Result<(), WorldError> {
        let EntityUpdate { id, props, state } = update;
        self.with_instance(&id, env, |entity, ctx| {
            if let Some(state) = state {
                entity.apply_network_state(ctx, state);
            }
            if let Some(props) = props {
                entity.apply_network_props(ctx, props);
            }
        })
    }

    /// Routes a finished load. Returns whether it was applied.
    pub fn complete_load(
        &mut self,
        completion: LoadCompletion,
        env: &mut Env<'_>,
    ) -> Result<bool, WorldError> {
        let LoadCompletion {
            entity,
            generation,
            result,
        } = completion;
        self.with_instance(&entity, env, |e, ctx| e.complete_load(ctx, generation, result))
    }

    /// Reloads an entity against the current schema store.
    pub fn reload(
        &mut self,
        id: &EntityId,
        schemas: &SchemaStore,
        env: &mut Env<'_>,
    ) -> Result<(), WorldError> {
        let schema_id = self.get_instance(id)?.schema_id().to_string();
        let schema = schemas.get_schema(&schema_id).ok();
        self.with_instance(id, env, |e, ctx| e.reload(ctx, schema))
    }

    /// Removes every entity.
    pub fn clear(&mut self, env: &mut Env<'_>) {
        let ids: Vec<EntityId> = self.entities.keys().cloned().collect();
        for id in ids {
            if let Err(err) = self.remove_instance(&id, env) {
                warn!(entity = %id, %err, "failed to remove entity");
            }
        }
    }

    pub fn inc_active(&mut self, id: &EntityId) -> Result<u32, WorldError> {
        if !self.entities.contains_key(id) {
            return Err(WorldError::EntityNotFound(id.clone()));
        }
        Ok(self.active.inc(id))
    }

    pub fn dec_active(&mut self, id: &EntityId, force: bool) -> bool {
        self.active.dec(id, force)
    }

    pub fn active(&self) -> &ActiveSet {
        &self.active
    }

    pub fn update(&mut self, env: &mut Env<'_>, delta: f32) {
        self.dispatch(env, |e, ctx| e.update(ctx, delta));
    }

    pub fn fixed_update(&mut self, env: &mut Env<'_>, delta: f32) {
        self.dispatch(env, |e, ctx| e.fixed_update(ctx, delta));
    }

    pub fn late_update(&mut self, env: &mut Env<'_>, delta: f32) {
        self.dispatch(env, |e, ctx| e.late_update(ctx, delta));
    }

    // Entities leaving the set mid-pass are skipped; ones joining wait a frame.
    fn dispatch(&mut self, env: &mut Env<'_>, mut f: impl FnMut(&mut Entity, &mut EntityCtx<'_, '_>)) {
        for id in self.active.snapshot() {
            if !self.active.contains(&id) {
                continue;
            }
            let Some(entity) = self.entities.get_mut(&id) else {
                continue;
            };
            let mut ctx = EntityCtx {
                env: &mut *env,
                active: &mut self.active,
            };
            f(entity, &mut ctx);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use space_shared::{
        event::EventQueue,
        net::{ClientId, EntityProps, Mode},
        packet::PacketBuilder,
        physics::NullPhysics,
        schema::Schema,
    };

    use super::*;
    use crate::{
        input::InputBinding,
        interp::Interpolation,
        loader::MemoryLoader,
        testing::{entity_data, RecordingRenderer},
    };

    #[test]
    fn clear_tears_down_every_entity() {
        let mut renderer = RecordingRenderer::default();
        let mut physics = NullPhysics::default();
        let mut input = InputBinding::default();
        let mut packet = PacketBuilder::new(0.2);
        let loader = MemoryLoader::new();
        let mut loads = Vec::new();
        let mut events = EventQueue::new();
        let mut env = Env {
            self_id: Some(ClientId(1)),
            renderer: &mut renderer,
            physics: &mut physics,
            input: &mut input,
            packet: &mut packet,
            loader: &loader,
            loads: &mut loads,
            events: &mut events,
            interp: Interpolation::default(),
        };

        let mut schemas = SchemaStore::new();
        schemas.upsert_schema(Schema::new("crate", "crate.glb"));
        let mut registry = EntityRegistry::new();
        for id in ["1.1", "1.2"] {
            registry
                .add_instance(entity_data(id, "crate", ClientId(1)), &schemas, &mut env)
                .unwrap();
        }
        let grabbed = EntityId::new("1.2");
        registry
            .with_instance(&grabbed, &mut env, |e, ctx| {
                e.apply_local_props(
                    ctx,
                    EntityProps {
                        mode: Some(Mode::Moving),
                        mode_client_id: Some(Some(ClientId(1))),
                        ..EntityProps::default()
                    },
                    true,
                )
            })
            .unwrap()
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.active().contains(&grabbed));

        registry.clear(&mut env);
        assert!(registry.is_empty());
        assert!(registry.active().is_empty());
        assert!(env.input.bound().is_none());
        assert!(env.packet.is_empty());
        drop(env);
        assert!(!renderer.mounted_now("1.1"));
        assert!(!renderer.mounted_now("1.2"));
    }

    #[test]
    fn active_set_is_reference_counted() {
        let mut set = ActiveSet::default();
        let a = EntityId::new("1.1");
        let b = EntityId::new("1.2");
        assert_eq!(set.inc(&a), 1);
        assert_eq!(set.inc(&b), 1);
        assert_eq!(set.inc(&a), 2);
        assert_eq!(set.snapshot(), vec![a.clone(), b.clone()]);

        assert!(!set.dec(&a, false));
        assert!(set.contains(&a));
        assert!(set.dec(&a, false));
        assert!(!set.contains(&a));
        assert!(!set.dec(&a, false));

        set.inc(&b);
        assert!(set.dec(&b, true));
        assert!(set.is_empty());
    }
}
