//! Client-side entity.
//!
//! An entity is a schema instance with replicated props (transform, mode,
//! uploading) and an opaque state blob. Two transforms are tracked: `local`
//! is what is rendered, `network` is the last value received from the relay.
//!
//! Mode machine:
//! - `active`: the schema script runs (if any); the visual is static.
//! - `moving`/`editing`: `modeClientId` drives the transform. On the driver,
//!   input is bound to the entity. Everyone else chases `network` each frame
//!   and snaps to it when the mode ends.
//! - `dead`: killed locally after a load failure or script fault. Shows the
//!   error placeholder until reloaded.
//!
//! [`Entity::check_mode`] is the only place that rebuilds, and it is
//! idempotent unless forced.

use std::sync::Arc;

use space_shared::{
    error::WorldError,
    event::{EventQueue, SpaceEvent},
    math::Transform,
    net::{ClientId, EntityData, EntityId, EntityProps, Mode, StateMap},
    node::Node,
    packet::PacketBuilder,
    physics::{ActorHandle, PhysicsBackend},
    render::Renderer,
    schema::Schema,
};
use tracing::{debug, error, warn};

use crate::{
    input::{Binding, InputBinding},
    interp::Interpolation,
    loader::{LoadError, LoadRequest, LoadedAssets, Loader},
    registry::ActiveSet,
    script::{guard, ScriptContext, ScriptError, ScriptHooks, ScriptModule},
    visual::{Visual, VisualSource},
};

/// Everything outside the entity that it may touch while handling a call.
pub struct Env<'a> {
    pub self_id: Option<ClientId>,
    pub renderer: &'a mut dyn Renderer,
    pub physics: &'a mut dyn PhysicsBackend,
    pub input: &'a mut InputBinding,
    pub packet: &'a mut PacketBuilder,
    pub loader: &'a dyn Loader,
    pub loads: &'a mut Vec<LoadRequest>,
    pub events: &'a mut EventQueue<SpaceEvent>,
    pub interp: Interpolation,
}

/// [`Env`] plus the registry's active set.
pub struct EntityCtx<'a, 'b> {
    pub env: &'a mut Env<'b>,
    pub active: &'a mut ActiveSet,
}

pub struct Entity {
    id: EntityId,
    schema_id: String,
    schema: Option<Arc<Schema>>,
    creator: String,
    authority: ClientId,
    uploading: Option<ClientId>,
    mode: Mode,
    mode_client_id: Option<ClientId>,
    prev_mode: Option<Mode>,
    prev_mode_client_id: Option<ClientId>,
    // mode to restore on reload after a kill
    revive: Option<(Mode, Option<ClientId>)>,

    local: Transform,
    network: Transform,
    state: StateMap,
    state_changes: StateMap,
    script_var_count: u32,

    blueprint: Option<Arc<Node>>,
    script: Option<Arc<dyn ScriptModule>>,
    hooks: Option<Box<dyn ScriptHooks>>,
    visual: Visual,
    mounted: bool,
    actors: Vec<ActorHandle>,

    load_generation: u64,
    loading: bool,

    active_for_script: bool,
    active_for_moving: bool,
    bound_input: bool,
    rebuilds: u64,
    destroyed: bool,
}

impl Entity {
    /// Builds the record. Nothing is mounted until [`Entity::load`].
    pub fn new(data: EntityData, schema: Option<Arc<Schema>>) -> Self {
        let transform = Transform::new(data.position, data.quaternion);
        Self {
            id: data.id,
            schema_id: data.schema_id,
            schema,
            creator: data.creator,
            authority: data.authority,
            uploading: data.uploading,
            mode: data.mode,
            mode_client_id: data.mode_client_id,
            prev_mode: None,
            prev_mode_client_id: None,
            revive: None,
            local: transform,
            network: transform,
            state: data.state,
            state_changes: StateMap::new(),
            script_var_count: 0,
            blueprint: None,
            script: None,
            hooks: None,
            visual: Visual::default(),
            mounted: false,
            actors: Vec::new(),
            load_generation: 0,
            loading: false,
            active_for_script: false,
            active_for_moving: false,
            bound_input: false,
            rebuilds: 0,
            destroyed: false,
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    pub fn creator(&self) -> &str {
        &self.creator
    }

    pub fn authority(&self) -> ClientId {
        self.authority
    }

    pub fn uploading(&self) -> Option<ClientId> {
        self.uploading
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn mode_client_id(&self) -> Option<ClientId> {
        self.mode_client_id
    }

    pub fn local_transform(&self) -> &Transform {
        &self.local
    }

    pub fn network_transform(&self) -> &Transform {
        &self.network
    }

    pub fn state(&self) -> &StateMap {
        &self.state
    }

    pub fn visual(&self) -> &Visual {
        &self.visual
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn has_script(&self) -> bool {
        self.hooks.is_some()
    }

    pub fn load_generation(&self) -> u64 {
        self.load_generation
    }

    /// How many times the visual was rebuilt.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn script_var_count(&self) -> u32 {
        self.script_var_count
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Current record, as a late joiner would receive it.
    pub fn to_data(&self) -> EntityData {
        EntityData {
            id: self.id.clone(),
            schema_id: self.schema_id.clone(),
            creator: self.creator.clone(),
            authority: self.authority,
            uploading: self.uploading,
            mode: self.mode,
            mode_client_id: self.mode_client_id,
            position: self.local.position,
            quaternion: self.local.quaternion,
            state: self.state.clone(),
        }
    }

    pub fn is_authority(&self, self_id: Option<ClientId>) -> bool {
        self_id == Some(self.authority)
    }

    /// This client moves the entity.
    pub fn is_driver(&self, self_id: Option<ClientId>) -> bool {
        self.mode.is_moving() && self.mode_client_id.is_some() && self.mode_client_id == self_id
    }

    fn is_uploading(&self, env: &Env<'_>) -> bool {
        let Some(uploader) = self.uploading else {
            return false;
        };
        if let Some(schema) = &self.schema {
            if env.loader.has(&schema.model) {
                return false;
            }
        }
        env.self_id != Some(uploader)
    }

    /// Starts loading the schema's assets.
    ///
    /// Bumps the load generation first, so any load still in flight becomes
    /// stale even if this call ends up not dispatching anything.
    pub fn load(&mut self, ctx: &mut EntityCtx<'_, '_>) {
        if self.destroyed {
            return;
        }
        self.load_generation += 1;
        self.blueprint = None;
        self.script = None;
        self.loading = false;

        if self.is_uploading(ctx.env) {
            debug!(entity = %self.id, "assets still uploading");
        } else if let Some(schema) = self.schema.clone() {
            ctx.env.loads.push(LoadRequest::for_schema(
                self.id.clone(),
                self.load_generation,
                &schema,
            ));
            self.loading = true;
        } else {
            debug!(entity = %self.id, schema = %self.schema_id, "schema unknown, instantiation deferred");
        }
        self.check_mode(ctx, true);
    }

    /// Applies the result of a load. Returns false if it was stale.
    pub fn complete_load(
        &mut self,
        ctx: &mut EntityCtx<'_, '_>,
        generation: u64,
        result: Result<LoadedAssets, LoadError>,
    ) -> bool {
        if self.destroyed {
            debug!(entity = %self.id, "load finished after destroy");
            return false;
        }
        if generation != self.load_generation {
            debug!(
                entity = %self.id,
                generation,
                current = self.load_generation,
                "discarding superseded load"
            );
            return false;
        }
        self.loading = false;
        match result {
            Ok(assets) => {
                self.blueprint = Some(assets.blueprint);
                self.script = assets.script;
                self.check_mode(ctx, true);
            }
            Err(err) => self.kill(ctx, format!("load failed: {err}")),
        }
        true
    }

    /// Loads again, optionally against a newer schema. Revives a dead entity.
    pub fn reload(&mut self, ctx: &mut EntityCtx<'_, '_>, schema: Option<Arc<Schema>>) {
        if let Some(schema) = schema {
            self.schema_id = schema.id.clone();
            self.schema = Some(schema);
        }
        if let Some((mode, client)) = self.revive.take() {
            self.mode = mode;
            self.mode_client_id = client;
        }
        self.load(ctx);
    }

    /// Reconciles teardown, visual and configuration with the current mode.
    ///
    /// No-op (returns false) when neither `mode` nor `modeClientId` changed
    /// since the last run, unless `force` is set.
    pub fn check_mode(&mut self, ctx: &mut EntityCtx<'_, '_>, force: bool) -> bool {
        if !force
            && self.prev_mode == Some(self.mode)
            && self.prev_mode_client_id == self.mode_client_id
        {
            return false;
        }
        self.teardown(ctx);
        self.rebuild(ctx.env);
        self.prev_mode = Some(self.mode);
        self.prev_mode_client_id = self.mode_client_id;
        if let Err(fault) = self.configure(ctx) {
            self.kill(ctx, fault.to_string());
        }
        true
    }

    fn teardown(&mut self, ctx: &mut EntityCtx<'_, '_>) {
        if self.active_for_script {
            ctx.active.dec(&self.id, false);
            self.active_for_script = false;
        }
        if self.active_for_moving {
            ctx.active.dec(&self.id, false);
            self.active_for_moving = false;
        }
        let Some(prev) = self.prev_mode else {
            return;
        };
        if !prev.is_moving() {
            return;
        }
        let was_driver =
            self.prev_mode_client_id.is_some() && self.prev_mode_client_id == ctx.env.self_id;
        if was_driver {
            if self.bound_input {
                ctx.env.input.release(&self.id);
                self.bound_input = false;
            }
        } else {
            self.local = self.network;
        }
    }

    fn rebuild(&mut self, env: &mut Env<'_>) {
        self.unmount(env);
        self.hooks = None;
        for i in 0..self.script_var_count {
            self.state.remove(&format!("${i}"));
        }
        self.script_var_count = 0;

        let pending = self.loading || self.schema.is_none() || self.is_uploading(env);
        let source = match (&self.blueprint, pending) {
            (_, true) => VisualSource::Pending,
            (Some(blueprint), false) => VisualSource::Blueprint(blueprint),
            (None, false) => VisualSource::Failed,
        };
        self.visual = Visual::build(source);
        self.rebuilds += 1;
    }

    fn configure(&mut self, ctx: &mut EntityCtx<'_, '_>) -> Result<(), ScriptError> {
        match self.mode {
            Mode::Active => {
                if let Some(script) = self.script.clone() {
                    let hooks =
                        self.with_script(ctx.env, |sc| guard("init", || script.instantiate(sc)))?;
                    self.hooks = Some(hooks);
                }
                self.emit(ctx.env, "setup", |h, sc| h.setup(sc))?;
                self.mount(ctx.env);
                self.emit(ctx.env, "start", |h, sc| h.start(sc))?;
                if self.hooks.is_some() {
                    ctx.active.inc(&self.id);
                    self.active_for_script = true;
                }
            }
            Mode::Moving | Mode::Editing => {
                if self.is_driver(ctx.env.self_id) {
                    if let Some(binding) = Binding::for_mode(self.mode) {
                        ctx.env.input.bind(self.id.clone(), binding);
                        self.bound_input = true;
                    }
                }
                ctx.active.inc(&self.id);
                self.active_for_moving = true;
                self.mount(ctx.env);
            }
            Mode::Dead => self.mount(ctx.env),
        }
        Ok(())
    }

    /// Marks the entity dead and shows the error placeholder. Local only.
    pub fn kill(&mut self, ctx: &mut EntityCtx<'_, '_>, reason: impl Into<String>) {
        let reason = reason.into();
        error!(entity = %self.id, %reason, "entity killed");
        self.blueprint = None;
        self.script = None;
        self.loading = false;
        // a kill outranks any load still in flight
        self.load_generation += 1;
        if self.mode != Mode::Dead {
            self.revive = Some((self.mode, self.mode_client_id));
        }
        self.mode = Mode::Dead;
        self.mode_client_id = None;
        ctx.env.events.push(SpaceEvent::EntityKilled {
            id: self.id.clone(),
            reason,
        });
        self.check_mode(ctx, true);
    }

    /// Tears down everything registered with the outside world.
    pub fn destroy(&mut self, ctx: &mut EntityCtx<'_, '_>) {
        ctx.active.dec(&self.id, true);
        self.active_for_script = false;
        self.active_for_moving = false;
        if self.bound_input {
            ctx.env.input.release(&self.id);
            self.bound_input = false;
        }
        self.unmount(ctx.env);
        self.hooks = None;
        self.destroyed = true;
        self.load_generation += 1;
    }

    /// Applies a locally requested prop change.
    ///
    /// A mode change in the same call is applied before the transform is
    /// checked, so one call can grab an entity and move it. Transform writes
    /// need the driver while moving and the authority otherwise. Accepted
    /// changes are queued for the relay when `sync` is set.
    pub fn apply_local_props(
        &mut self,
        ctx: &mut EntityCtx<'_, '_>,
        props: EntityProps,
        sync: bool,
    ) -> Result<(), WorldError> {
        let self_id = ctx.env.self_id.ok_or(WorldError::NotConnected)?;
        let next_mode = props.mode.unwrap_or(self.mode);
        let next_driver = props.mode_client_id.unwrap_or(self.mode_client_id);
        let moves = props.position.is_some() || props.quaternion.is_some();
        if moves {
            let allowed = if next_mode.is_moving() {
                next_driver == Some(self_id)
            } else {
                self.authority == self_id
            };
            if !allowed {
                return Err(WorldError::NotDriver {
                    entity: self.id.clone(),
                    client: self_id,
                });
            }
        }

        let mut changed = EntityProps::default();
        if let Some(mode) = props.mode {
            if mode != self.mode {
                self.mode = mode;
                changed.mode = Some(mode);
            }
        }
        if let Some(driver) = props.mode_client_id {
            if driver != self.mode_client_id {
                self.mode_client_id = driver;
                changed.mode_client_id = Some(driver);
            }
        }
        // receivers reset modeClientId whenever a mode arrives
        if changed.mode.is_some() {
            changed.mode_client_id = Some(self.mode_client_id);
        }
        if changed.mode.is_some() || changed.mode_client_id.is_some() {
            self.revive = None;
        }
        if let Some(uploading) = props.uploading {
            if uploading != self.uploading {
                self.uploading = uploading;
                changed.uploading = Some(uploading);
            }
        }
        // accepted writes are what everyone else will converge to
        if let Some(position) = props.position {
            self.local.position = position;
            self.network.position = position;
            changed.position = Some(position);
        }
        if let Some(quaternion) = props.quaternion {
            self.local.quaternion = quaternion;
            self.network.quaternion = quaternion;
            changed.quaternion = Some(quaternion);
        }

        if changed.mode.is_some() || changed.mode_client_id.is_some() {
            self.check_mode(ctx, false);
        }
        if moves {
            self.sync_root(ctx.env);
        }
        if sync && !changed.is_empty() {
            ctx.env
                .packet
                .push_entity_update(&self.id, |p| p.merge_props(changed));
        }
        Ok(())
    }

    /// Applies props received from the relay.
    pub fn apply_network_props(&mut self, ctx: &mut EntityCtx<'_, '_>, props: EntityProps) {
        let moved = props.position.is_some() || props.quaternion.is_some();
        if let Some(position) = props.position {
            self.network.position = position;
        }
        if let Some(quaternion) = props.quaternion {
            self.network.quaternion = quaternion;
        }

        let mut remoded = false;
        if let Some(mode) = props.mode {
            self.mode = mode;
            self.mode_client_id = props.mode_client_id.unwrap_or(None);
            remoded = true;
        } else if let Some(driver) = props.mode_client_id {
            self.mode_client_id = driver;
            remoded = true;
        }
        if remoded {
            self.revive = None;
            self.check_mode(ctx, false);
        }

        // Outside moving there is no smoothing; remote writes land directly.
        if moved && !self.mode.is_moving() && !self.is_authority(ctx.env.self_id) {
            self.local = self.network;
            self.sync_root(ctx.env);
        }

        if let Some(uploading) = props.uploading {
            if uploading.is_some() {
                warn!(entity = %self.id, "uploading can only be cleared over the network");
            }
            if uploading != self.uploading {
                self.uploading = uploading;
                self.load(ctx);
            }
        }
    }

    /// Writes state keys locally. Authority only.
    pub fn apply_local_state(
        &mut self,
        ctx: &mut EntityCtx<'_, '_>,
        state: StateMap,
        sync: bool,
    ) -> Result<(), WorldError> {
        let self_id = ctx.env.self_id.ok_or(WorldError::NotConnected)?;
        if self.authority != self_id {
            return Err(WorldError::NotDriver {
                entity: self.id.clone(),
                client: self_id,
            });
        }
        for (k, v) in &state {
            self.state.insert(k.clone(), v.clone());
        }
        if sync && !state.is_empty() {
            ctx.env
                .packet
                .push_entity_update(&self.id, |p| p.merge_state(state));
        }
        Ok(())
    }

    /// Merges remote state and notifies the script.
    pub fn apply_network_state(&mut self, ctx: &mut EntityCtx<'_, '_>, state: StateMap) {
        for (k, v) in &state {
            self.state.insert(k.clone(), v.clone());
        }
        self.state_changes = state;
        if self.mode == Mode::Active {
            if let Err(fault) = self.emit(ctx.env, "on_state", |h, sc| h.on_state(sc)) {
                self.kill(ctx, fault.to_string());
            }
        }
    }

    pub fn update(&mut self, ctx: &mut EntityCtx<'_, '_>, delta: f32) {
        match self.mode {
            Mode::Active => {
                if let Err(fault) = self.emit(ctx.env, "update", |h, sc| h.update(sc, delta)) {
                    self.kill(ctx, fault.to_string());
                }
            }
            Mode::Moving | Mode::Editing if !self.is_driver(ctx.env.self_id) => {
                let interp = ctx.env.interp;
                interp.step(&mut self.local, &self.network, delta);
                self.sync_root(ctx.env);
            }
            _ => {}
        }
    }

    pub fn fixed_update(&mut self, ctx: &mut EntityCtx<'_, '_>, delta: f32) {
        if self.mode != Mode::Active {
            return;
        }
        if let Err(fault) = self.emit(ctx.env, "fixed_update", |h, sc| h.fixed_update(sc, delta)) {
            self.kill(ctx, fault.to_string());
        }
    }

    pub fn late_update(&mut self, ctx: &mut EntityCtx<'_, '_>, delta: f32) {
        if self.mode != Mode::Active {
            return;
        }
        if let Err(fault) = self.emit(ctx.env, "late_update", |h, sc| h.late_update(sc, delta)) {
            self.kill(ctx, fault.to_string());
        }
    }

    fn with_script<R>(
        &mut self,
        env: &mut Env<'_>,
        f: impl FnOnce(&mut ScriptContext<'_>) -> R,
    ) -> R {
        let authority = self.is_authority(env.self_id);
        let mut sc = ScriptContext::new(
            &self.id,
            authority,
            &mut self.local,
            &mut self.state,
            &self.state_changes,
            &mut self.script_var_count,
            self.visual.root(),
            &mut *env.packet,
        );
        let out = f(&mut sc);
        let moved = sc.moved();
        if moved {
            self.network = self.local;
            self.sync_root(env);
        }
        out
    }

    fn emit(
        &mut self,
        env: &mut Env<'_>,
        hook: &'static str,
        f: impl FnOnce(&mut dyn ScriptHooks, &mut ScriptContext<'_>) -> Result<(), ScriptError>,
    ) -> Result<(), ScriptError> {
        let Some(mut hooks) = self.hooks.take() else {
            return Ok(());
        };
        let result = self.with_script(env, |sc| guard(hook, || f(hooks.as_mut(), sc)));
        self.hooks = Some(hooks);
        result
    }

    fn mount(&mut self, env: &mut Env<'_>) {
        let root = self.visual.root();
        env.renderer.mount(&self.id, root, &self.local);
        let mut colliders = Vec::new();
        root.traverse(&mut |node| {
            if node.collider {
                colliders.push(node);
            }
        });
        for node in colliders {
            let handle = env.physics.add_actor(&self.id, node, &self.local);
            self.actors.push(handle);
        }
        self.mounted = true;
    }

    fn unmount(&mut self, env: &mut Env<'_>) {
        if !self.mounted {
            return;
        }
        env.renderer.unmount(&self.id);
        for handle in self.actors.drain(..) {
            env.physics.remove_actor(handle);
        }
        self.mounted = false;
    }

    fn sync_root(&mut self, env: &mut Env<'_>) {
        if !self.mounted {
            return;
        }
        env.renderer.move_root(&self.id, &self.local);
        for handle in &self.actors {
            env.physics.set_actor_transform(*handle, &self.local);
        }
    }
}
