//! Client world.
//!
//! A [`Space`] owns the transport, the registries and the outbound packet and
//! advances them with one call per frame, [`Space::tick`]:
//!
//! 1. inbound transport events
//! 2. finished loads
//! 3. local input on the bound entity
//! 4. `update` on active entities
//! 5. fixed steps (physics, then `fixed_update`), backlog clamped
//! 6. `late_update`
//! 7. load dispatch, packet send (rate limited), transport flush
//!
//! Everything runs on the caller's task; only asset loads run elsewhere.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use rand::Rng;
use space_shared::{
    clients::{ClientData, ClientPatch, ClientRegistry, Permissions, UserProfile},
    config::SpaceConfig,
    error::WorldError,
    event::{EventQueue, SpaceEvent},
    ids::IdGenerator,
    math::{Transform, Vec3},
    net::{
        ClientId, EntityData, EntityId, EntityProps, EntityUpdate, InitData, Mode, NetMsg,
        SpaceMeta, StateMap,
    },
    packet::{Packet, PacketBuilder},
    physics::{NullPhysics, PhysicsBackend},
    render::{NullRenderer, Renderer},
    schema::{Schema, SchemaStore, AVATAR_SCHEMA_ID},
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::{
    entity::{Entity, Env},
    input::{InputBinding, InputState},
    interp::Interpolation,
    loader::{fetch, LoadCompletion, LoadError, LoadRequest, Loader},
    registry::EntityRegistry,
    transport::{Transport, TransportEvent},
};

/// External systems a space drives.
pub struct Collaborators {
    pub renderer: Box<dyn Renderer>,
    pub physics: Box<dyn PhysicsBackend>,
    pub loader: Arc<dyn Loader>,
}

impl Collaborators {
    /// No rendering, no physics.
    pub fn headless(loader: Arc<dyn Loader>) -> Self {
        Self {
            renderer: Box::new(NullRenderer),
            physics: Box::new(NullPhysics::default()),
            loader,
        }
    }
}

/// Name and address this client presents to others.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalIdentity {
    pub name: Option<String>,
    pub address: Option<String>,
}

pub struct Space {
    cfg: SpaceConfig,
    transport: Transport,
    clients: ClientRegistry,
    schemas: SchemaStore,
    entities: EntityRegistry,
    packet: PacketBuilder,
    ids: Option<IdGenerator>,
    meta: Option<SpaceMeta>,
    permissions: Permissions,

    renderer: Box<dyn Renderer>,
    physics: Box<dyn PhysicsBackend>,
    loader: Arc<dyn Loader>,
    input: InputBinding,
    pending_input: InputState,
    interp: Interpolation,

    loads: Vec<LoadRequest>,
    load_tx: UnboundedSender<LoadCompletion>,
    load_rx: UnboundedReceiver<LoadCompletion>,
    loads_in_flight: usize,

    events: EventQueue<SpaceEvent>,
    identity: LocalIdentity,
    pushed_identity: Option<LocalIdentity>,
    active: bool,
    fixed_time: f32,
    frame: u64,
}

impl Space {
    pub fn new(cfg: SpaceConfig, transport: Transport, collab: Collaborators) -> Self {
        let (load_tx, load_rx) = mpsc::unbounded_channel();
        let identity = LocalIdentity {
            name: Some(cfg.player_name.clone()),
            address: None,
        };
        Self {
            packet: PacketBuilder::new(cfg.send_period()),
            interp: Interpolation::from_config(&cfg),
            cfg,
            transport,
            clients: ClientRegistry::new(),
            schemas: SchemaStore::new(),
            entities: EntityRegistry::new(),
            ids: None,
            meta: None,
            permissions: Permissions::empty(),
            renderer: collab.renderer,
            physics: collab.physics,
            loader: collab.loader,
            input: InputBinding::default(),
            pending_input: InputState::default(),
            loads: Vec::new(),
            load_tx,
            load_rx,
            loads_in_flight: 0,
            events: EventQueue::new(),
            identity,
            pushed_identity: None,
            active: false,
            fixed_time: 0.0,
            frame: 0,
        }
    }

    /// Connects to `cfg.server_addr`. `auth` goes out on the first tick.
    pub async fn connect(cfg: SpaceConfig, collab: Collaborators) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %addr, "connecting to relay");
        let transport = Transport::connect(addr)
            .await
            .with_context(|| format!("connect to {addr}"))?;
        Ok(Self::new(cfg, transport, collab))
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.cfg
    }

    /// True between `init` and disconnect.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn self_id(&self) -> Option<ClientId> {
        self.clients.self_id()
    }

    pub fn meta(&self) -> Option<&SpaceMeta> {
        self.meta.as_ref()
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn schemas(&self) -> &SchemaStore {
        &self.schemas
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn entity(&self, id: &EntityId) -> Result<&Entity, WorldError> {
        self.entities.get_instance(id)
    }

    pub fn pending_packet(&self) -> &Packet {
        self.packet.pending()
    }

    pub fn loads_in_flight(&self) -> usize {
        self.loads_in_flight + self.loads.len()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn drain_events(&mut self) -> Vec<SpaceEvent> {
        self.events.drain()
    }

    fn split(&mut self) -> (Env<'_>, &mut EntityRegistry, &SchemaStore) {
        let env = Env {
            self_id: self.clients.self_id(),
            renderer: self.renderer.as_mut(),
            physics: self.physics.as_mut(),
            input: &mut self.input,
            packet: &mut self.packet,
            loader: self.loader.as_ref(),
            loads: &mut self.loads,
            events: &mut self.events,
            interp: self.interp,
        };
        (env, &mut self.entities, &self.schemas)
    }

    /// Advances the space by one frame of `delta` seconds.
    pub fn tick(&mut self, delta: f32) {
        self.frame += 1;
        self.process_inbound();
        self.process_loads();
        self.apply_input();

        {
            let (mut env, entities, _) = self.split();
            entities.update(&mut env, delta);
        }
        self.fixed_update(delta);
        {
            let (mut env, entities, _) = self.split();
            entities.late_update(&mut env, delta);
        }

        self.dispatch_loads();
        if let Some(packet) = self.packet.advance(delta) {
            debug!(
                entities = packet.entities.len(),
                schemas = packet.schemas.len(),
                "sending packet"
            );
            self.transport.send(NetMsg::Packet(packet));
        }
        self.transport.flush();
    }

    fn fixed_update(&mut self, delta: f32) {
        let step = self.cfg.fixed_timestep();
        self.fixed_time = (self.fixed_time + delta).min(self.cfg.fixed_time_max());
        let mut steps = 0u32;
        while self.fixed_time >= step {
            self.fixed_time -= step;
            steps += 1;
        }
        let (mut env, entities, _) = self.split();
        for _ in 0..steps {
            env.physics.step(step);
            entities.fixed_update(&mut env, step);
        }
    }

    fn process_inbound(&mut self) {
        while let Some(event) = self.transport.poll() {
            self.handle_transport_event(event);
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connect => {
                debug!("sending auth");
                self.transport.send(NetMsg::Auth {
                    token: self.cfg.auth_token.clone(),
                    protocol: space_shared::net::PROTOCOL_VERSION,
                });
                self.events.push(SpaceEvent::Connected);
            }
            TransportEvent::Message(msg) => self.handle_message(msg),
            TransportEvent::Disconnect { reason } => self.on_disconnect(reason),
        }
    }

    /// Applies one relay message. Unknown references are logged and dropped.
    pub fn handle_message(&mut self, msg: NetMsg) {
        let event = msg.event();
        let result = match msg {
            NetMsg::Init(data) => {
                self.on_init(data);
                Ok(())
            }
            NetMsg::AddClient(client) => {
                let id = client.id;
                self.clients.add_client(client);
                self.events.push(SpaceEvent::ClientJoined { client_id: id });
                Ok(())
            }
            NetMsg::UpdateClient(patch) => self.clients.update_client(patch).map(|_| ()),
            NetMsg::RemoveClient { id } => self.clients.remove_client(id).map(|_| {
                self.events.push(SpaceEvent::ClientLeft { client_id: id });
            }),
            NetMsg::UpsertSchema(schema) => {
                self.schemas.upsert_schema(schema);
                Ok(())
            }
            NetMsg::AddEntity(data) => {
                let (mut env, entities, schemas) = self.split();
                entities.add_instance(data, schemas, &mut env).map(|_| ())
            }
            NetMsg::UpdateEntity(update) => {
                let (mut env, entities, _) = self.split();
                entities.apply_update(update, &mut env)
            }
            NetMsg::RemoveEntity { id } => {
                let (mut env, entities, _) = self.split();
                entities.remove_instance(&id, &mut env).map(|_| ())
            }
            NetMsg::Packet(packet) => {
                self.apply_packet(packet);
                Ok(())
            }
            NetMsg::Disconnect { reason } => {
                // surfaces as a transport disconnect on the next poll
                self.transport.disconnect(reason);
                Ok(())
            }
            NetMsg::Auth { .. } => {
                warn!("unexpected auth from relay");
                Ok(())
            }
        };
        if let Err(err) = result {
            if err.is_not_found() {
                warn!(event, %err, "ignoring message for unknown target");
            } else {
                warn!(event, %err, "failed to apply message");
            }
        }
    }

    // Relays unpack packets, but a peer-to-peer setup may forward them whole.
    fn apply_packet(&mut self, packet: Packet) {
        for schema in packet.schemas.into_values() {
            self.schemas.upsert_schema(schema);
        }
        for (id, patch) in packet.entities {
            let (mut env, entities, _) = self.split();
            if let Err(err) = entities.apply_update(EntityUpdate::from_patch(id, patch), &mut env) {
                warn!(%err, "ignoring packet entry");
            }
        }
    }

    fn on_init(&mut self, data: InitData) {
        let InitData {
            meta,
            permissions,
            clients,
            schemas,
            instances,
            client_id,
        } = data;

        {
            let (mut env, entities, _) = self.split();
            entities.clear(&mut env);
        }
        self.clients.clear();
        for client in clients {
            self.clients.add_client(client);
        }
        if let Err(err) = self.clients.set_self(client_id) {
            warn!(%err, "init did not list this client");
        }
        self.ids = Some(IdGenerator::new(client_id));
        self.meta = Some(meta);
        self.permissions = permissions;
        for schema in schemas {
            self.schemas.upsert_schema(schema);
        }
        for instance in instances {
            let (mut env, entities, schemas) = self.split();
            if let Err(err) = entities.add_instance(instance, schemas, &mut env) {
                warn!(%err, "skipping init instance");
            }
        }

        self.active = true;
        info!(client_id = %client_id, entities = self.entities.len(), "space active");
        self.events.push(SpaceEvent::Active { client_id });
        self.push_identity();

        if self.cfg.spawn_avatar {
            if let Err(err) = self.spawn_avatar() {
                warn!(%err, "failed to spawn avatar");
            }
        }
    }

    fn on_disconnect(&mut self, reason: String) {
        info!(%reason, "disconnected");
        self.active = false;
        self.events.push(SpaceEvent::Disconnected { reason });
    }

    /// Closes the connection. No reconnect is attempted.
    pub fn disconnect(&mut self) {
        self.transport.disconnect("closed locally");
    }

    /// Changes the name/address shown to others. Sends only when it differs
    /// from what was last sent.
    pub fn set_identity(&mut self, identity: LocalIdentity) -> bool {
        if self.identity == identity {
            return false;
        }
        self.identity = identity;
        self.push_identity()
    }

    fn push_identity(&mut self) -> bool {
        if !self.active || self.pushed_identity.as_ref() == Some(&self.identity) {
            return false;
        }
        let Some(me) = self.clients.get_self() else {
            return false;
        };
        let user = UserProfile {
            id: me.user.id.clone(),
            name: self.identity.name.clone(),
            address: self.identity.address.clone(),
        };
        let patch = ClientPatch {
            id: me.id,
            user: Some(user),
            permissions: None,
        };
        if let Err(err) = self.clients.update_client(patch.clone()) {
            warn!(%err, "failed to update own client");
            return false;
        }
        self.transport.send(NetMsg::UpdateClient(patch));
        self.pushed_identity = Some(self.identity.clone());
        true
    }

    /// Creates a locally owned entity and announces it.
    pub fn spawn_local(
        &mut self,
        schema_id: &str,
        transform: Transform,
        state: StateMap,
    ) -> Result<EntityId, WorldError> {
        let self_id = self.clients.self_id().ok_or(WorldError::NotConnected)?;
        let creator = self
            .clients
            .get_self()
            .map(|c| c.user.id.clone())
            .ok_or(WorldError::ClientNotFound(self_id))?;
        let id = self
            .ids
            .as_mut()
            .ok_or(WorldError::NotConnected)?
            .next_id();
        let data = EntityData {
            id: id.clone(),
            schema_id: schema_id.to_string(),
            creator,
            authority: self_id,
            uploading: None,
            mode: Mode::Active,
            mode_client_id: None,
            position: transform.position,
            quaternion: transform.quaternion,
            state,
        };
        {
            let (mut env, entities, schemas) = self.split();
            entities.add_instance(data.clone(), schemas, &mut env)?;
        }
        self.transport.send(NetMsg::AddEntity(data));
        Ok(id)
    }

    /// Spawns this client's avatar at a random spot near the origin.
    pub fn spawn_avatar(&mut self) -> Result<EntityId, WorldError> {
        let x: f32 = rand::thread_rng().gen_range(-1.0..=1.0);
        let x = (x * 100.0).round() / 100.0;
        self.spawn_local(
            AVATAR_SCHEMA_ID,
            Transform::from_position(Vec3::new(x, 1.0, 0.0)),
            StateMap::new(),
        )
    }

    /// Removes an entity locally and announces it.
    pub fn remove_local(&mut self, id: &EntityId) -> Result<(), WorldError> {
        {
            let (mut env, entities, _) = self.split();
            entities.remove_instance(id, &mut env)?;
        }
        self.transport.send(NetMsg::RemoveEntity { id: id.clone() });
        Ok(())
    }

    /// Stores a schema and ships it with the next packet.
    ///
    /// Existing instances keep what they loaded until [`Space::reload`].
    pub fn upsert_schema_local(&mut self, schema: Schema) {
        self.schemas.upsert_schema(schema.clone());
        self.packet.push_schema(schema);
    }

    /// Reloads an entity against the current schema.
    pub fn reload(&mut self, id: &EntityId) -> Result<(), WorldError> {
        let (mut env, entities, schemas) = self.split();
        entities.reload(id, schemas, &mut env)
    }

    /// Applies local props to an entity and replicates them.
    pub fn set_props(&mut self, id: &EntityId, props: EntityProps) -> Result<(), WorldError> {
        let (mut env, entities, _) = self.split();
        entities.with_instance(id, &mut env, |e, ctx| e.apply_local_props(ctx, props, true))?
    }

    /// Writes state keys and replicates them.
    pub fn set_state(&mut self, id: &EntityId, state: StateMap) -> Result<(), WorldError> {
        let (mut env, entities, _) = self.split();
        entities.with_instance(id, &mut env, |e, ctx| e.apply_local_state(ctx, state, true))?
    }

    /// Takes control of an entity's transform.
    pub fn grab(&mut self, id: &EntityId, mode: Mode) -> Result<(), WorldError> {
        let self_id = self.clients.self_id().ok_or(WorldError::NotConnected)?;
        self.set_props(
            id,
            EntityProps {
                mode: Some(mode),
                mode_client_id: Some(Some(self_id)),
                ..EntityProps::default()
            },
        )
    }

    /// Hands an entity back to its script.
    pub fn release(&mut self, id: &EntityId) -> Result<(), WorldError> {
        self.set_props(
            id,
            EntityProps {
                mode: Some(Mode::Active),
                mode_client_id: Some(None),
                ..EntityProps::default()
            },
        )
    }

    /// Input for the next tick. Applied to whichever entity is bound.
    pub fn set_input(&mut self, input: InputState) {
        self.pending_input = input;
    }

    pub fn input(&self) -> &InputBinding {
        &self.input
    }

    fn apply_input(&mut self) {
        let input = std::mem::take(&mut self.pending_input);
        if input.is_empty() {
            return;
        }
        let Some((id, _)) = self.input.bound() else {
            return;
        };
        let id = id.clone();
        if let Err(err) = self.set_props(&id, input.to_props()) {
            debug!(entity = %id, %err, "input rejected");
        }
    }

    fn process_loads(&mut self) {
        while let Ok(completion) = self.load_rx.try_recv() {
            self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
            self.apply_completion(completion);
        }
    }

    fn apply_completion(&mut self, completion: LoadCompletion) {
        let (mut env, entities, _) = self.split();
        match entities.complete_load(completion, &mut env) {
            Ok(true) => {}
            Ok(false) => debug!("stale load dropped"),
            Err(err) => debug!(%err, "load finished for removed entity"),
        }
    }

    fn dispatch_loads(&mut self) {
        if self.loads.is_empty() {
            return;
        }
        let requests = std::mem::take(&mut self.loads);
        let runtime = tokio::runtime::Handle::try_current();
        for req in requests {
            self.loads_in_flight += 1;
            let tx = self.load_tx.clone();
            match &runtime {
                Ok(handle) => {
                    let loader = self.loader.clone();
                    handle.spawn(async move {
                        let result = fetch(loader.as_ref(), &req).await;
                        let _ = tx.send(LoadCompletion {
                            entity: req.entity,
                            generation: req.generation,
                            result,
                        });
                    });
                }
                Err(_) => {
                    let _ = tx.send(LoadCompletion {
                        entity: req.entity,
                        generation: req.generation,
                        result: Err(LoadError::NoRuntime),
                    });
                }
            }
        }
    }

    /// Waits for every outstanding load and applies the results.
    pub async fn settle_loads(&mut self) {
        self.dispatch_loads();
        while self.loads_in_flight > 0 {
            let Some(completion) = self.load_rx.recv().await else {
                break;
            };
            self.loads_in_flight -= 1;
            self.apply_completion(completion);
            self.dispatch_loads();
        }
    }

    /// Joined clients other than this one.
    pub fn peers(&self) -> impl Iterator<Item = &ClientData> {
        let me = self.clients.self_id();
        self.clients.iter().filter(move |c| Some(c.id) != me)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::{
        loader::MemoryLoader,
        testing::{blueprint, entity_data, RecordingRenderer},
        transport::LoopbackPeer,
    };

    const ME: ClientId = ClientId(1);
    const OTHER: ClientId = ClientId(2);

    fn client(id: ClientId) -> ClientData {
        ClientData {
            id,
            user: UserProfile {
                id: format!("user-{id}"),
                ..UserProfile::default()
            },
            permissions: Permissions::BUILD,
            joined_at: Utc::now(),
        }
    }

    fn init(instances: Vec<EntityData>, schemas: Vec<Schema>) -> NetMsg {
        NetMsg::Init(InitData {
            meta: SpaceMeta {
                name: "lobby".into(),
            },
            permissions: Permissions::BUILD,
            clients: vec![client(ME), client(OTHER)],
            schemas,
            instances,
            client_id: ME,
        })
    }

    fn space(loader: MemoryLoader) -> (Space, LoopbackPeer, RecordingRenderer) {
        let (transport, peer) = Transport::loopback();
        let renderer = RecordingRenderer::default();
        let collab = Collaborators {
            renderer: Box::new(renderer.clone()),
            physics: Box::new(NullPhysics::default()),
            loader: Arc::new(loader),
        };
        (Space::new(SpaceConfig::default(), transport, collab), peer, renderer)
    }

    #[tokio::test]
    async fn connect_sends_auth_then_init_activates() {
        let (mut space, mut peer, _) = space(MemoryLoader::new());
        space.tick(0.0);
        let sent = peer.sent();
        assert!(matches!(sent.as_slice(), [NetMsg::Auth { .. }]));

        peer.deliver(init(vec![], vec![]));
        space.tick(0.0);
        assert!(space.is_active());
        assert_eq!(space.self_id(), Some(ME));
        assert_eq!(space.peers().count(), 1);

        // identity goes out once
        let sent = peer.sent();
        assert_eq!(sent.len(), 1);
        let NetMsg::UpdateClient(patch) = &sent[0] else {
            panic!("expected update-client, got {:?}", sent[0]);
        };
        assert_eq!(patch.user.as_ref().unwrap().name.as_deref(), Some("Player"));
        assert!(!space.set_identity(LocalIdentity {
            name: Some("Player".into()),
            address: None,
        }));
        space.tick(0.0);
        assert!(peer.sent().is_empty());

        let events = space.drain_events();
        assert!(events.contains(&SpaceEvent::Connected));
        assert!(events.contains(&SpaceEvent::Active { client_id: ME }));
    }

    #[tokio::test]
    async fn unknown_schema_shows_placeholder_until_reload() {
        let loader = MemoryLoader::new().with_model("lamp.glb", blueprint("lamp"));
        let (mut space, mut peer, renderer) = space(loader);
        peer.deliver(init(vec![entity_data("2.1", "lamp", OTHER)], vec![]));
        space.tick(0.0);
        space.settle_loads().await;

        let id = EntityId::new("2.1");
        assert!(space.entity(&id).unwrap().visual().is_loading());
        assert_eq!(renderer.last_shown("2.1").as_deref(), Some("loading"));

        peer.deliver(NetMsg::UpsertSchema(Schema::new("lamp", "lamp.glb")));
        space.tick(0.0);
        assert!(space.entity(&id).unwrap().visual().is_loading());

        space.reload(&id).unwrap();
        space.settle_loads().await;
        assert!(space.entity(&id).unwrap().visual().is_built());
        assert_eq!(renderer.last_shown("2.1").as_deref(), Some("lamp"));
    }

    #[tokio::test]
    async fn local_changes_batch_into_one_packet() {
        let loader = MemoryLoader::new().with_model("box.glb", blueprint("box"));
        let (mut space, mut peer, _) = space(loader);
        peer.deliver(init(vec![], vec![Schema::new("box", "box.glb")]));
        space.tick(0.0);
        peer.sent();

        let id = space
            .spawn_local("box", Transform::default(), StateMap::new())
            .unwrap();
        assert_eq!(id, EntityId::new("1.1"));
        space.settle_loads().await;

        for i in 1..=3 {
            space
                .set_props(
                    &id,
                    EntityProps {
                        position: Some(Vec3::new(i as f32, 0.0, 0.0)),
                        ..EntityProps::default()
                    },
                )
                .unwrap();
            let mut state = StateMap::new();
            state.insert("count".into(), json!(i));
            space.set_state(&id, state).unwrap();
        }

        // add-entity goes out immediately, the packet waits for the send period
        space.tick(0.05);
        let sent = peer.sent();
        assert!(matches!(sent.as_slice(), [NetMsg::AddEntity(_)]));

        space.tick(0.2);
        let sent = peer.sent();
        let [NetMsg::Packet(packet)] = sent.as_slice() else {
            panic!("expected one packet, got {sent:?}");
        };
        let patch = &packet.entities[&id];
        assert_eq!(
            patch.props.as_ref().unwrap().position,
            Some(Vec3::new(3.0, 0.0, 0.0))
        );
        assert_eq!(patch.state.as_ref().unwrap()["count"], json!(3));

        // nothing changed: nothing sent
        space.tick(0.5);
        assert!(peer.sent().is_empty());
    }

    #[tokio::test]
    async fn input_drives_the_grabbed_entity() {
        let loader = MemoryLoader::new().with_model("box.glb", blueprint("box"));
        let (mut space, mut peer, _) = space(loader);
        peer.deliver(init(
            vec![entity_data("2.1", "box", OTHER)],
            vec![Schema::new("box", "box.glb")],
        ));
        space.tick(0.0);
        space.settle_loads().await;

        let id = EntityId::new("2.1");
        space.grab(&id, Mode::Moving).unwrap();
        space.set_input(InputState {
            target: Some(Vec3::new(0.0, 0.0, 5.0)),
            rotation: None,
        });
        space.tick(0.01);
        assert_eq!(
            space.entity(&id).unwrap().local_transform().position,
            Vec3::new(0.0, 0.0, 5.0)
        );
        space.release(&id).unwrap();
        assert!(space.input().bound().is_none());

        let packet = space.pending_packet();
        let props = packet.entities[&id].props.as_ref().unwrap();
        assert_eq!(props.mode, Some(Mode::Active));
        assert_eq!(props.mode_client_id, Some(None));
        assert_eq!(props.position, Some(Vec3::new(0.0, 0.0, 5.0)));
    }

    #[tokio::test]
    async fn messages_for_unknown_targets_are_ignored() {
        let (mut space, peer, _) = space(MemoryLoader::new());
        peer.deliver(init(vec![], vec![]));
        peer.deliver(NetMsg::UpdateEntity(EntityUpdate {
            id: EntityId::new("9.9"),
            props: None,
            state: None,
        }));
        peer.deliver(NetMsg::RemoveClient { id: ClientId(77) });
        peer.deliver(NetMsg::RemoveEntity {
            id: EntityId::new("9.9"),
        });
        space.tick(0.0);
        assert!(space.is_active());
        assert!(space.entities().is_empty());
    }

    #[tokio::test]
    async fn disconnect_deactivates() {
        let (mut space, peer, _) = space(MemoryLoader::new());
        peer.deliver(init(vec![], vec![]));
        space.tick(0.0);
        peer.close("relay went away");
        space.tick(0.0);
        assert!(!space.is_active());
        assert!(space
            .drain_events()
            .iter()
            .any(|e| matches!(e, SpaceEvent::Disconnected { .. })));
    }

    #[tokio::test]
    async fn relay_disconnect_reports_its_reason() {
        let (mut space, peer, _) = space(MemoryLoader::new());
        peer.deliver(NetMsg::Disconnect {
            reason: "protocol mismatch".into(),
        });
        space.tick(0.0);
        space.tick(0.0);
        let reasons: Vec<_> = space
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SpaceEvent::Disconnected { reason } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(reasons, vec!["protocol mismatch".to_string()]);
    }
}
