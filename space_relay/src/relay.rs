//! Relay implementation.
//!
//! The relay is not authoritative for anything. It:
//! - performs the `auth` handshake and hands out client ids
//! - keeps the latest copy of every client, schema and entity so that a
//!   late joiner gets a complete `init`
//! - forwards every change to every other authenticated client, never back to
//!   the sender
//!
//! Each connection gets a reader task feeding one inbound channel and a writer
//! task draining a per-peer outbound queue. All state lives on the relay task,
//! so messages from one sender are handled and forwarded in the order sent.

use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
};

use anyhow::Context;
use chrono::Utc;
use space_shared::{
    clients::{ClientData, ClientRegistry, Permissions, UserProfile},
    config::SpaceConfig,
    error::WorldError,
    net::{
        ClientId, EntityData, EntityId, EntityUpdate, InitData, NetMsg, ReliableConn,
        ReliableListener, SpaceMeta, PROTOCOL_VERSION,
    },
    packet::Packet,
    schema::SchemaStore,
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// What a reader task reports.
#[derive(Debug)]
enum Inbound {
    Message(NetMsg),
    Closed { reason: String },
}

struct Peer {
    addr: SocketAddr,
    tx: UnboundedSender<NetMsg>,
    authed: bool,
    reader: JoinHandle<()>,
}

/// Relay server.
pub struct Relay {
    pub cfg: SpaceConfig,
    listener: ReliableListener,
    clients: ClientRegistry,
    peers: HashMap<ClientId, Peer>,
    schemas: SchemaStore,
    instances: BTreeMap<EntityId, EntityData>,
    inbound_tx: UnboundedSender<(ClientId, Inbound)>,
    inbound_rx: UnboundedReceiver<(ClientId, Inbound)>,
    next_client: u32,
    console_rx: Option<mpsc::Receiver<String>>,
}

impl Relay {
    /// Binds the listener on `cfg.server_addr`.
    pub async fn bind(cfg: SpaceConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = ReliableListener::bind(addr).await?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Ok(Self {
            cfg,
            listener,
            clients: ClientRegistry::new(),
            peers: HashMap::new(),
            schemas: SchemaStore::new(),
            instances: BTreeMap::new(),
            inbound_tx,
            inbound_rx,
            next_client: 0,
            console_rx: None,
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn entity_count(&self) -> usize {
        self.instances.len()
    }

    pub fn entity(&self, id: &EntityId) -> Option<&EntityData> {
        self.instances.get(id)
    }

    /// Serves until a `quit` console command.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, space = %self.cfg.space_name, "Relay running");
        loop {
            if !self.step().await? {
                info!("Relay shutting down");
                return Ok(());
            }
        }
    }

    /// Handles one accept, inbound message or console line. Returns false on quit.
    pub async fn step(&mut self) -> anyhow::Result<bool> {
        tokio::select! {
            accepted = self.listener.accept() => match accepted {
                Ok((conn, addr)) => self.on_accept(conn, addr),
                Err(e) => warn!(error = %e, "accept failed"),
            },
            Some((id, inbound)) = self.inbound_rx.recv() => {
                self.on_inbound(id, inbound);
            }
            Some(line) = next_line(&mut self.console_rx) => {
                if matches!(line.trim(), "quit" | "exit") {
                    return Ok(false);
                }
                for out in self.exec_console(&line) {
                    println!("{out}");
                }
            }
        }
        Ok(true)
    }

    fn on_accept(&mut self, conn: ReliableConn, addr: SocketAddr) {
        self.next_client += 1;
        let id = ClientId(self.next_client);
        let (mut reader, mut writer) = conn.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<NetMsg>();

        let inbound = self.inbound_tx.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(msg) => {
                        if inbound.send((id, Inbound::Message(msg))).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = inbound.send((
                            id,
                            Inbound::Closed {
                                reason: format!("{e:#}"),
                            },
                        ));
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let mut batch = vec![msg];
                while let Ok(more) = rx.try_recv() {
                    batch.push(more);
                }
                if let Err(e) = writer.send_all(&batch).await {
                    debug!(client_id = %id, error = %e, "write failed");
                    break;
                }
            }
        });

        debug!(client_id = %id, %addr, "connection accepted");
        self.peers.insert(
            id,
            Peer {
                addr,
                tx,
                authed: false,
                reader: reader_task,
            },
        );
    }

    fn on_inbound(&mut self, id: ClientId, inbound: Inbound) {
        match inbound {
            Inbound::Message(msg) => self.on_message(id, msg),
            Inbound::Closed { reason } => self.drop_peer(id, &reason),
        }
    }

    fn is_authed(&self, id: ClientId) -> bool {
        self.peers.get(&id).is_some_and(|p| p.authed)
    }

    fn on_message(&mut self, from: ClientId, msg: NetMsg) {
        if let NetMsg::Auth { token, protocol } = msg {
            self.on_auth(from, token, protocol);
            return;
        }
        if !self.is_authed(from) {
            warn!(client_id = %from, event = msg.event(), "message before auth dropped");
            return;
        }
        let event = msg.event();
        let result = match msg {
            NetMsg::UpdateClient(patch) => {
                if patch.id != from {
                    warn!(client_id = %from, target = %patch.id, "client tried to update another client");
                    return;
                }
                self.clients
                    .update_client(patch.clone())
                    .map(|_| vec![NetMsg::UpdateClient(patch)])
            }
            NetMsg::UpsertSchema(schema) => {
                self.schemas.upsert_schema(schema.clone());
                Ok(vec![NetMsg::UpsertSchema(schema)])
            }
            NetMsg::AddEntity(data) => self.add_entity(data),
            NetMsg::UpdateEntity(update) => self.update_entity(update).map(|m| vec![m]),
            NetMsg::RemoveEntity { id } => self
                .instances
                .remove(&id)
                .map(|_| vec![NetMsg::RemoveEntity { id: id.clone() }])
                .ok_or(WorldError::EntityNotFound(id)),
            NetMsg::Packet(packet) => Ok(self.unpack(packet)),
            other => {
                warn!(client_id = %from, event = other.event(), "unexpected message from client");
                return;
            }
        };
        match result {
            Ok(out) => {
                for msg in out {
                    self.broadcast(&msg, Some(from));
                }
            }
            Err(err) => warn!(client_id = %from, event, %err, "message not applied"),
        }
    }

    fn add_entity(&mut self, data: EntityData) -> Result<Vec<NetMsg>, WorldError> {
        if self.instances.contains_key(&data.id) {
            return Err(WorldError::EntityExists(data.id));
        }
        self.instances.insert(data.id.clone(), data.clone());
        Ok(vec![NetMsg::AddEntity(data)])
    }

    fn update_entity(&mut self, update: EntityUpdate) -> Result<NetMsg, WorldError> {
        let entity = self
            .instances
            .get_mut(&update.id)
            .ok_or_else(|| WorldError::EntityNotFound(update.id.clone()))?;
        entity.apply_patch(&update.to_patch());
        Ok(NetMsg::UpdateEntity(update))
    }

    // A packet fans out as individual messages, schemas first.
    fn unpack(&mut self, packet: Packet) -> Vec<NetMsg> {
        let mut out = Vec::with_capacity(packet.schemas.len() + packet.entities.len());
        for schema in packet.schemas.into_values() {
            self.schemas.upsert_schema(schema.clone());
            out.push(NetMsg::UpsertSchema(schema));
        }
        for (id, patch) in packet.entities {
            match self.update_entity(EntityUpdate::from_patch(id, patch)) {
                Ok(msg) => out.push(msg),
                Err(err) => warn!(%err, "dropping packet entry"),
            }
        }
        out
    }

    fn on_auth(&mut self, id: ClientId, token: String, protocol: u32) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if peer.authed {
            warn!(client_id = %id, "duplicate auth ignored");
            return;
        }
        if protocol != PROTOCOL_VERSION {
            warn!(client_id = %id, protocol, expected = PROTOCOL_VERSION, "protocol mismatch");
            let _ = peer.tx.send(NetMsg::Disconnect {
                reason: format!("protocol mismatch: expected {PROTOCOL_VERSION}, got {protocol}"),
            });
            self.drop_peer(id, "protocol mismatch");
            return;
        }
        peer.authed = true;
        let addr = peer.addr;

        let client = ClientData {
            id,
            user: UserProfile {
                id: user_id_for(&token, id),
                name: None,
                address: None,
            },
            permissions: Permissions::BUILD,
            joined_at: Utc::now(),
        };
        self.clients.add_client(client.clone());

        let init = InitData {
            meta: SpaceMeta {
                name: self.cfg.space_name.clone(),
            },
            permissions: client.permissions,
            clients: self.clients.iter().cloned().collect(),
            schemas: self.schemas.iter().cloned().collect(),
            instances: self.instances.values().cloned().collect(),
            client_id: id,
        };
        self.send_to(id, NetMsg::Init(init));
        self.broadcast(&NetMsg::AddClient(client), Some(id));
        info!(client_id = %id, %addr, clients = self.clients.len(), "Client joined");
    }

    fn drop_peer(&mut self, id: ClientId, reason: &str) {
        let Some(peer) = self.peers.remove(&id) else {
            return;
        };
        peer.reader.abort();
        if peer.authed {
            let _ = self.clients.remove_client(id);
            self.broadcast(&NetMsg::RemoveClient { id }, None);
            info!(client_id = %id, %reason, "Client left");
        } else {
            debug!(client_id = %id, %reason, "connection closed before auth");
        }
    }

    fn send_to(&self, id: ClientId, msg: NetMsg) {
        if let Some(peer) = self.peers.get(&id) {
            let _ = peer.tx.send(msg);
        }
    }

    /// Sends to every authenticated client except `skip`.
    fn broadcast(&self, msg: &NetMsg, skip: Option<ClientId>) {
        for (id, peer) in &self.peers {
            if !peer.authed || Some(*id) == skip {
                continue;
            }
            let _ = peer.tx.send(msg.clone());
        }
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&cmd, args)) = tokens.split_first() else {
            return Vec::new();
        };
        match cmd {
            "status" => vec![
                format!("Space: {}", self.cfg.space_name),
                format!("Connections: {}", self.peers.len()),
                format!("Clients: {}", self.clients.len()),
                format!("Schemas: {}", self.schemas.len()),
                format!("Entities: {}", self.instances.len()),
            ],
            "clients" => self
                .clients
                .iter()
                .map(|c| {
                    format!(
                        "{} user={} name={} joined={}",
                        c.id,
                        c.user.id,
                        c.user.name.as_deref().unwrap_or("-"),
                        c.joined_at.format("%H:%M:%S")
                    )
                })
                .collect(),
            "entities" => self
                .instances
                .values()
                .map(|e| {
                    format!(
                        "{} schema={} authority={} mode={}",
                        e.id, e.schema_id, e.authority, e.mode
                    )
                })
                .collect(),
            "kick" => {
                let Some(id) = args.first().and_then(|a| a.parse::<u32>().ok()) else {
                    return vec!["Usage: kick <client id>".to_string()];
                };
                let id = ClientId(id);
                if !self.peers.contains_key(&id) {
                    return vec![format!("No client {id}")];
                }
                self.send_to(
                    id,
                    NetMsg::Disconnect {
                        reason: "kicked".to_string(),
                    },
                );
                self.drop_peer(id, "kicked");
                vec![format!("Kicked {id}")]
            }
            other => vec![format!("Unknown command: {other}")],
        }
    }
}

async fn next_line(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// Guests share a token, so they get a per-connection user id.
fn user_id_for(token: &str, id: ClientId) -> String {
    if token.is_empty() || token == "guest" {
        format!("guest-{id}")
    } else {
        token.to_string()
    }
}

/// Binds a relay on an ephemeral localhost port.
pub async fn bind_ephemeral(mut cfg: SpaceConfig) -> anyhow::Result<Relay> {
    cfg.server_addr = "127.0.0.1:0".to_string();
    Relay::bind(cfg).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use space_shared::{
        math::Vec3,
        net::{EntityProps, Mode, StateMap},
        packet::EntityPatch,
        schema::Schema,
    };

    use super::*;

    async fn join(addr: SocketAddr, token: &str) -> (ReliableConn, InitData) {
        let mut conn = ReliableConn::connect(addr).await.unwrap();
        conn.send(&NetMsg::Auth {
            token: token.into(),
            protocol: PROTOCOL_VERSION,
        })
        .await
        .unwrap();
        let init = match recv(&mut conn).await {
            NetMsg::Init(init) => init,
            other => panic!("expected init, got {other:?}"),
        };
        (conn, init)
    }

    async fn recv(conn: &mut ReliableConn) -> NetMsg {
        tokio::time::timeout(Duration::from_secs(5), conn.recv())
            .await
            .expect("timed out")
            .unwrap()
    }

    fn crate_data(id: &str, authority: ClientId) -> EntityData {
        EntityData {
            id: EntityId::new(id),
            schema_id: "crate".into(),
            creator: "guest-1".into(),
            authority,
            uploading: None,
            mode: Mode::Active,
            mode_client_id: None,
            position: Vec3::ZERO,
            quaternion: Default::default(),
            state: StateMap::new(),
        }
    }

    async fn start() -> SocketAddr {
        let relay = bind_ephemeral(SpaceConfig::default()).await.unwrap();
        let addr = relay.local_addr().unwrap();
        tokio::spawn(relay.run());
        addr
    }

    #[tokio::test]
    async fn forwards_to_others_and_caches_for_late_joiners() {
        let addr = start().await;
        let (mut a, init_a) = join(addr, "alice").await;
        assert_eq!(init_a.client_id, ClientId(1));
        assert_eq!(init_a.clients.len(), 1);
        assert_eq!(init_a.meta.name, "lobby");

        let (mut b, init_b) = join(addr, "guest").await;
        assert_eq!(init_b.clients.len(), 2);
        match recv(&mut a).await {
            NetMsg::AddClient(c) => assert_eq!(c.user.id, "guest-2"),
            other => panic!("expected add-client, got {other:?}"),
        }

        a.send(&NetMsg::AddEntity(crate_data("1.1", ClientId(1))))
            .await
            .unwrap();
        let mut patch = EntityPatch::default();
        patch.merge_props(EntityProps {
            position: Some(Vec3::new(3.0, 0.0, 0.0)),
            ..EntityProps::default()
        });
        let mut packet = Packet::default();
        packet
            .schemas
            .insert("crate".into(), Schema::new("crate", "crate.glb"));
        packet.entities.insert(EntityId::new("1.1"), patch);
        a.send(&NetMsg::Packet(packet)).await.unwrap();

        assert_eq!(recv(&mut b).await.event(), "add-entity");
        assert_eq!(recv(&mut b).await.event(), "upsert-schema");
        match recv(&mut b).await {
            NetMsg::UpdateEntity(u) => {
                assert_eq!(u.props.unwrap().position, Some(Vec3::new(3.0, 0.0, 0.0)))
            }
            other => panic!("expected update-entity, got {other:?}"),
        }

        // late joiner sees the merged record and the schema
        let (_c, init_c) = join(addr, "carol").await;
        assert_eq!(init_c.schemas.len(), 1);
        assert_eq!(init_c.instances.len(), 1);
        assert_eq!(init_c.instances[0].position, Vec3::new(3.0, 0.0, 0.0));

        // the sender never hears its own changes back
        match recv(&mut a).await {
            NetMsg::AddClient(c) => assert_eq!(c.id, ClientId(3)),
            other => panic!("expected add-client for carol, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn protocol_mismatch_is_rejected() {
        let addr = start().await;
        let mut conn = ReliableConn::connect(addr).await.unwrap();
        conn.send(&NetMsg::Auth {
            token: "guest".into(),
            protocol: PROTOCOL_VERSION + 1,
        })
        .await
        .unwrap();
        match recv(&mut conn).await {
            NetMsg::Disconnect { reason } => assert!(reason.contains("protocol")),
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn leaving_is_broadcast() {
        let addr = start().await;
        let (mut a, _) = join(addr, "alice").await;
        let (b, _) = join(addr, "bob").await;
        assert_eq!(recv(&mut a).await.event(), "add-client");
        drop(b);
        match recv(&mut a).await {
            NetMsg::RemoveClient { id } => assert_eq!(id, ClientId(2)),
            other => panic!("expected remove-client, got {other:?}"),
        }
    }

    #[test]
    fn guests_get_distinct_user_ids() {
        assert_eq!(user_id_for("guest", ClientId(4)), "guest-4");
        assert_eq!(user_id_for("", ClientId(5)), "guest-5");
        assert_eq!(user_id_for("alice", ClientId(6)), "alice");
    }
}
