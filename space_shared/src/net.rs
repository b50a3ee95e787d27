//! Networking primitives.
//!
//! Goals:
//! - Provide one reliable, ordered (TCP) channel per client.
//! - Provide the event-tagged message types exchanged between clients and the relay.
//! - Keep serialization explicit and versionable.
//!
//! Frames are a big-endian `u32` length followed by a JSON document of the form
//! `{"event": "update-entity", "data": {...}}`.

use std::{fmt, net::SocketAddr};

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::{
    clients::{ClientData, ClientPatch, Permissions},
    math::{Quat, Vec3},
    packet::{EntityPatch, Packet},
    schema::Schema,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Free-form replicated state blob of an entity.
pub type StateMap = serde_json::Map<String, serde_json::Value>;

/// Identifies a connected client. Assigned by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique entity id, `<ownerClientId>.<counter>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Client namespace the id was minted under, if it follows the `<client>.<n>` form.
    pub fn owner(&self) -> Option<ClientId> {
        let (owner, _) = self.0.split_once('.')?;
        owner.parse().ok().map(ClientId)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity authority mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Script runs on the authority; nobody is dragging it.
    #[default]
    Active,
    /// `modeClientId` drives the transform.
    Moving,
    /// Like `Moving`, bound to the edit gizmo instead of the move input.
    Editing,
    /// Killed: script and visual torn down, error placeholder shown.
    Dead,
}

impl Mode {
    /// `Moving` and `Editing` share the same driver semantics.
    pub fn is_moving(self) -> bool {
        matches!(self, Mode::Moving | Mode::Editing)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Active => "active",
            Mode::Moving => "moving",
            Mode::Editing => "editing",
            Mode::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Deserializes a present field (including `null`) as `Some(..)`.
///
/// Paired with `#[serde(default)]` this tells "absent" apart from "set to null".
pub(crate) fn present<'de, T, D>(d: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(d).map(Some)
}

/// Full entity record as sent in `init` and `add-entity`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntityData {
    pub id: EntityId,
    pub schema_id: String,
    /// User id of the creator.
    pub creator: String,
    pub authority: ClientId,
    #[serde(default)]
    pub uploading: Option<ClientId>,
    pub mode: Mode,
    #[serde(default)]
    pub mode_client_id: Option<ClientId>,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub quaternion: Quat,
    #[serde(default)]
    pub state: StateMap,
}

impl EntityData {
    /// Merges a patch into the record, field by field.
    pub fn apply_patch(&mut self, patch: &EntityPatch) {
        if let Some(props) = &patch.props {
            if let Some(p) = props.position {
                self.position = p;
            }
            if let Some(q) = props.quaternion {
                self.quaternion = q;
            }
            if let Some(mode) = props.mode {
                self.mode = mode;
            }
            if let Some(mode_client_id) = props.mode_client_id {
                self.mode_client_id = mode_client_id;
            }
            if let Some(uploading) = props.uploading {
                self.uploading = uploading;
            }
        }
        if let Some(state) = &patch.state {
            for (k, v) in state {
                self.state.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Replicated entity props. Absent fields are untouched by a merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntityProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quaternion: Option<Quat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub mode_client_id: Option<Option<ClientId>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub uploading: Option<Option<ClientId>>,
}

impl EntityProps {
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.quaternion.is_none()
            && self.mode.is_none()
            && self.mode_client_id.is_none()
            && self.uploading.is_none()
    }

    /// Later values win per field.
    pub fn merge(&mut self, other: EntityProps) {
        if other.position.is_some() {
            self.position = other.position;
        }
        if other.quaternion.is_some() {
            self.quaternion = other.quaternion;
        }
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.mode_client_id.is_some() {
            self.mode_client_id = other.mode_client_id;
        }
        if other.uploading.is_some() {
            self.uploading = other.uploading;
        }
    }
}

/// `update-entity` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityUpdate {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<EntityProps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateMap>,
}

impl EntityUpdate {
    pub fn from_patch(id: EntityId, patch: EntityPatch) -> Self {
        Self {
            id,
            props: patch.props,
            state: patch.state,
        }
    }

    pub fn to_patch(&self) -> EntityPatch {
        EntityPatch {
            props: self.props.clone(),
            state: self.state.clone(),
        }
    }
}

/// Static information about the space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SpaceMeta {
    pub name: String,
}

/// `init` payload: everything a joining client needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitData {
    pub meta: SpaceMeta,
    pub permissions: Permissions,
    pub clients: Vec<ClientData>,
    pub schemas: Vec<Schema>,
    pub instances: Vec<EntityData>,
    pub client_id: ClientId,
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum NetMsg {
    // ─── Handshake ───
    /// Client -> relay, first message after connecting.
    Auth {
        token: String,
        #[serde(default = "default_protocol")]
        protocol: u32,
    },
    /// Relay -> client, reply to `auth`.
    Init(InitData),

    // ─── Clients ───
    AddClient(ClientData),
    UpdateClient(ClientPatch),
    RemoveClient {
        id: ClientId,
    },

    // ─── Schemas and entities ───
    UpsertSchema(Schema),
    AddEntity(EntityData),
    UpdateEntity(EntityUpdate),
    RemoveEntity {
        id: EntityId,
    },
    /// Client -> relay: coalesced diff of one send interval.
    Packet(Packet),

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

fn default_protocol() -> u32 {
    PROTOCOL_VERSION
}

impl NetMsg {
    /// Wire event name, for logging.
    pub fn event(&self) -> &'static str {
        match self {
            NetMsg::Auth { .. } => "auth",
            NetMsg::Init(_) => "init",
            NetMsg::AddClient(_) => "add-client",
            NetMsg::UpdateClient(_) => "update-client",
            NetMsg::RemoveClient { .. } => "remove-client",
            NetMsg::UpsertSchema(_) => "upsert-schema",
            NetMsg::AddEntity(_) => "add-entity",
            NetMsg::UpdateEntity(_) => "update-entity",
            NetMsg::RemoveEntity { .. } => "remove-entity",
            NetMsg::Packet(_) => "packet",
            NetMsg::Disconnect { .. } => "disconnect",
        }
    }
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R>(r: &mut R) -> anyhow::Result<NetMsg>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame too large: {len} bytes");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(msg)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into halves that can be driven from separate tasks.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (r, w) = self.stream.into_split();
        (FrameReader { half: r }, FrameWriter { half: w })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameReader {
    half: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.half).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }

    /// Writes a batch in order and stops at the first failure.
    pub async fn send_all(&mut self, msgs: &[NetMsg]) -> anyhow::Result<()> {
        for msg in msgs {
            self.send(msg).await?;
        }
        self.half.flush().await.context("tcp flush")?;
        Ok(())
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netmsg_is_event_tagged() {
        let msg = NetMsg::RemoveEntity {
            id: EntityId::new("3.7"),
        };
        let json: serde_json::Value = serde_json::from_slice(&encode_to_bytes(&msg).unwrap()).unwrap();
        assert_eq!(json["event"], "remove-entity");
        assert_eq!(json["data"]["id"], "3.7");
        assert_eq!(decode_from_bytes(&encode_to_bytes(&msg).unwrap()).unwrap(), msg);
    }

    #[test]
    fn entity_data_uses_camel_case_wire_fields() {
        let raw = r#"{
            "id": "1.1", "schemaId": "box", "creator": "u1", "authority": 1,
            "mode": "moving", "modeClientId": 2,
            "position": [1, 2, 3], "quaternion": [0, 0, 0, 1], "state": {"hp": 3}
        }"#;
        let data: EntityData = serde_json::from_str(raw).unwrap();
        assert_eq!(data.schema_id, "box");
        assert_eq!(data.mode, Mode::Moving);
        assert_eq!(data.mode_client_id, Some(ClientId(2)));
        assert_eq!(data.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(data.uploading, None);
        assert_eq!(data.state["hp"], 3);
    }

    #[test]
    fn props_distinguish_absent_from_null() {
        let cleared: EntityProps = serde_json::from_str(r#"{"modeClientId": null}"#).unwrap();
        assert_eq!(cleared.mode_client_id, Some(None));
        let absent: EntityProps = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.mode_client_id, None);
        assert!(absent.is_empty());

        let json = serde_json::to_value(&cleared).unwrap();
        assert_eq!(json, serde_json::json!({"modeClientId": null}));
    }

    #[test]
    fn entity_id_owner_namespace() {
        assert_eq!(EntityId::new("12.4").owner(), Some(ClientId(12)));
        assert_eq!(EntityId::new("static").owner(), None);
    }

    #[tokio::test]
    async fn frames_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = NetMsg::Auth {
            token: "abc".into(),
            protocol: PROTOCOL_VERSION,
        };
        write_frame(&mut a, &msg).await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), msg);
    }
}
