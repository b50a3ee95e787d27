//! Client registry.
//!
//! Tracks every participant connected to a space and which one is "self".
//! Entities never hold client references, only [`ClientId`]s that are looked
//! up here.

use std::collections::BTreeMap;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::WorldError, net::ClientId};

bitflags! {
    /// What a client is allowed to do in a space.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permissions: u32 {
        /// May spawn, move and edit entities.
        const BUILD = 1 << 0;
        /// May change space-wide settings and remove anything.
        const ADMIN = 1 << 1;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::BUILD
    }
}

/// User behind a client connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// A connected participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientData {
    pub id: ClientId,
    pub user: UserProfile,
    #[serde(default)]
    pub permissions: Permissions,
    pub joined_at: DateTime<Utc>,
}

/// Partial client update (`update-client`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientPatch {
    pub id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
}

/// Registry of connected clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<ClientId, ClientData>,
    self_id: Option<ClientId>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a client.
    pub fn add_client(&mut self, data: ClientData) {
        self.clients.insert(data.id, data);
    }

    /// Applies a partial update.
    pub fn update_client(&mut self, patch: ClientPatch) -> Result<&ClientData, WorldError> {
        let client = self
            .clients
            .get_mut(&patch.id)
            .ok_or(WorldError::ClientNotFound(patch.id))?;
        if let Some(user) = patch.user {
            client.user = user;
        }
        if let Some(permissions) = patch.permissions {
            client.permissions = permissions;
        }
        Ok(client)
    }

    pub fn remove_client(&mut self, id: ClientId) -> Result<ClientData, WorldError> {
        if self.self_id == Some(id) {
            self.self_id = None;
        }
        self.clients.remove(&id).ok_or(WorldError::ClientNotFound(id))
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientData> {
        self.clients.get(&id)
    }

    /// Marks which client is this process.
    pub fn set_self(&mut self, id: ClientId) -> Result<(), WorldError> {
        if !self.clients.contains_key(&id) {
            return Err(WorldError::ClientNotFound(id));
        }
        self.self_id = Some(id);
        Ok(())
    }

    pub fn self_id(&self) -> Option<ClientId> {
        self.self_id
    }

    pub fn get_self(&self) -> Option<&ClientData> {
        self.self_id.and_then(|id| self.clients.get(&id))
    }

    /// Finds the profile of a user by user id (not client id).
    pub fn find_user_by_user_id(&self, user_id: &str) -> Option<&UserProfile> {
        self.clients
            .values()
            .map(|c| &c.user)
            .find(|u| u.id == user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientData> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clear(&mut self) {
        self.clients.clear();
        self.self_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: u32, user: &str) -> ClientData {
        ClientData {
            id: ClientId(id),
            user: UserProfile {
                id: user.to_string(),
                ..Default::default()
            },
            permissions: Permissions::BUILD,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn self_lookup_and_user_search() {
        let mut reg = ClientRegistry::new();
        reg.add_client(client(1, "alice"));
        reg.add_client(client(2, "bob"));
        reg.set_self(ClientId(2)).unwrap();

        assert_eq!(reg.get_self().unwrap().user.id, "bob");
        assert_eq!(reg.find_user_by_user_id("alice").unwrap().id, "alice");
        assert!(reg.find_user_by_user_id("carol").is_none());
    }

    #[test]
    fn partial_update_keeps_untouched_fields() {
        let mut reg = ClientRegistry::new();
        reg.add_client(client(1, "alice"));
        let updated = reg
            .update_client(ClientPatch {
                id: ClientId(1),
                user: None,
                permissions: Some(Permissions::BUILD | Permissions::ADMIN),
            })
            .unwrap();
        assert_eq!(updated.user.id, "alice");
        assert!(updated.permissions.contains(Permissions::ADMIN));
    }

    #[test]
    fn unknown_client_is_not_found() {
        let mut reg = ClientRegistry::new();
        let err = reg.remove_client(ClientId(9)).unwrap_err();
        assert!(err.is_not_found());
        assert!(reg.set_self(ClientId(9)).is_err());
    }

    #[test]
    fn removing_self_clears_self() {
        let mut reg = ClientRegistry::new();
        reg.add_client(client(1, "alice"));
        reg.set_self(ClientId(1)).unwrap();
        reg.remove_client(ClientId(1)).unwrap();
        assert!(reg.get_self().is_none());
    }
}
