//! World-level error taxonomy.
//!
//! Failures are contained at the entity boundary: callers on the network-apply
//! path and the frame tick log these and keep going.

use crate::net::{ClientId, EntityId};

/// Errors raised by registries and the entity apply path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),
    #[error("client not found: {0}")]
    ClientNotFound(ClientId),
    #[error("schema not found: {0}")]
    SchemaNotFound(String),
    #[error("entity already exists: {0}")]
    EntityExists(EntityId),
    #[error("client {client} may not write the transform of {entity}")]
    NotDriver { entity: EntityId, client: ClientId },
    #[error("not connected to a space")]
    NotConnected,
}

impl WorldError {
    /// Whether this is a reference to something unknown (log and ignore).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            WorldError::EntityNotFound(_)
                | WorldError::ClientNotFound(_)
                | WorldError::SchemaNotFound(_)
        )
    }
}
