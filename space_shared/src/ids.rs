//! Entity id minting.
//!
//! Each client mints ids only in its own namespace, so `<client>.<counter>`
//! is unique across the space without coordination.

use crate::net::{ClientId, EntityId};

/// Per-session id generator.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    owner: ClientId,
    next: u64,
}

impl IdGenerator {
    pub fn new(owner: ClientId) -> Self {
        Self { owner, next: 0 }
    }

    pub fn owner(&self) -> ClientId {
        self.owner
    }

    pub fn next_id(&mut self) -> EntityId {
        self.next += 1;
        EntityId(format!("{}.{}", self.owner, self.next))
    }
}
