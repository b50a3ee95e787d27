//! World events.
//!
//! Each component owns a typed queue of the events it raises; the owner of the
//! tick loop drains it. There is no global broadcast.

use crate::net::{ClientId, EntityId};

/// Events a space raises for the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SpaceEvent {
    /// Transport connected; `auth` has been queued.
    Connected,
    /// `init` applied; the space is live.
    Active { client_id: ClientId },
    /// Connection lost. No reconnect is attempted.
    Disconnected { reason: String },
    ClientJoined { client_id: ClientId },
    ClientLeft { client_id: ClientId },
    /// An entity faulted (load failure or script error) and is now dead.
    EntityKilled { id: EntityId, reason: String },
}

/// Typed FIFO event queue.
#[derive(Debug)]
pub struct EventQueue<E> {
    queue: Vec<E>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self { queue: Vec::new() }
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes an event into the queue.
    pub fn push(&mut self, e: E) {
        self.queue.push(e);
    }

    /// Drains all queued events in push order.
    pub fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.queue)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
