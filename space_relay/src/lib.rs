//! `space_relay`
//!
//! Relay-side systems:
//! - `auth` handshake and client id assignment
//! - Late-join cache of clients, schemas and entities
//! - Fan-out of every change to all other clients
//!
//! Networking model:
//! - TCP, one ordered stream per client, length-prefixed JSON frames
//! - The relay never simulates; clients own their entities

pub mod relay;

pub use relay::{bind_ephemeral, Relay};
