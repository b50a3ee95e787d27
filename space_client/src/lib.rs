//! `space_client`
//!
//! Client-side systems:
//! - Ordered, batched transport to the relay
//! - Client world ([`Space`]) with the per-frame tick
//! - Entity mode state machine and load generations
//! - Active-set scheduling of per-frame callbacks
//! - Interpolation of remotely driven entities
//! - Script capability surface and fault isolation
//! - Asset loading (directory and in-memory loaders)

pub mod builtin;
pub mod console;
pub mod entity;
pub mod input;
pub mod interp;
pub mod loader;
pub mod registry;
pub mod script;
pub mod space;
pub mod testing;
pub mod transport;
pub mod visual;

pub use space::{Collaborators, Space};
