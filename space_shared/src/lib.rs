//! `space_shared`
//!
//! Libraries used by both the client and the relay.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (net, registries, packets, math, events).
//! - Traits for the external collaborators (renderer, physics).
//! - No `unsafe`.

pub mod clients;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod math;
pub mod net;
pub mod node;
pub mod packet;
pub mod physics;
pub mod render;
pub mod schema;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::clients::*;
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::event::*;
    pub use crate::ids::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::node::*;
    pub use crate::packet::*;
    pub use crate::schema::*;
}
