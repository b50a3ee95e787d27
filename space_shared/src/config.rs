//! Configuration system.
//!
//! Loads space configuration from JSON strings/files. Binaries override single
//! fields from the command line.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration shared by client/relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceConfig {
    /// Relay address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Space name reported in `init` (relay only).
    #[serde(default = "default_space_name")]
    pub space_name: String,
    /// Token sent in `auth` (client only).
    #[serde(default = "default_auth_token")]
    pub auth_token: String,
    /// Display name pushed with `update-client` (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Directory blueprint assets are read from (client only).
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,
    /// Outbound packets per second.
    #[serde(default = "default_send_rate_hz")]
    pub send_rate_hz: f32,
    /// Fixed simulation rate.
    #[serde(default = "default_fixed_hz")]
    pub fixed_hz: u32,
    /// Upper bound on queued fixed steps after a stall.
    #[serde(default = "default_max_fixed_steps")]
    pub max_fixed_steps: u32,
    /// Rotation catch-up rate for remotely driven entities, per second.
    #[serde(default = "default_rotation_slerp_rate")]
    pub rotation_slerp_rate: f32,
    /// Position damping time constant, in send periods.
    #[serde(default = "default_damping_periods")]
    pub damping_periods: f32,
    /// Spawn the local avatar after `init`.
    #[serde(default)]
    pub spawn_avatar: bool,
}

fn default_space_name() -> String {
    "lobby".to_string()
}

fn default_auth_token() -> String {
    "guest".to_string()
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_assets_dir() -> String {
    "assets".to_string()
}

fn default_send_rate_hz() -> f32 {
    5.0
}

fn default_fixed_hz() -> u32 {
    60
}

fn default_max_fixed_steps() -> u32 {
    20
}

fn default_rotation_slerp_rate() -> f32 {
    5.0
}

fn default_damping_periods() -> f32 {
    3.0
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            space_name: default_space_name(),
            auth_token: default_auth_token(),
            player_name: default_player_name(),
            assets_dir: default_assets_dir(),
            send_rate_hz: default_send_rate_hz(),
            fixed_hz: default_fixed_hz(),
            max_fixed_steps: default_max_fixed_steps(),
            rotation_slerp_rate: default_rotation_slerp_rate(),
            damping_periods: default_damping_periods(),
            spawn_avatar: false,
        }
    }
}

impl SpaceConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    /// Seconds between outbound packets.
    pub fn send_period(&self) -> f32 {
        1.0 / self.send_rate_hz.max(0.001)
    }

    /// Seconds per fixed step.
    pub fn fixed_timestep(&self) -> f32 {
        1.0 / self.fixed_hz.max(1) as f32
    }

    /// Largest fixed-step backlog kept after a stall.
    pub fn fixed_time_max(&self) -> f32 {
        self.fixed_timestep() * self.max_fixed_steps as f32
    }

    /// Time constant for damping remote positions.
    pub fn damping_time(&self) -> f32 {
        self.send_period() * self.damping_periods
    }
}
