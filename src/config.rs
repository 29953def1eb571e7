//! Typed configuration bundles the CLI binaries build from `clap` args and
//! hand to the core. There is no on-disk config file — the UI/CLI layer is
//! the only source of these values.

use std::net::SocketAddr;

use crate::proto::{self, Role};

/// Everything the replication engine needs to host or join a game, beyond
/// what the roster/field types already track themselves.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub game_name: String,
    pub width: u32,
    pub height: u32,
    pub food_static: u32,
    pub state_delay_ms: u32,
    pub player_name: String,
    pub requested_role: Role,
}

impl GameConfig {
    pub fn to_wire(&self) -> proto::GameConfig {
        proto::GameConfig {
            width: self.width,
            height: self.height,
            food_static: self.food_static,
            state_delay_ms: self.state_delay_ms,
        }
    }
}

/// Transport-level bind settings. The multicast group/port/TTL are fixed
/// protocol constants (see `transport.rs`); only the unicast bind address
/// is configurable, and even that is normally left at "any port".
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }
}
