//! A peer-to-peer multiplayer Snake game: every node is both a client and
//! a potential host, and hosting duties migrate to a `DEPUTY` if the
//! current `MASTER` disappears. A SOCKS5 relay is included as an
//! unrelated-but-same-discipline companion subsystem.

pub mod config;
pub mod engine;
pub mod error;
pub mod field;
pub mod player;
pub mod proto;
pub mod socks5;
pub mod timer;
pub mod transport;

pub use config::{GameConfig, NodeConfig};
pub use engine::Engine;
pub use error::CoreError;
