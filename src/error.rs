use std::net::SocketAddr;

use thiserror::Error;

/// The error taxonomy of the replication/role engine and the SOCKS5 relay.
///
/// Handlers catch and log these at the boundary (one malformed datagram or
/// one bad client must never poison the event loop); only bind failures at
/// startup are allowed to be fatal, and those are reported to `main` as
/// `anyhow::Error` instead of this type.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transport error sending to {addr}: {source}")]
    Transport {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("could not decode datagram from {addr}: {reason}")]
    Parse { addr: SocketAddr, reason: String },

    #[error("field has no space for a new snake")]
    NoSpace,

    #[error("message from unknown sender id {sender_id}")]
    UnknownSender { sender_id: i32 },

    #[error("SOCKS5 protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("role_change does not match any legal transition: {0:?}")]
    UnsupportedRoleChange(crate::proto::RoleChange),
}
