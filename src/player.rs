//! Player identity and the roster each node keeps locally.
//! Mirrors the shape of the original `PlayerManager`/`Player` pair but
//! keyed by id in a `HashMap` rather than scanned out of a `set` on every
//! lookup.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use crate::proto::{PlayerType, Role, WirePlayer};

/// The id a player holds before the host has assigned one.
pub const PENDING_ID: i32 = -1;

#[derive(Debug, Clone)]
pub struct Player {
    pub id: i32,
    pub name: String,
    pub address: SocketAddr,
    pub role: Role,
    pub score: u32,
    pub player_type: PlayerType,
    pub is_local: bool,
    pub last_recv: Instant,
    pub last_send: Instant,
}

impl Player {
    pub fn new(id: i32, name: impl Into<String>, address: SocketAddr, role: Role) -> Self {
        let now = Instant::now();
        Player {
            id,
            name: name.into(),
            address,
            role,
            score: 0,
            player_type: PlayerType::Human,
            is_local: false,
            last_recv: now,
            last_send: now,
        }
    }

    pub fn to_wire(&self) -> WirePlayer {
        WirePlayer {
            id: self.id,
            name: self.name.clone(),
            address: self.address,
            role: self.role,
            score: self.score,
            player_type: self.player_type,
        }
    }
}

/// Each node's local view of who is playing. Owned entirely locally; there
/// is exactly one authoritative copy per node (the host's) and every
/// follower's copy is a snapshot mirror.
#[derive(Default)]
pub struct Roster {
    players: HashMap<i32, Player>,
}

impl Roster {
    pub fn new() -> Self {
        Roster {
            players: HashMap::new(),
        }
    }

    pub fn insert(&mut self, player: Player) {
        self.players.insert(player.id, player);
    }

    pub fn remove(&mut self, id: i32) -> Option<Player> {
        self.players.remove(&id)
    }

    pub fn get(&self, id: i32) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: i32) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn local(&self) -> &Player {
        self.players
            .values()
            .find(|p| p.is_local)
            .expect("roster always holds exactly one local player")
    }

    pub fn local_mut(&mut self) -> &mut Player {
        self.players
            .values_mut()
            .find(|p| p.is_local)
            .expect("roster always holds exactly one local player")
    }

    pub fn master(&self) -> Option<&Player> {
        self.players.values().find(|p| p.role == Role::Master)
    }

    pub fn deputy(&self) -> Option<&Player> {
        self.players.values().find(|p| p.role == Role::Deputy)
    }

    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &Player> {
        self.players.values().filter(move |p| p.role == role)
    }

    /// Picks an arbitrary `NORMAL` player to promote.
    pub fn pick_normal(&self) -> Option<i32> {
        self.players
            .values()
            .find(|p| p.role == Role::Normal)
            .map(|p| p.id)
    }

    pub fn max_id(&self) -> i32 {
        self.players.values().map(|p| p.id).max().unwrap_or(-1)
    }

    pub fn to_wire(&self) -> Vec<WirePlayer> {
        self.players.values().map(Player::to_wire).collect()
    }

    /// Replaces the roster wholesale from a replicated snapshot, keeping
    /// the local player's own identity/address/timestamps but adopting its
    /// role/name/score from the incoming data if present.
    pub fn load_snapshot(&mut self, players: &[WirePlayer]) {
        let local_id = self.local().id;
        let local_liveness = {
            let local = self.local();
            (local.last_recv, local.last_send)
        };
        let mut next = HashMap::with_capacity(players.len());
        for wire in players {
            let mut player = Player::new(wire.id, wire.name.clone(), wire.address, wire.role);
            player.score = wire.score;
            player.player_type = wire.player_type;
            if wire.id == local_id {
                player.is_local = true;
                player.last_recv = local_liveness.0;
                player.last_send = local_liveness.1;
            }
            next.insert(wire.id, player);
        }
        self.players = next;
    }
}
