//! The wire format: length-delimited (the datagram
//! itself is the length, UDP already frames it for us) tag-oneof messages.
//!
//! This generalizes the teacher's own byte-level framing
//! (`send_to_stream`/`read_from_stream` in the original `shared.rs`, which
//! prefixed a length and hand-wrote `extend_from_slice`/`to_be_bytes` calls)
//! to the richer oneof of messages this protocol needs, instead of reaching
//! for a schema compiler that nothing else in this codebase's lineage pulls
//! in.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// A single step direction on the toroidal field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// `true` if `self` is the 180-degree reversal of `other`.
    pub fn is_opposite(self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Up, Direction::Down)
                | (Direction::Down, Direction::Up)
                | (Direction::Left, Direction::Right)
                | (Direction::Right, Direction::Left)
        )
    }

    /// The `(dx, dy)` unit vector for one step in this direction.
    pub fn vector(self) -> (i64, i64) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(Direction::Up),
            1 => Ok(Direction::Down),
            2 => Ok(Direction::Left),
            3 => Ok(Direction::Right),
            other => Err(DecodeError(format!("bad direction byte {other}"))),
        }
    }
}

/// The four roles a player can hold, per the GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Master,
    Deputy,
    Normal,
    Viewer,
}

impl Role {
    fn to_byte(self) -> u8 {
        match self {
            Role::Master => 0,
            Role::Deputy => 1,
            Role::Normal => 2,
            Role::Viewer => 3,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(Role::Master),
            1 => Ok(Role::Deputy),
            2 => Ok(Role::Normal),
            3 => Ok(Role::Viewer),
            other => Err(DecodeError(format!("bad role byte {other}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Master => "MASTER",
            Role::Deputy => "DEPUTY",
            Role::Normal => "NORMAL",
            Role::Viewer => "VIEWER",
        };
        f.write_str(s)
    }
}

/// Whether a player slot is a human or a bot. Kept from the original
/// protocol's `player_type`; this repo has no bot implementation of its
/// own, but the wire field is preserved so a future bot client is a
/// protocol no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerType {
    Human,
    Bot,
}

impl PlayerType {
    fn to_byte(self) -> u8 {
        match self {
            PlayerType::Human => 0,
            PlayerType::Bot => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(PlayerType::Human),
            1 => Ok(PlayerType::Bot),
            other => Err(DecodeError(format!("bad player_type byte {other}"))),
        }
    }
}

/// Liveness state of a snake's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnakeState {
    Alive,
    Zombie,
}

impl SnakeState {
    fn to_byte(self) -> u8 {
        match self {
            SnakeState::Alive => 0,
            SnakeState::Zombie => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(SnakeState::Alive),
            1 => Ok(SnakeState::Zombie),
            other => Err(DecodeError(format!("bad snake state byte {other}"))),
        }
    }
}

/// A player as carried inside `State`/`Announcement` payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct WirePlayer {
    pub id: i32,
    pub name: String,
    pub address: SocketAddr,
    pub role: Role,
    pub score: u32,
    pub player_type: PlayerType,
}

/// A snake as carried inside a `State` payload: head-absolute,
/// tail-relative-delta.
#[derive(Debug, Clone, PartialEq)]
pub struct WireSnake {
    pub player_id: i32,
    /// `points[0]` is the absolute head position; `points[1..]` are deltas
    /// between consecutive tail cells, all modulo field size.
    pub points: Vec<(i32, i32)>,
    pub head_direction: Direction,
    pub state: SnakeState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub width: u32,
    pub height: u32,
    pub food_static: u32,
    pub state_delay_ms: u32,
}

/// One advertised game inside an `Announcement`. `can_join` is carried over
/// from the original implementation (see SPEC_FULL.md) for the benefit of
/// the (out-of-scope) UI that lists discovered games.
#[derive(Debug, Clone, PartialEq)]
pub struct GameAnnouncement {
    pub game_name: String,
    pub can_join: bool,
    pub config: GameConfig,
    pub players: Vec<WirePlayer>,
}

/// `sender_role`/`receiver_role` as encoded by a `RoleChange` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleChange {
    pub sender_role: Role,
    pub receiver_role: Role,
}

/// The one-of payload carried by every `Message`.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Ping,
    Steer(Direction),
    Ack,
    State {
        state_order: u64,
        players: Vec<WirePlayer>,
        foods: Vec<(i32, i32)>,
        snakes: Vec<WireSnake>,
    },
    Announcement {
        games: Vec<GameAnnouncement>,
    },
    Join {
        player_type: PlayerType,
        player_name: String,
        game_name: String,
        requested_role: Role,
    },
    Error {
        error_message: String,
    },
    RoleChange(RoleChange),
    Discover,
}

impl MessageBody {
    fn tag(&self) -> u8 {
        match self {
            MessageBody::Ping => 0,
            MessageBody::Steer(_) => 1,
            MessageBody::Ack => 2,
            MessageBody::State { .. } => 3,
            MessageBody::Announcement { .. } => 4,
            MessageBody::Join { .. } => 5,
            MessageBody::Error { .. } => 6,
            MessageBody::RoleChange(_) => 7,
            MessageBody::Discover => 8,
        }
    }

    /// Human-readable case name, used for logging without needing a
    /// `Display` impl on the whole body (payloads can be large).
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Ping => "ping",
            MessageBody::Steer(_) => "steer",
            MessageBody::Ack => "ack",
            MessageBody::State { .. } => "state",
            MessageBody::Announcement { .. } => "announcement",
            MessageBody::Join { .. } => "join",
            MessageBody::Error { .. } => "error",
            MessageBody::RoleChange(_) => "role_change",
            MessageBody::Discover => "discover",
        }
    }
}

/// Top-level wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub msg_seq: u64,
    pub sender_id: i32,
    pub receiver_id: i32,
    pub body: MessageBody,
}

#[derive(Debug, Clone)]
pub struct DecodeError(pub String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for DecodeError {}

// --- encoding -----------------------------------------------------------

struct Writer(Vec<u8>);

impl Writer {
    fn new() -> Self {
        Writer(Vec::new())
    }
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn i32(&mut self, v: i32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn bool(&mut self, v: bool) {
        self.0.push(v as u8);
    }
    fn str(&mut self, s: &str) {
        self.u16(s.len() as u16);
        self.0.extend_from_slice(s.as_bytes());
    }
    fn addr(&mut self, addr: SocketAddr) {
        match addr {
            SocketAddr::V4(v4) => {
                self.0.extend_from_slice(&v4.ip().octets());
                self.u16(v4.port());
            }
            SocketAddr::V6(_) => {
                // LAN discovery only ever hands us v4 addresses; fall back
                // to the unspecified address rather than growing the wire
                // format for a case that cannot occur on this transport.
                self.0.extend_from_slice(&[0, 0, 0, 0]);
                self.u16(0);
            }
        }
    }
}

fn write_player(w: &mut Writer, p: &WirePlayer) {
    w.i32(p.id);
    w.str(&p.name);
    w.addr(p.address);
    w.u8(p.role.to_byte());
    w.u32(p.score);
    w.u8(p.player_type.to_byte());
}

fn write_snake(w: &mut Writer, s: &WireSnake) {
    w.i32(s.player_id);
    w.u8(s.head_direction.to_byte());
    w.u8(s.state.to_byte());
    w.u16(s.points.len() as u16);
    for (x, y) in &s.points {
        w.i32(*x);
        w.i32(*y);
    }
}

fn write_config(w: &mut Writer, c: &GameConfig) {
    w.u32(c.width);
    w.u32(c.height);
    w.u32(c.food_static);
    w.u32(c.state_delay_ms);
}

pub fn encode(msg: &Message) -> Vec<u8> {
    let mut w = Writer::new();
    w.u64(msg.msg_seq);
    w.i32(msg.sender_id);
    w.i32(msg.receiver_id);
    w.u8(msg.body.tag());
    match &msg.body {
        MessageBody::Ping | MessageBody::Ack | MessageBody::Discover => {}
        MessageBody::Steer(dir) => w.u8(dir.to_byte()),
        MessageBody::State {
            state_order,
            players,
            foods,
            snakes,
        } => {
            w.u64(*state_order);
            w.u16(players.len() as u16);
            for p in players {
                write_player(&mut w, p);
            }
            w.u16(foods.len() as u16);
            for (x, y) in foods {
                w.i32(*x);
                w.i32(*y);
            }
            w.u16(snakes.len() as u16);
            for s in snakes {
                write_snake(&mut w, s);
            }
        }
        MessageBody::Announcement { games } => {
            w.u16(games.len() as u16);
            for g in games {
                w.str(&g.game_name);
                w.bool(g.can_join);
                write_config(&mut w, &g.config);
                w.u16(g.players.len() as u16);
                for p in &g.players {
                    write_player(&mut w, p);
                }
            }
        }
        MessageBody::Join {
            player_type,
            player_name,
            game_name,
            requested_role,
        } => {
            w.u8(player_type.to_byte());
            w.str(player_name);
            w.str(game_name);
            w.u8(requested_role.to_byte());
        }
        MessageBody::Error { error_message } => w.str(error_message),
        MessageBody::RoleChange(rc) => {
            w.u8(rc.sender_role.to_byte());
            w.u8(rc.receiver_role.to_byte());
        }
    }
    w.0
}

// --- decoding ------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.pos + n > self.buf.len() {
            Err(DecodeError(format!(
                "truncated message: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len()
            )))
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        let v = u16::from_be_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        Ok(v)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        let v = u32::from_be_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        self.need(8)?;
        let v = u64::from_be_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        let v = i32::from_be_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    fn str(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        self.need(len)?;
        let s = std::str::from_utf8(&self.buf[self.pos..self.pos + len])
            .map_err(|e| DecodeError(format!("invalid utf8: {e}")))?
            .to_owned();
        self.pos += len;
        Ok(s)
    }

    fn addr(&mut self) -> Result<SocketAddr, DecodeError> {
        self.need(4)?;
        let octets: [u8; 4] = self.buf[self.pos..self.pos + 4].try_into().unwrap();
        self.pos += 4;
        let port = self.u16()?;
        Ok(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::from(octets),
            port,
        )))
    }
}

fn read_player(r: &mut Reader) -> Result<WirePlayer, DecodeError> {
    Ok(WirePlayer {
        id: r.i32()?,
        name: r.str()?,
        address: r.addr()?,
        role: Role::from_byte(r.u8()?)?,
        score: r.u32()?,
        player_type: PlayerType::from_byte(r.u8()?)?,
    })
}

fn read_snake(r: &mut Reader) -> Result<WireSnake, DecodeError> {
    let player_id = r.i32()?;
    let head_direction = Direction::from_byte(r.u8()?)?;
    let state = SnakeState::from_byte(r.u8()?)?;
    let count = r.u16()? as usize;
    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        points.push((r.i32()?, r.i32()?));
    }
    Ok(WireSnake {
        player_id,
        points,
        head_direction,
        state,
    })
}

fn read_config(r: &mut Reader) -> Result<GameConfig, DecodeError> {
    Ok(GameConfig {
        width: r.u32()?,
        height: r.u32()?,
        food_static: r.u32()?,
        state_delay_ms: r.u32()?,
    })
}

pub fn decode(buf: &[u8]) -> Result<Message, DecodeError> {
    let mut r = Reader::new(buf);
    let msg_seq = r.u64()?;
    let sender_id = r.i32()?;
    let receiver_id = r.i32()?;
    let tag = r.u8()?;
    let body = match tag {
        0 => MessageBody::Ping,
        1 => MessageBody::Steer(Direction::from_byte(r.u8()?)?),
        2 => MessageBody::Ack,
        3 => {
            let state_order = r.u64()?;
            let player_count = r.u16()? as usize;
            let mut players = Vec::with_capacity(player_count);
            for _ in 0..player_count {
                players.push(read_player(&mut r)?);
            }
            let food_count = r.u16()? as usize;
            let mut foods = Vec::with_capacity(food_count);
            for _ in 0..food_count {
                foods.push((r.i32()?, r.i32()?));
            }
            let snake_count = r.u16()? as usize;
            let mut snakes = Vec::with_capacity(snake_count);
            for _ in 0..snake_count {
                snakes.push(read_snake(&mut r)?);
            }
            MessageBody::State {
                state_order,
                players,
                foods,
                snakes,
            }
        }
        4 => {
            let count = r.u16()? as usize;
            let mut games = Vec::with_capacity(count);
            for _ in 0..count {
                let game_name = r.str()?;
                let can_join = r.bool()?;
                let config = read_config(&mut r)?;
                let player_count = r.u16()? as usize;
                let mut players = Vec::with_capacity(player_count);
                for _ in 0..player_count {
                    players.push(read_player(&mut r)?);
                }
                games.push(GameAnnouncement {
                    game_name,
                    can_join,
                    config,
                    players,
                });
            }
            MessageBody::Announcement { games }
        }
        5 => MessageBody::Join {
            player_type: PlayerType::from_byte(r.u8()?)?,
            player_name: r.str()?,
            game_name: r.str()?,
            requested_role: Role::from_byte(r.u8()?)?,
        },
        6 => MessageBody::Error {
            error_message: r.str()?,
        },
        7 => MessageBody::RoleChange(RoleChange {
            sender_role: Role::from_byte(r.u8()?)?,
            receiver_role: Role::from_byte(r.u8()?)?,
        }),
        8 => MessageBody::Discover,
        other => return Err(DecodeError(format!("unknown message tag {other}"))),
    };
    Ok(Message {
        msg_seq,
        sender_id,
        receiver_id,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port))
    }

    #[test]
    fn round_trips_join() {
        let msg = Message {
            msg_seq: 42,
            sender_id: -1,
            receiver_id: 0,
            body: MessageBody::Join {
                player_type: PlayerType::Human,
                player_name: "alice".into(),
                game_name: "arena".into(),
                requested_role: Role::Normal,
            },
        };
        let bytes = encode(&msg);
        let decoded = decode(&bytes).expect("decodes");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_state_with_snakes_and_food() {
        let msg = Message {
            msg_seq: 7,
            sender_id: 0,
            receiver_id: 3,
            body: MessageBody::State {
                state_order: 12,
                players: vec![WirePlayer {
                    id: 0,
                    name: "host".into(),
                    address: addr(9000),
                    role: Role::Master,
                    score: 3,
                    player_type: PlayerType::Human,
                }],
                foods: vec![(1, 1), (2, 3)],
                snakes: vec![WireSnake {
                    player_id: 0,
                    points: vec![(5, 5), (0, 1), (0, 1)],
                    head_direction: Direction::Up,
                    state: SnakeState::Alive,
                }],
            },
        };
        let bytes = encode(&msg);
        let decoded = decode(&bytes).expect("decodes");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let msg = Message {
            msg_seq: 1,
            sender_id: 0,
            receiver_id: 0,
            body: MessageBody::Ping,
        };
        let mut bytes = encode(&msg);
        bytes.truncate(bytes.len() - 1);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn direction_opposite() {
        assert!(Direction::Up.is_opposite(Direction::Down));
        assert!(!Direction::Up.is_opposite(Direction::Left));
    }
}
