//! The role/replication engine: owns the local player, the roster of
//! remote players, the timer wheel driving the four periodic tasks, and
//! (on the host) the field itself. Everything here runs on one thread;
//! handlers never block and never spawn.
//!
//! `Engine` never holds a `Transport`. Callers pass a `&Transport`
//! into whichever method needs to send, so the two can be constructed,
//! polled, and dropped independently by whoever owns the event loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::error::CoreError;
use crate::field::{Event, Field, NoSpace};
use crate::player::{Player, Roster, PENDING_ID};
use crate::proto::{self, Direction, GameAnnouncement, GameConfig, Message, MessageBody, PlayerType, Role, RoleChange, WirePlayer};
use crate::timer::{TaskKind, TimerWheel};
use crate::transport::Transport;

pub struct Engine {
    pub roster: Roster,
    pub field: Field,
    state_order: u64,
    next_seq: u64,
    next_player_id: i32,
    pending_acks: HashMap<u64, Message>,
    timer: TimerWheel,
    game_name: String,
    state_delay_ms: u32,
    repaint_pending: bool,
}

impl Engine {
    /// Boots a fresh game as its host: id 0, role `MASTER`, one snake
    /// spawned on an otherwise empty field.
    pub fn host(
        local_name: impl Into<String>,
        game_name: impl Into<String>,
        config: GameConfig,
        local_addr: SocketAddr,
        now: Instant,
        transport: &Transport,
    ) -> Engine {
        let mut engine = Engine {
            roster: Roster::new(),
            field: Field::new(config.width, config.height, config.food_static),
            state_order: 0,
            next_seq: 0,
            next_player_id: 0,
            pending_acks: HashMap::new(),
            timer: TimerWheel::new(now, config.state_delay_ms as u64),
            game_name: game_name.into(),
            state_delay_ms: config.state_delay_ms,
            repaint_pending: false,
        };
        let id = engine.allocate_id();
        let mut me = Player::new(id, local_name, local_addr, Role::Normal);
        me.is_local = true;
        engine.roster.insert(me);
        engine.become_master(now, transport);
        match engine.field.request_pos_for_new_snake() {
            Ok((x, y)) => engine.field.spawn_snake(x, y, id),
            Err(NoSpace) => error!("could not place the host's own snake on an empty field"),
        }
        engine
    }

    /// Prepares to join a game already advertised by some host. `known_players`
    /// is the roster carried in the `GameAnnouncement` the caller picked, so
    /// the current MASTER's address is known before any round trip completes.
    /// Returns the engine plus the `Join` message the caller must unicast to
    /// that master's address.
    pub fn join(
        local_name: impl Into<String>,
        game_name: impl Into<String>,
        config: GameConfig,
        requested_role: Role,
        local_addr: SocketAddr,
        known_players: &[WirePlayer],
        now: Instant,
    ) -> (Engine, Message) {
        let mut engine = Engine {
            roster: Roster::new(),
            field: Field::new(config.width, config.height, config.food_static),
            state_order: 0,
            next_seq: 0,
            next_player_id: 0,
            pending_acks: HashMap::new(),
            timer: TimerWheel::new(now, config.state_delay_ms as u64),
            game_name: game_name.into(),
            state_delay_ms: config.state_delay_ms,
            repaint_pending: false,
        };
        for wire in known_players {
            let mut p = Player::new(wire.id, wire.name.clone(), wire.address, wire.role);
            p.score = wire.score;
            p.player_type = wire.player_type;
            engine.roster.insert(p);
        }
        let mut me = Player::new(PENDING_ID, local_name, local_addr, requested_role);
        me.is_local = true;
        let local_player_name = me.name.clone();
        engine.roster.insert(me);

        let host_id = engine
            .roster
            .master()
            .map(|m| m.id)
            .expect("a game announcement always lists a MASTER");
        let join_msg = engine.build_message(
            host_id,
            MessageBody::Join {
                player_type: PlayerType::Human,
                player_name: local_player_name,
                game_name: engine.game_name.clone(),
                requested_role,
            },
        );
        engine.pending_acks.insert(join_msg.msg_seq, join_msg.clone());
        (engine, join_msg)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.next_deadline()
    }

    /// Drains and clears the repaint flag, true if a tick or an accepted
    /// snapshot happened since the last call.
    pub fn take_repaint(&mut self) -> bool {
        std::mem::take(&mut self.repaint_pending)
    }

    pub fn run_due_tasks(&mut self, now: Instant, transport: &Transport) {
        for task in self.timer.due(now) {
            match task {
                TaskKind::RetryAcks => self.run_retry_acks(transport),
                TaskKind::Ping => self.run_ping(now, transport),
                TaskKind::TickBroadcast => self.run_tick_broadcast(now, transport),
                TaskKind::Announce => self.run_announce(transport),
            }
        }
    }

    pub fn handle_datagram(
        &mut self,
        from: SocketAddr,
        payload: &[u8],
        now: Instant,
        transport: &Transport,
    ) {
        let msg = match proto::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%from, error = %e, "dropping undecodable datagram");
                return;
            }
        };
        trace!(kind = msg.body.kind(), sender = msg.sender_id, %from, "received message");

        match msg.body.clone() {
            MessageBody::Ping => {}
            MessageBody::Steer(direction) => self.handle_steer(&msg, direction, from, transport),
            MessageBody::Ack => self.handle_ack(&msg),
            MessageBody::State {
                state_order,
                players,
                foods,
                snakes,
            } => self.handle_state(state_order, &players, &foods, &snakes),
            MessageBody::Announcement { .. } => {}
            MessageBody::Join {
                player_type,
                player_name,
                game_name: _,
                requested_role,
            } => self.handle_join(&msg, player_type, player_name, requested_role, from, transport),
            MessageBody::Error { error_message } => {
                self.handle_error(&msg, &error_message, from, transport)
            }
            MessageBody::RoleChange(rc) => {
                if let Err(e) = self.handle_role_change(&msg, rc, from, now, transport) {
                    warn!(%e, "dropping role_change");
                }
            }
            MessageBody::Discover => self.handle_discover(from, transport),
        }

        if msg.sender_id != PENDING_ID {
            match self.roster.get_mut(msg.sender_id) {
                Some(p) => p.last_recv = now,
                None => warn!(
                    sender = msg.sender_id,
                    kind = msg.body.kind(),
                    "message from a player not in the roster"
                ),
            }
        }
    }

    /// Sends the local player's direction input to the current MASTER.
    /// A VIEWER has no snake and its input is dropped locally.
    pub fn submit_steer(&mut self, direction: Direction, transport: &Transport) {
        if self.roster.local().role == Role::Viewer {
            return;
        }
        match self.roster.master() {
            Some(master) => {
                let (id, addr) = (master.id, master.address);
                let msg = self.build_message(id, MessageBody::Steer(direction));
                self.send_expect_ack(msg, addr, transport);
            }
            None => warn!("no MASTER known, dropping local steer input"),
        }
    }

    /// Requests that the local player stop participating actively.
    pub fn request_become_viewer(&mut self, now: Instant, transport: &Transport) {
        self.become_viewer(now, transport);
    }

    // --- message handlers ------------------------------------------------

    fn handle_steer(&mut self, msg: &Message, direction: Direction, from: SocketAddr, transport: &Transport) {
        if self.roster.local().role != Role::Master {
            warn!("received a steer while not MASTER, ignoring");
            return;
        }
        if self.field.turn(msg.sender_id, direction) {
            self.ack(msg, from, msg.sender_id, transport);
        }
    }

    fn handle_ack(&mut self, msg: &Message) {
        if let Some(original) = self.pending_acks.remove(&msg.msg_seq) {
            if let MessageBody::RoleChange(rc) = &original.body {
                // Only the voluntary-exit-to-VIEWER handshake applies an
                // effect purely on ack receipt; every other role_change's
                // effect is already applied synchronously where it is sent
                // or at the receiver's handle_role_change.
                if rc.sender_role == Role::Viewer {
                    self.roster.local_mut().role = Role::Viewer;
                    info!("adopted VIEWER role after master acked the handoff");
                }
            }
        }
        if self.roster.local().id == PENDING_ID {
            self.adopt_assigned_id(msg.receiver_id);
        }
    }

    fn handle_state(&mut self, state_order: u64, players: &[WirePlayer], foods: &[(i32, i32)], snakes: &[crate::proto::WireSnake]) {
        if state_order <= self.state_order {
            return;
        }
        if self.roster.local().id == PENDING_ID {
            // Can't yet tell which incoming player is ourselves; the host
            // resends a snapshot every state_delay_ms, so drop this one and
            // pick up the next after the join ack arrives.
            trace!("dropping state snapshot received before join was acknowledged");
            return;
        }
        self.state_order = state_order;
        if self.roster.local().role != Role::Master {
            self.roster.load_snapshot(players);
            self.field.load_snapshot(foods, snakes);
            self.next_player_id = self.roster.max_id() + 1;
            self.repaint_pending = true;
        }
    }

    fn handle_join(
        &mut self,
        msg: &Message,
        player_type: PlayerType,
        player_name: String,
        requested_role: Role,
        from: SocketAddr,
        transport: &Transport,
    ) {
        if requested_role == Role::Viewer {
            let id = self.allocate_id();
            let mut player = Player::new(id, player_name, from, Role::Viewer);
            player.player_type = player_type;
            self.roster.insert(player);
            self.ack(msg, from, id, transport);
            self.send_state_to(id, from, transport);
            info!(id, "joined as VIEWER");
            return;
        }

        match self.field.request_pos_for_new_snake() {
            Ok((x, y)) => {
                let id = self.allocate_id();
                self.field.spawn_snake(x, y, id);
                let mut player = Player::new(id, player_name, from, Role::Normal);
                player.player_type = player_type;
                self.roster.insert(player);
                self.ack(msg, from, id, transport);
                self.send_state_to(id, from, transport);
                info!(id, "joined as NORMAL");
                if self.roster.deputy().is_none() {
                    self.assign_new_deputy(transport);
                }
            }
            Err(NoSpace) => {
                let err_msg = Message {
                    msg_seq: msg.msg_seq,
                    sender_id: self.roster.local().id,
                    receiver_id: msg.sender_id,
                    body: MessageBody::Error {
                        error_message: "no space available on the field".into(),
                    },
                };
                self.send_fire_and_forget(&err_msg, from, transport);
                warn!("rejected join: no space for a new snake");
            }
        }
    }

    fn handle_error(&mut self, msg: &Message, error_message: &str, from: SocketAddr, transport: &Transport) {
        error!(%error_message, "received error from peer");
        self.ack(msg, from, msg.sender_id, transport);
    }

    fn handle_discover(&mut self, from: SocketAddr, transport: &Transport) {
        let announcement = self.build_announcement();
        let msg = self.build_message(-1, MessageBody::Announcement { games: vec![announcement] });
        self.send_fire_and_forget(&msg, from, transport);
    }

    /// Every legal transition acks exactly once; an unrecognized
    /// (sender_role, receiver_role, local_role) triple is reported without
    /// ever sending an ack.
    fn handle_role_change(
        &mut self,
        msg: &Message,
        rc: RoleChange,
        from: SocketAddr,
        now: Instant,
        transport: &Transport,
    ) -> Result<(), CoreError> {
        let local_role = self.roster.local().role;
        match (rc.sender_role, rc.receiver_role, local_role) {
            // The master just told us our own snake died; become a spectator.
            (Role::Master, Role::Viewer, _) => {
                self.roster.local_mut().role = Role::Viewer;
                self.ack(msg, from, msg.sender_id, transport);
            }
            // The master is handing authority to us, its deputy.
            (Role::Master, Role::Master, Role::Deputy) => {
                self.ack(msg, from, msg.sender_id, transport);
                if let Some(old_master) = self.roster.master() {
                    let id = old_master.id;
                    if let Some(p) = self.roster.get_mut(id) {
                        p.role = Role::Viewer;
                    }
                }
                self.become_master(now, transport);
            }
            // A player is asking to step down to VIEWER (we are MASTER).
            (Role::Viewer, Role::Master, Role::Master) => match self.roster.get_mut(msg.sender_id) {
                Some(p) => {
                    p.role = Role::Viewer;
                    self.field.zombify(msg.sender_id);
                    self.ack(msg, from, msg.sender_id, transport);
                }
                None => warn!(sender = msg.sender_id, "role_change from unknown player"),
            },
            // The master promoted us to deputy.
            (Role::Master, Role::Deputy, Role::Normal) => {
                self.roster.local_mut().role = Role::Deputy;
                self.ack(msg, from, msg.sender_id, transport);
            }
            // A new master is announcing itself to an existing NORMAL peer.
            (Role::Master, Role::Normal, Role::Normal) => match self.roster.get_mut(msg.sender_id) {
                Some(p) => {
                    p.role = Role::Master;
                    self.ack(msg, from, msg.sender_id, transport);
                }
                None => warn!(sender = msg.sender_id, "role_change from unknown player"),
            },
            _ => return Err(CoreError::UnsupportedRoleChange(rc)),
        }
        Ok(())
    }

    // --- role transitions --------------------------------------------------

    fn become_master(&mut self, now: Instant, transport: &Transport) {
        info!("becoming MASTER");
        self.roster.local_mut().role = Role::Master;
        if let Some(id) = self.roster.pick_normal() {
            if let Some(p) = self.roster.get_mut(id) {
                p.role = Role::Deputy;
            }
        } else {
            debug!("no NORMAL player available to promote to DEPUTY");
        }
        let local_id = self.roster.local().id;
        let targets: Vec<(i32, SocketAddr, Role)> = self
            .roster
            .iter()
            .filter(|p| p.id != local_id)
            .map(|p| (p.id, p.address, p.role))
            .collect();
        for (id, addr, role) in targets {
            let msg = self.build_message(
                id,
                MessageBody::RoleChange(RoleChange {
                    sender_role: Role::Master,
                    receiver_role: role,
                }),
            );
            self.send_fire_and_forget(&msg, addr, transport);
        }
        self.timer.set_enabled(TaskKind::TickBroadcast, true, now);
        self.timer.set_enabled(TaskKind::Announce, true, now);
    }

    fn become_viewer(&mut self, now: Instant, transport: &Transport) {
        let local_role = self.roster.local().role;
        if local_role == Role::Viewer {
            return;
        }
        match local_role {
            Role::Master => {
                self.timer.set_enabled(TaskKind::TickBroadcast, false, now);
                self.timer.set_enabled(TaskKind::Announce, false, now);
                self.roster.local_mut().role = Role::Viewer;
                if let Some(deputy) = self.roster.deputy() {
                    let (id, addr) = (deputy.id, deputy.address);
                    let msg = self.build_message(
                        id,
                        MessageBody::RoleChange(RoleChange {
                            sender_role: Role::Master,
                            receiver_role: Role::Master,
                        }),
                    );
                    self.send_expect_ack(msg, addr, transport);
                }
            }
            _ => {
                if let Some(master) = self.roster.master() {
                    let (id, addr) = (master.id, master.address);
                    let msg = self.build_message(
                        id,
                        MessageBody::RoleChange(RoleChange {
                            sender_role: Role::Viewer,
                            receiver_role: Role::Master,
                        }),
                    );
                    self.send_expect_ack(msg, addr, transport);
                } else {
                    warn!("no MASTER known, cannot request to become VIEWER");
                }
            }
        }
    }

    fn assign_new_deputy(&mut self, transport: &Transport) {
        match self.roster.pick_normal() {
            Some(id) => {
                let addr = match self.roster.get_mut(id) {
                    Some(p) => {
                        p.role = Role::Deputy;
                        p.address
                    }
                    None => return,
                };
                let msg = self.build_message(
                    id,
                    MessageBody::RoleChange(RoleChange {
                        sender_role: Role::Master,
                        receiver_role: Role::Deputy,
                    }),
                );
                self.send_fire_and_forget(&msg, addr, transport);
            }
            None => debug!("no NORMAL player available to promote to DEPUTY"),
        }
    }

    fn switch_to_new_master(&mut self) {
        match self.roster.deputy() {
            Some(d) => {
                let id = d.id;
                if let Some(p) = self.roster.get_mut(id) {
                    p.role = Role::Master;
                }
            }
            None => warn!("no DEPUTY known, cannot switch to a new master"),
        }
    }

    // --- periodic tasks ------------------------------------------------

    fn run_tick_broadcast(&mut self, now: Instant, transport: &Transport) {
        let events = self.field.tick();
        let local_id = self.roster.local().id;
        let mut host_died = false;
        for (player_id, event) in events {
            match event {
                Event::Score => {
                    if let Some(p) = self.roster.get_mut(player_id) {
                        p.score += 1;
                    }
                }
                Event::Death => {
                    if player_id == local_id {
                        host_died = true;
                        continue;
                    }
                    if let Some(p) = self.roster.get_mut(player_id) {
                        p.role = Role::Viewer;
                        let addr = p.address;
                        let msg = self.build_message(
                            player_id,
                            MessageBody::RoleChange(RoleChange {
                                sender_role: Role::Master,
                                receiver_role: Role::Viewer,
                            }),
                        );
                        self.send_expect_ack(msg, addr, transport);
                    }
                }
            }
        }
        self.repaint_pending = true;
        self.broadcast_state(transport);
        if host_died {
            self.become_viewer(now, transport);
        }
    }

    fn run_ping(&mut self, now: Instant, transport: &Transport) {
        let local_id = self.roster.local().id;
        let ping_after = Duration::from_millis(self.state_delay_ms as u64 / 10);
        let evict_after = Duration::from_millis((self.state_delay_ms as f64 * 0.8) as u64);

        let mut to_ping = Vec::new();
        let mut to_evict = Vec::new();
        for p in self.roster.iter() {
            if p.id == local_id {
                continue;
            }
            if now.saturating_duration_since(p.last_send) > ping_after {
                to_ping.push((p.id, p.address));
            }
            if now.saturating_duration_since(p.last_recv) > evict_after {
                to_evict.push((p.id, p.role));
            }
        }

        for (id, addr) in to_ping {
            let msg = self.build_message(id, MessageBody::Ping);
            self.send_fire_and_forget(&msg, addr, transport);
            if let Some(p) = self.roster.get_mut(id) {
                p.last_send = now;
            }
        }

        for (id, evicted_role) in to_evict {
            warn!(id, role = %evicted_role, "peer unresponsive, evicting");
            self.roster.remove(id);
            self.field.zombify(id);
            let local_role = self.roster.local().role;
            match (local_role, evicted_role) {
                (Role::Normal, Role::Master) => {
                    info!("MASTER is gone, switching to DEPUTY");
                    self.switch_to_new_master();
                }
                (Role::Master, Role::Deputy) => {
                    info!("DEPUTY is gone, assigning a new one");
                    self.assign_new_deputy(transport);
                }
                (Role::Deputy, Role::Master) => {
                    info!("MASTER is gone, becoming the new MASTER");
                    self.become_master(now, transport);
                }
                _ => {}
            }
        }
    }

    fn run_retry_acks(&mut self, transport: &Transport) {
        let addr = match self.roster.master() {
            Some(m) => m.address,
            None => return,
        };
        let pending: Vec<Message> = self.pending_acks.values().cloned().collect();
        for msg in pending {
            self.send_fire_and_forget(&msg, addr, transport);
        }
    }

    fn run_announce(&mut self, transport: &Transport) {
        let announcement = self.build_announcement();
        let msg = self.build_message(-1, MessageBody::Announcement { games: vec![announcement] });
        if let Err(e) = transport.send_multicast(&msg) {
            warn!(%e, "failed to send announcement");
        }
    }

    // --- helpers -----------------------------------------------------------

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_player_id;
        self.next_player_id += 1;
        id
    }

    fn adopt_assigned_id(&mut self, id: i32) {
        if let Some(mut me) = self.roster.remove(PENDING_ID) {
            me.id = id;
            self.roster.insert(me);
            self.next_player_id = id + 1;
            info!(id, "assigned player id");
        }
    }

    fn build_message(&mut self, receiver_id: i32, body: MessageBody) -> Message {
        let msg_seq = self.next_seq;
        self.next_seq += 1;
        Message {
            msg_seq,
            sender_id: self.roster.local().id,
            receiver_id,
            body,
        }
    }

    fn ack(&mut self, original: &Message, to: SocketAddr, receiver_id: i32, transport: &Transport) {
        let local_id = self.roster.local().id;
        let msg = Message {
            msg_seq: original.msg_seq,
            sender_id: local_id,
            receiver_id,
            body: MessageBody::Ack,
        };
        self.send_fire_and_forget(&msg, to, transport);
    }

    fn send_expect_ack(&mut self, msg: Message, addr: SocketAddr, transport: &Transport) {
        self.pending_acks.insert(msg.msg_seq, msg.clone());
        self.send_fire_and_forget(&msg, addr, transport);
    }

    fn send_fire_and_forget(&self, msg: &Message, addr: SocketAddr, transport: &Transport) {
        if let Err(e) = transport.send_unicast(msg, addr) {
            warn!(%e, "failed to send message");
        }
    }

    fn broadcast_state(&mut self, transport: &Transport) {
        self.state_order += 1;
        let (players, foods, snakes) = self.snapshot_payload();
        let local_id = self.roster.local().id;
        let targets: Vec<(i32, SocketAddr)> = self
            .roster
            .iter()
            .filter(|p| p.id != local_id)
            .map(|p| (p.id, p.address))
            .collect();
        for (id, addr) in targets {
            let msg = self.build_message(
                id,
                MessageBody::State {
                    state_order: self.state_order,
                    players: players.clone(),
                    foods: foods.clone(),
                    snakes: snakes.clone(),
                },
            );
            self.send_fire_and_forget(&msg, addr, transport);
        }
    }

    fn send_state_to(&mut self, player_id: i32, addr: SocketAddr, transport: &Transport) {
        self.state_order += 1;
        let (players, foods, snakes) = self.snapshot_payload();
        let msg = self.build_message(
            player_id,
            MessageBody::State {
                state_order: self.state_order,
                players,
                foods,
                snakes,
            },
        );
        self.send_fire_and_forget(&msg, addr, transport);
    }

    fn snapshot_payload(&self) -> (Vec<WirePlayer>, Vec<(i32, i32)>, Vec<crate::proto::WireSnake>) {
        let players = self.roster.to_wire();
        let foods = self.field.food_to_wire();
        let snakes = self.field.snakes().map(|s| self.field.snake_to_wire(s)).collect();
        (players, foods, snakes)
    }

    fn build_announcement(&self) -> GameAnnouncement {
        GameAnnouncement {
            game_name: self.game_name.clone(),
            can_join: self.field.request_pos_for_new_snake().is_ok(),
            config: GameConfig {
                width: self.field.width,
                height: self.field.height,
                food_static: self.field.food_static,
                state_delay_ms: self.state_delay_ms,
            },
            players: self.roster.to_wire(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port))
    }

    fn config() -> GameConfig {
        GameConfig {
            width: 10,
            height: 10,
            food_static: 1,
            state_delay_ms: 1000,
        }
    }

    fn loopback_transport() -> Transport {
        Transport::bind().expect("bind a transport on an ephemeral port")
    }

    #[test]
    fn host_boot_has_one_master_player_and_one_snake() {
        let transport = loopback_transport();
        let now = Instant::now();
        let engine = Engine::host("alice", "arena", config(), addr(9000), now, &transport);
        assert_eq!(engine.roster.len(), 1);
        assert_eq!(engine.roster.local().role, Role::Master);
        assert_eq!(engine.field.snake_count(), 1);
    }

    #[test]
    fn join_keeps_pending_id_until_ack() {
        let now = Instant::now();
        let host_wire = WirePlayer {
            id: 0,
            name: "alice".into(),
            address: addr(9000),
            role: Role::Master,
            score: 0,
            player_type: PlayerType::Human,
        };
        let (engine, join_msg) = Engine::join(
            "bob",
            "arena",
            config(),
            Role::Normal,
            addr(9001),
            &[host_wire],
            now,
        );
        assert_eq!(engine.roster.local().id, PENDING_ID);
        assert!(matches!(join_msg.body, MessageBody::Join { .. }));
        assert_eq!(join_msg.sender_id, PENDING_ID);
    }

    #[test]
    fn ack_with_new_id_is_adopted_once() {
        let now = Instant::now();
        let host_wire = WirePlayer {
            id: 0,
            name: "alice".into(),
            address: addr(9000),
            role: Role::Master,
            score: 0,
            player_type: PlayerType::Human,
        };
        let (mut engine, join_msg) = Engine::join(
            "bob",
            "arena",
            config(),
            Role::Normal,
            addr(9001),
            &[host_wire],
            now,
        );
        let ack = Message {
            msg_seq: join_msg.msg_seq,
            sender_id: 0,
            receiver_id: 3,
            body: MessageBody::Ack,
        };
        engine.handle_ack(&ack);
        assert_eq!(engine.roster.local().id, 3);
        // A second ack must not reassign the id.
        let second_ack = Message {
            msg_seq: join_msg.msg_seq,
            sender_id: 0,
            receiver_id: 99,
            body: MessageBody::Ack,
        };
        engine.handle_ack(&second_ack);
        assert_eq!(engine.roster.local().id, 3);
    }

    #[test]
    fn deputy_becomes_master_on_master_eviction() {
        let transport = loopback_transport();
        let now = Instant::now();
        let mut engine = Engine::host("alice", "arena", config(), addr(9000), now, &transport);
        let mut bob = Player::new(1, "bob", addr(9001), Role::Deputy);
        bob.last_recv = now;
        engine.roster.insert(bob);
        // alice is MASTER here; simulate bob's perspective instead by
        // relabeling roles so the eviction branch under test is exercised.
        engine.roster.local_mut().role = Role::Deputy;
        if let Some(p) = engine.roster.get_mut(1) {
            p.role = Role::Master;
        }
        let stale = now - Duration::from_secs(10);
        if let Some(p) = engine.roster.get_mut(1) {
            p.last_recv = stale;
        }
        let later = now + Duration::from_millis(900);
        engine.run_ping(later, &transport);
        assert_eq!(engine.roster.local().role, Role::Master);
    }

    #[test]
    fn unsupported_role_change_is_rejected() {
        let transport = loopback_transport();
        let now = Instant::now();
        let mut engine = Engine::host("alice", "arena", config(), addr(9000), now, &transport);
        let bogus = Message {
            msg_seq: 1,
            sender_id: 0,
            receiver_id: 0,
            body: MessageBody::RoleChange(RoleChange {
                sender_role: Role::Normal,
                receiver_role: Role::Normal,
            }),
        };
        let rc = RoleChange {
            sender_role: Role::Normal,
            receiver_role: Role::Normal,
        };
        let result = engine.handle_role_change(&bogus, rc, addr(9000), now, &transport);
        assert!(result.is_err());
    }
}
