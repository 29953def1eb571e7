//! Cross-module end-to-end scenarios that need the engine, the transport,
//! and real loopback sockets wired together, not just a single unit's
//! state mutated by hand.

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::{Duration, Instant};

use snakenet::engine::Engine;
use snakenet::player::PENDING_ID;
use snakenet::proto::{self, Direction, GameConfig, Role};
use snakenet::transport::Transport;

fn loopback(transport: &Transport) -> SocketAddr {
    SocketAddr::new(Ipv4Addr::LOCALHOST.into(), transport.local_port())
}

fn config() -> GameConfig {
    GameConfig {
        width: 20,
        height: 20,
        food_static: 2,
        state_delay_ms: 200,
    }
}

/// Runs due periodic tasks, then delivers whatever arrived on `transport`
/// into `engine` — one iteration of the same loop `bin/snakenet.rs` runs.
fn step(engine: &mut Engine, transport: &mut Transport) {
    let queue: Rc<RefCell<Vec<(SocketAddr, Vec<u8>)>>> = Rc::new(RefCell::new(Vec::new()));
    let queue_handle = queue.clone();
    transport.subscribe(move |from, payload| {
        queue_handle.borrow_mut().push((from, payload.to_vec()));
    });
    transport.poll();
    let drained: Vec<(SocketAddr, Vec<u8>)> = queue.borrow_mut().drain(..).collect();
    transport.unsubscribe_all();

    let now = Instant::now();
    engine.run_due_tasks(now, transport);
    for (from, payload) in drained {
        engine.handle_datagram(from, &payload, now, transport);
    }
}

fn run_until(deadline: Instant, mut body: impl FnMut() -> bool) -> bool {
    while Instant::now() < deadline {
        if body() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn join_round_trip_assigns_id_and_spawns_a_snake() {
    let mut host_transport = Transport::bind().expect("bind host transport");
    let mut joiner_transport = Transport::bind().expect("bind joiner transport");
    let host_addr = loopback(&host_transport);
    let joiner_addr = loopback(&joiner_transport);

    let now = Instant::now();
    let mut host = Engine::host("alice", "arena", config(), host_addr, now, &host_transport);

    let host_wire = host.roster.to_wire();
    let (mut joiner, join_msg) = Engine::join(
        "bob",
        "arena",
        config(),
        Role::Normal,
        joiner_addr,
        &host_wire,
        now,
    );
    joiner_transport
        .send_unicast(&join_msg, host_addr)
        .expect("send join");

    let deadline = Instant::now() + Duration::from_secs(2);
    run_until(deadline, || {
        step(&mut host, &mut host_transport);
        step(&mut joiner, &mut joiner_transport);
        joiner.roster.local().id != PENDING_ID
    });

    assert_ne!(joiner.roster.local().id, PENDING_ID);
    assert_eq!(host.roster.len(), 2);
    assert_eq!(joiner.roster.len(), 2);
    let joined_id = joiner.roster.local().id;
    assert!(host.field.snake(joined_id).is_some());
}

#[test]
fn steer_round_trip_turns_the_remote_snake() {
    let mut host_transport = Transport::bind().expect("bind host transport");
    let mut joiner_transport = Transport::bind().expect("bind joiner transport");
    let host_addr = loopback(&host_transport);
    let joiner_addr = loopback(&joiner_transport);

    let now = Instant::now();
    let mut host = Engine::host("alice", "arena", config(), host_addr, now, &host_transport);
    let host_wire = host.roster.to_wire();
    let (mut joiner, join_msg) = Engine::join(
        "bob",
        "arena",
        config(),
        Role::Normal,
        joiner_addr,
        &host_wire,
        now,
    );
    joiner_transport
        .send_unicast(&join_msg, host_addr)
        .expect("send join");

    let joined = run_until(Instant::now() + Duration::from_secs(2), || {
        step(&mut host, &mut host_transport);
        step(&mut joiner, &mut joiner_transport);
        joiner.roster.local().id != PENDING_ID
    });
    assert!(joined, "join never completed");
    let joined_id = joiner.roster.local().id;

    let heading_before = host.field.snake(joined_id).unwrap().heading;
    let turn_target = match heading_before {
        Direction::Up | Direction::Down => Direction::Left,
        Direction::Left | Direction::Right => Direction::Up,
    };
    assert!(!turn_target.is_opposite(heading_before));

    joiner.submit_steer(turn_target, &joiner_transport);

    let turned = run_until(Instant::now() + Duration::from_secs(2), || {
        step(&mut host, &mut host_transport);
        step(&mut joiner, &mut joiner_transport);
        host.field.snake(joined_id).map(|s| s.heading) == Some(turn_target)
    });
    assert!(turned, "host's copy of the remote snake never adopted the steered heading");
}

#[test]
fn decode_rejects_garbage() {
    let garbage = vec![0u8, 1, 2];
    assert!(proto::decode(&garbage).is_err());
}
