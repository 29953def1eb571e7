//! Hosts or joins a peer-to-peer Snake game from the command line. There is
//! no windowing/rendering here (out of scope per the core's contract); this
//! binary drives the engine's event loop and prints roster/score changes
//! to the terminal as a stand-in for a real UI.

use std::cell::RefCell;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::rc::Rc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::info;

use snakenet::config::GameConfig;
use snakenet::engine::Engine;
use snakenet::proto::{self, GameAnnouncement, Message, MessageBody, Role};
use snakenet::transport::{Transport, IDLE_POLL_INTERVAL};

#[derive(Parser)]
#[command(name = "snakenet", about = "Host or join a peer-to-peer Snake game")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new game as its host.
    Host {
        game_name: String,
        #[arg(long, default_value = "player")]
        player_name: String,
        #[arg(long, default_value_t = 40)]
        width: u32,
        #[arg(long, default_value_t = 40)]
        height: u32,
        #[arg(long, default_value_t = 5)]
        food_static: u32,
        #[arg(long, default_value_t = 200)]
        state_delay_ms: u32,
    },
    /// Join a game already advertised by some host.
    Join {
        /// The host's unicast address, e.g. 192.168.1.10:51234.
        host: SocketAddr,
        #[arg(long, default_value = "player")]
        player_name: String,
        /// Join as a spectator instead of an active player.
        #[arg(long)]
        viewer: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut transport = Transport::bind()?;
    let local_addr = SocketAddr::new(detect_local_ip()?, transport.local_port());
    info!(%local_addr, "bound unicast socket");

    let now = Instant::now();
    let mut engine = match cli.command {
        Command::Host {
            game_name,
            player_name,
            width,
            height,
            food_static,
            state_delay_ms,
        } => {
            let config = GameConfig {
                game_name: game_name.clone(),
                width,
                height,
                food_static,
                state_delay_ms,
                player_name: player_name.clone(),
                requested_role: Role::Master,
            };
            info!(%game_name, width, height, "hosting");
            Engine::host(player_name, game_name, config.to_wire(), local_addr, now, &transport)
        }
        Command::Join {
            host,
            player_name,
            viewer,
        } => {
            let announcement = discover(&mut transport, host)?;
            info!(game_name = %announcement.game_name, "found game");
            let role = if viewer { Role::Viewer } else { Role::Normal };
            let (engine, join_msg) = Engine::join(
                player_name,
                announcement.game_name.clone(),
                announcement.config.clone(),
                role,
                local_addr,
                &announcement.players,
                now,
            );
            transport.send_unicast(&join_msg, host)?;
            engine
        }
    };

    run_event_loop(&mut engine, &mut transport)
}

/// Sends a `Discover` to `host` and blocks (polling the transport) until the
/// targeted `Announcement` reply arrives or five seconds pass.
fn discover(transport: &mut Transport, host: SocketAddr) -> anyhow::Result<GameAnnouncement> {
    let found: Rc<RefCell<Option<GameAnnouncement>>> = Rc::new(RefCell::new(None));
    let found_handle = found.clone();
    transport.subscribe(move |from, payload| {
        if from != host {
            return;
        }
        if let Ok(msg) = proto::decode(payload) {
            if let MessageBody::Announcement { mut games } = msg.body {
                if let Some(game) = games.pop() {
                    *found_handle.borrow_mut() = Some(game);
                }
            }
        }
    });

    let discover_msg = Message {
        msg_seq: 0,
        sender_id: -1,
        receiver_id: -1,
        body: MessageBody::Discover,
    };
    transport.send_unicast(&discover_msg, host)?;

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        transport.poll();
        if let Some(game) = found.borrow_mut().take() {
            transport.unsubscribe_all();
            return Ok(game);
        }
        if Instant::now() > deadline {
            anyhow::bail!("no response from {host} while discovering the game");
        }
        std::thread::sleep(IDLE_POLL_INTERVAL);
    }
}

fn run_event_loop(engine: &mut Engine, transport: &mut Transport) -> anyhow::Result<()> {
    let queue: Rc<RefCell<Vec<(SocketAddr, Vec<u8>)>>> = Rc::new(RefCell::new(Vec::new()));
    let queue_handle = queue.clone();
    transport.subscribe(move |from, payload| {
        queue_handle.borrow_mut().push((from, payload.to_vec()));
    });

    loop {
        transport.poll();
        let pending: Vec<(SocketAddr, Vec<u8>)> = queue.borrow_mut().drain(..).collect();
        let now = Instant::now();
        for (from, payload) in pending {
            engine.handle_datagram(from, &payload, now, transport);
        }
        engine.run_due_tasks(now, transport);
        if engine.take_repaint() {
            // No windowing/rendering in this binary; a real UI would repaint here.
        }
        std::thread::sleep(IDLE_POLL_INTERVAL);
    }
}

/// Opens a UDP socket "connected" to a public address purely to read back
/// which local interface the OS would route through — no packet is ever
/// sent. Falls back to loopback if the machine has no route at all.
fn detect_local_ip() -> io::Result<IpAddr> {
    let probe = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0))?;
    match probe.connect("8.8.8.8:80") {
        Ok(()) => Ok(probe.local_addr()?.ip()),
        Err(_) => Ok(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)),
    }
}
