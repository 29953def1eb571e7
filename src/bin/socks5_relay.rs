//! Standalone SOCKS5 CONNECT relay (§6's "SOCKS5 CLI"). One positional
//! argument: the TCP port to listen on, default 5245. Binds
//! `0.0.0.0:<port>` and polls the relay's readiness loop until interrupted.

use clap::Parser;
use tracing::info;

use snakenet::socks5::{Socks5Server, IDLE_POLL_INTERVAL};

#[derive(Parser)]
#[command(name = "socks5-relay", about = "A minimal SOCKS5 CONNECT relay")]
struct Cli {
    /// TCP port to listen on.
    #[arg(default_value_t = 5245)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut server = Socks5Server::bind(cli.port)?;
    info!(port = cli.port, "socks5-relay ready");

    loop {
        server.poll();
        std::thread::sleep(IDLE_POLL_INTERVAL);
    }
}
