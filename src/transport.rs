//! A UDP endpoint backed by two sockets — a unicast socket bound to
//! an ephemeral port, and a multicast socket bound to the well-known
//! group/port. Delivery is best-effort and payload-blind; the transport
//! only moves bytes and addresses.
//!
//! `Transport` never holds a
//! reference back to whatever owns it. Subscribers are boxed closures; the
//! engine registers one that pushes into a queue *it* owns (see
//! `engine::Engine`), so `stop()`/drop can unsubscribe cleanly without
//! `Rc`/`RefCell` games between transport and engine.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::proto::{self, Message};

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);
pub const MULTICAST_PORT: u16 = 9192;
const MULTICAST_TTL: u32 = 100;

type Subscriber = Box<dyn FnMut(SocketAddr, &[u8])>;

/// The node's network endpoint. `poll()` must be called regularly from the
/// cooperative event loop; there are no background threads.
pub struct Transport {
    unicast: UdpSocket,
    multicast: UdpSocket,
    subscribers: Vec<Subscriber>,
    recv_buf: [u8; 65536],
}

impl Transport {
    /// Binds the unicast socket to an ephemeral port and the multicast
    /// socket to `0.0.0.0:9192`, joining the LAN discovery group with
    /// loopback enabled so multiple nodes on one host can see each
    /// other's announcements. The multicast socket is bound with
    /// `SO_REUSEADDR` (and `SO_REUSEPORT` on unix) — `ShareAddress +
    /// ReuseAddressHint` in spec terms — since `std::net::UdpSocket` has no
    /// way to set that before binding and several local nodes all bind the
    /// same group/port.
    pub fn bind() -> io::Result<Self> {
        let unicast = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        unicast.set_nonblocking(true)?;

        let multicast = bind_shared_multicast()?;
        multicast.set_multicast_loop_v4(true)?;
        multicast.set_multicast_ttl_v4(MULTICAST_TTL)?;
        multicast.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
        multicast.set_nonblocking(true)?;

        Ok(Transport {
            unicast,
            multicast,
            subscribers: Vec::new(),
            recv_buf: [0u8; 65536],
        })
    }

    pub fn local_port(&self) -> u16 {
        self.unicast
            .local_addr()
            .map(|a| a.port())
            .unwrap_or_default()
    }

    pub fn subscribe(&mut self, handler: impl FnMut(SocketAddr, &[u8]) + 'static) {
        self.subscribers.push(Box::new(handler));
    }

    pub fn unsubscribe_all(&mut self) {
        self.subscribers.clear();
    }

    /// Drains every pending datagram on both sockets, delivering each to
    /// every subscriber. Never blocks.
    pub fn poll(&mut self) {
        Self::drain(&self.unicast, &mut self.recv_buf, &mut self.subscribers);
        Self::drain(&self.multicast, &mut self.recv_buf, &mut self.subscribers);
    }

    fn drain(socket: &UdpSocket, buf: &mut [u8], subscribers: &mut [Subscriber]) {
        loop {
            match socket.recv_from(buf) {
                Ok((len, addr)) => {
                    for sub in subscribers.iter_mut() {
                        sub(addr, &buf[..len]);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("transport recv error: {e}");
                    break;
                }
            }
        }
    }

    pub fn send_unicast(&self, msg: &Message, addr: SocketAddr) -> Result<(), CoreError> {
        let bytes = proto::encode(msg);
        self.unicast
            .send_to(&bytes, addr)
            .map(|_| ())
            .map_err(|source| CoreError::Transport { addr, source })
    }

    pub fn send_multicast(&self, msg: &Message) -> Result<(), CoreError> {
        let bytes = proto::encode(msg);
        let addr = SocketAddr::from((MULTICAST_GROUP, MULTICAST_PORT));
        debug!(bytes = bytes.len(), "multicasting");
        self.unicast
            .send_to(&bytes, addr)
            .map(|_| ())
            .map_err(|source| CoreError::Transport { addr, source })
    }
}

/// Binds `0.0.0.0:9192` with address (and, on unix, port) reuse set before
/// bind, so multiple nodes on one host can all join the same multicast
/// group. `std::net::UdpSocket::bind` offers no hook for this, so the
/// socket is built and bound through `socket2` and handed back as a plain
/// `std::net::UdpSocket`.
fn bind_shared_multicast() -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, MULTICAST_PORT).into();
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// How long the cooperative loop should sleep between polls when nothing
/// else is due. Keeps the event loop from busy-spinning while still being
/// responsive; tasks themselves are driven by `TimerWheel`, not by this.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);
