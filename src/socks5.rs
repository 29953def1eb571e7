//! A minimal SOCKS5 CONNECT relay: one readiness loop, nonblocking
//! sockets, a four-phase per-client state machine. No threads — same
//! cooperative-loop discipline as `transport.rs`'s UDP polling.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::CoreError;

const RELAY_CHUNK: usize = 4096;
const SOCKS_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

#[derive(Debug, PartialEq, Eq)]
enum Phase {
    Greeting,
    ConnectionRequest,
    Active,
}

struct Client {
    conn: TcpStream,
    target: Option<TcpStream>,
    phase: Phase,
    inbuf: Vec<u8>,
    done: bool,
}

impl Client {
    fn new(conn: TcpStream) -> Self {
        Client {
            conn,
            target: None,
            phase: Phase::Greeting,
            inbuf: Vec::new(),
            done: false,
        }
    }
}

/// Owns the listening socket and every in-flight client/target pair.
/// `poll()` is meant to be called in a tight loop (or after a short sleep);
/// it never blocks.
pub struct Socks5Server {
    listener: TcpListener,
    clients: HashMap<usize, Client>,
    next_id: usize,
}

impl Socks5Server {
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        listener.set_nonblocking(true)?;
        info!(port, "SOCKS5 relay listening");
        Ok(Socks5Server {
            listener,
            clients: HashMap::new(),
            next_id: 0,
        })
    }

    /// Accepts at most one new connection, services every readable client
    /// or target socket once, then prunes finished clients. Never blocks.
    pub fn poll(&mut self) {
        self.accept_one();

        let ids: Vec<usize> = self.clients.keys().copied().collect();
        for id in ids {
            self.service(id);
        }

        self.clients.retain(|_, c| !c.done);
    }

    fn accept_one(&mut self) {
        match self.listener.accept() {
            Ok((conn, addr)) => {
                if let Err(e) = conn.set_nonblocking(true) {
                    warn!(%addr, %e, "failed to set client socket nonblocking");
                    return;
                }
                debug!(%addr, "accepted SOCKS5 client");
                let id = self.next_id;
                self.next_id += 1;
                self.clients.insert(id, Client::new(conn));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(%e, "accept failed"),
        }
    }

    fn service(&mut self, id: usize) {
        let finished = {
            let client = match self.clients.get_mut(&id) {
                Some(c) => c,
                None => return,
            };
            match client.phase {
                Phase::Greeting => Self::drive_greeting(client),
                Phase::ConnectionRequest => Self::drive_connection_request(client),
                Phase::Active => Self::drive_relay(client),
            }
        };
        if finished {
            if let Some(client) = self.clients.get_mut(&id) {
                client.done = true;
            }
        }
    }

    /// Returns `true` if the client is finished (closed or protocol error).
    fn drive_greeting(client: &mut Client) -> bool {
        if read_into(&mut client.conn, &mut client.inbuf).is_err() {
            return true;
        }
        if client.inbuf.len() < 2 {
            return false;
        }
        if client.inbuf[0] != SOCKS_VERSION {
            warn!(version = client.inbuf[0], "unsupported SOCKS version");
            return true;
        }
        let method_count = client.inbuf[1] as usize;
        if client.inbuf.len() < 2 + method_count {
            return false;
        }
        let methods = &client.inbuf[2..2 + method_count];
        let no_auth_offered = methods.contains(&0x00);
        let reply: [u8; 2] = if no_auth_offered { [0x05, 0x00] } else { [0x05, 0xFF] };
        let ok = write_all(&mut client.conn, &reply).is_ok();
        client.inbuf.drain(..2 + method_count);
        if !no_auth_offered || !ok {
            return true;
        }
        client.phase = Phase::ConnectionRequest;
        false
    }

    fn drive_connection_request(client: &mut Client) -> bool {
        if read_into(&mut client.conn, &mut client.inbuf).is_err() {
            return true;
        }
        match parse_connection_request(&client.inbuf) {
            Ok(Some((consumed, dest))) => {
                client.inbuf.drain(..consumed);
                match connect_to(&dest) {
                    Ok((target, bound)) => {
                        if write_connect_reply(&mut client.conn, 0x00, bound).is_err() {
                            return true;
                        }
                        if let Err(e) = target.set_nonblocking(true) {
                            warn!(%e, "failed to set target socket nonblocking");
                            return true;
                        }
                        client.target = Some(target);
                        client.phase = Phase::Active;
                        false
                    }
                    Err(e) => {
                        debug!(%e, ?dest, "SOCKS5 CONNECT failed");
                        let unspecified = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
                        let _ = write_connect_reply(&mut client.conn, 0x01, unspecified);
                        true
                    }
                }
            }
            Ok(None) => false,
            Err(e) => {
                warn!(%e, "malformed CONNECT request");
                // Best-effort RFC-shaped error reply per unsupported command.
                let _ = client.conn.write_all(&[0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
                true
            }
        }
    }

    fn drive_relay(client: &mut Client) -> bool {
        let mut buf = [0u8; RELAY_CHUNK];
        let target = match client.target.as_mut() {
            Some(t) => t,
            None => return true,
        };

        match pump(&mut client.conn, target, &mut buf) {
            Ok(done) if done => return true,
            Ok(_) => {}
            Err(_) => return true,
        }
        match pump(target, &mut client.conn, &mut buf) {
            Ok(done) => done,
            Err(_) => true,
        }
    }
}

/// Copies whatever is currently available from `from` to `to`, in chunks of
/// up to `buf.len()`. Returns `Ok(true)` on a clean EOF (the pair should be
/// torn down); `WouldBlock` is not an error here, just "nothing to copy
/// right now".
fn pump(from: &mut TcpStream, to: &mut TcpStream, buf: &mut [u8]) -> io::Result<bool> {
    loop {
        match from.read(buf) {
            Ok(0) => return Ok(true),
            Ok(n) => to.write_all(&buf[..n])?,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}

fn read_into(stream: &mut TcpStream, buf: &mut Vec<u8>) -> io::Result<()> {
    let mut chunk = [0u8; 512];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client closed")),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    stream.write_all(bytes)
}

enum Destination {
    Ip(IpAddr),
    Domain(String),
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Ip(ip) => write!(f, "{ip}"),
            Destination::Domain(d) => write!(f, "{d}"),
        }
    }
}

/// Parses a CONNECT request out of `buf`. Returns `Ok(None)` if more bytes
/// are needed. `Err` only for a malformed/unsupported request (wrong
/// version, non-CONNECT command, unknown address type).
fn parse_connection_request(buf: &[u8]) -> Result<Option<(usize, (Destination, u16))>, CoreError> {
    if buf.len() < 5 {
        return Ok(None);
    }
    if buf[0] != SOCKS_VERSION {
        return Err(CoreError::ProtocolViolation(format!("bad version byte {}", buf[0])));
    }
    if buf[1] != CMD_CONNECT {
        return Err(CoreError::ProtocolViolation(format!("unsupported command {}", buf[1])));
    }
    // buf[2] is reserved.
    let atyp = buf[3];
    match atyp {
        ATYP_IPV4 => {
            if buf.len() < 4 + 4 + 2 {
                return Ok(None);
            }
            let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
            let port = u16::from_be_bytes([buf[8], buf[9]]);
            Ok(Some((10, (Destination::Ip(IpAddr::V4(ip)), port))))
        }
        ATYP_IPV6 => {
            if buf.len() < 4 + 16 + 2 {
                return Ok(None);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[4..20]);
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([buf[20], buf[21]]);
            Ok(Some((22, (Destination::Ip(IpAddr::V6(ip)), port))))
        }
        ATYP_DOMAIN => {
            if buf.len() < 5 {
                return Ok(None);
            }
            let len = buf[4] as usize;
            if buf.len() < 5 + len + 2 {
                return Ok(None);
            }
            let name = String::from_utf8_lossy(&buf[5..5 + len]).into_owned();
            let port = u16::from_be_bytes([buf[5 + len], buf[5 + len + 1]]);
            Ok(Some((5 + len + 2, (Destination::Domain(name), port))))
        }
        other => Err(CoreError::ProtocolViolation(format!("unsupported address type {other}"))),
    }
}

fn connect_to((dest, port): &(Destination, u16)) -> io::Result<(TcpStream, SocketAddr)> {
    let stream = match dest {
        Destination::Ip(ip) => TcpStream::connect(SocketAddr::new(*ip, *port))?,
        Destination::Domain(name) => {
            // Domain names are resolved synchronously; the relay's single
            // readiness loop blocks for the duration of the lookup.
            let mut addrs = (name.as_str(), *port).to_socket_addrs()?;
            let addr = addrs.next().ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address for domain"))?;
            TcpStream::connect(addr)?
        }
    };
    let bound = stream.local_addr()?;
    Ok((stream, bound))
}

fn write_connect_reply(stream: &mut TcpStream, reply_code: u8, bound: SocketAddr) -> io::Result<()> {
    let mut reply = vec![SOCKS_VERSION, reply_code, 0x00];
    match bound {
        SocketAddr::V4(v4) => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&v4.ip().octets());
            reply.extend_from_slice(&v4.port().to_be_bytes());
        }
        SocketAddr::V6(v6) => {
            reply.push(ATYP_IPV6);
            reply.extend_from_slice(&v6.ip().octets());
            reply.extend_from_slice(&v6.port().to_be_bytes());
        }
    }
    stream.write_all(&reply)
}

/// How long the binary's event loop should sleep between polls when
/// nothing is happening.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_connect_request() {
        let mut buf = vec![0x05, 0x01, 0x00, 0x01];
        buf.extend_from_slice(&[127, 0, 0, 1]);
        buf.extend_from_slice(&80u16.to_be_bytes());
        let (consumed, (dest, port)) = parse_connection_request(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(port, 80);
        match dest {
            Destination::Ip(IpAddr::V4(ip)) => assert_eq!(ip, Ipv4Addr::new(127, 0, 0, 1)),
            other => panic!("expected IPv4, got {other:?}"),
        }
    }

    #[test]
    fn parses_domain_connect_request() {
        let name = b"example.com";
        let mut buf = vec![0x05, 0x01, 0x00, 0x03, name.len() as u8];
        buf.extend_from_slice(name);
        buf.extend_from_slice(&443u16.to_be_bytes());
        let (consumed, (dest, port)) = parse_connection_request(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(port, 443);
        match dest {
            Destination::Domain(d) => assert_eq!(d, "example.com"),
            other => panic!("expected domain, got {other:?}"),
        }
    }

    #[test]
    fn incomplete_request_asks_for_more_bytes() {
        let buf = vec![0x05, 0x01, 0x00, 0x01, 127, 0];
        assert!(parse_connection_request(&buf).unwrap().is_none());
    }

    #[test]
    fn unsupported_command_is_rejected() {
        let buf = vec![0x05, 0x02, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        assert!(parse_connection_request(&buf).is_err());
    }

    #[test]
    fn unsupported_address_type_is_rejected() {
        let buf = vec![0x05, 0x01, 0x00, 0x02, 0, 0, 0, 0, 0, 0];
        assert!(parse_connection_request(&buf).is_err());
    }
}
