//! UDP multicast wrapper for the market-data streams.
//!
//! The publisher and snapshot synthesizer send on multicast groups; the
//! consumer joins the incremental group permanently and the snapshot group
//! only while recovering. Receive uses a pre-allocated buffer; sends are
//! non-blocking datagram writes, lossy by protocol design.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Receive buffer size (64 KiB).
const BUFFER_SIZE: usize = 65536;

fn parse_ipv4(addr: &str, what: &str) -> io::Result<Ipv4Addr> {
    addr.parse().map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {} address", what))
    })
}

/// A UDP socket configured for multicast send or receive.
pub struct MulticastSocket {
    socket: Socket,
    recv_buffer: Box<[u8]>,
}

impl MulticastSocket {
    fn from_socket(socket: Socket) -> Self {
        Self { socket, recv_buffer: vec![0u8; BUFFER_SIZE].into_boxed_slice() }
    }

    /// Creates a publishing socket: outgoing interface and TTL configured,
    /// loopback disabled, non-blocking.
    pub fn sender(interface: &str, ttl: u32) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_multicast_loop_v4(false)?;
        socket.set_multicast_ttl_v4(ttl)?;
        socket.set_multicast_if_v4(&parse_ipv4(interface, "interface")?)?;
        socket.set_nonblocking(true)?;
        Ok(Self::from_socket(socket))
    }

    /// Creates a receiving socket bound to `port` and joined to the group
    /// `addr` on `interface`. Non-blocking.
    pub fn join_group(addr: &str, port: u16, interface: &str) -> io::Result<Self> {
        let group = parse_ipv4(addr, "multicast group")?;
        if !group.is_multicast() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "address is not multicast"));
        }
        let interface_addr = parse_ipv4(interface, "interface")?;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(target_os = "linux")]
        socket.set_reuse_port(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket.bind(&SocketAddr::V4(bind_addr).into())?;
        socket.join_multicast_v4(&group, &interface_addr)?;
        socket.set_nonblocking(true)?;

        Ok(Self::from_socket(socket))
    }

    /// Leaves the group `addr` on `interface`, stopping delivery.
    pub fn leave_group(&self, addr: &str, interface: &str) -> io::Result<()> {
        let group = parse_ipv4(addr, "multicast group")?;
        let interface_addr = parse_ipv4(interface, "interface")?;
        self.socket.leave_multicast_v4(&group, &interface_addr)
    }

    /// Sends one datagram to `addr:port`.
    pub fn send_to(&self, data: &[u8], addr: &str, port: u16) -> io::Result<usize> {
        let dest = parse_ipv4(addr, "destination")?;
        let socket_addr = SocketAddr::V4(SocketAddrV4::new(dest, port));
        self.socket.send_to(data, &socket_addr.into())
    }

    /// Non-blocking receive of one datagram.
    pub fn try_recv(&mut self) -> io::Result<Option<&[u8]>> {
        match (&self.socket).read(&mut self.recv_buffer) {
            Ok(n) => Ok(Some(&self.recv_buffer[..n])),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}
