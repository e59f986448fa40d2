//! TCP socket wrappers for the order-entry path.
//!
//! Thin layers over `socket2` with pre-allocated receive buffers, so the
//! per-poll receive path performs no allocation. Sockets are switched to
//! non-blocking mode once at setup instead of per call.
//!
//! The order server additionally needs the kernel receive timestamp of each
//! segment for its FIFO sequencer; `enable_rx_timestamps` +
//! `try_recv_timestamped` read it from the `SO_TIMESTAMPNS` control message
//! on Linux and fall back to the process monotonic clock elsewhere.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};

use crate::time::{now_nanos, Nanos};

/// Receive buffer size per socket (64 KiB).
const BUFFER_SIZE: usize = 65536;

/// A connected TCP socket with a pre-allocated receive buffer.
#[derive(Debug)]
pub struct TcpSocket {
    socket: Socket,
    recv_buffer: Box<[u8]>,
}

impl TcpSocket {
    fn from_socket(socket: Socket) -> Self {
        Self { socket, recv_buffer: vec![0u8; BUFFER_SIZE].into_boxed_slice() }
    }

    /// Connects to `addr:port` with `TCP_NODELAY` set.
    pub fn connect(addr: &str, port: u16) -> io::Result<Self> {
        let socket_addr: SocketAddr = format!("{}:{}", addr, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;

        let domain = if socket_addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        socket.connect(&socket_addr.into())?;

        Ok(Self::from_socket(socket))
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking)
    }

    /// Requests kernel receive timestamps on this socket. No-op on platforms
    /// without `SO_TIMESTAMPNS`; `try_recv_timestamped` then stamps reads
    /// with the software clock.
    #[cfg(target_os = "linux")]
    pub fn enable_rx_timestamps(&self) -> io::Result<()> {
        use std::os::fd::AsRawFd;

        nix::sys::socket::setsockopt(
            self.socket.as_raw_fd(),
            nix::sys::socket::sockopt::ReceiveTimestampns,
            &true,
        )
        .map_err(|e| io::Error::from_raw_os_error(e as i32))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn enable_rx_timestamps(&self) -> io::Result<()> {
        Ok(())
    }

    /// Sends as much of `data` as the kernel accepts.
    pub fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.socket.send(data)
    }

    /// Non-blocking receive.
    ///
    /// - `Ok(Some(bytes))` - data received; an empty slice means the peer
    ///   closed the connection
    /// - `Ok(None)` - nothing available
    pub fn try_recv(&mut self) -> io::Result<Option<&[u8]>> {
        match (&self.socket).read(&mut self.recv_buffer) {
            Ok(n) => Ok(Some(&self.recv_buffer[..n])),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Non-blocking receive that also reports when the kernel accepted the
    /// data. Same return contract as [`try_recv`](Self::try_recv).
    #[cfg(target_os = "linux")]
    pub fn try_recv_timestamped(&mut self) -> io::Result<Option<(&[u8], Nanos)>> {
        use nix::errno::Errno;
        use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, SockaddrStorage};
        use std::io::IoSliceMut;
        use std::os::fd::AsRawFd;

        let fd = self.socket.as_raw_fd();
        let (bytes, rx_time) = {
            let mut iov = [IoSliceMut::new(&mut self.recv_buffer)];
            let mut cmsg_buf = nix::cmsg_space!(libc::timespec);

            match recvmsg::<SockaddrStorage>(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty()) {
                Ok(msg) => {
                    // Fall back to the software clock if the kernel did not
                    // attach a timestamp control message.
                    let mut rx_time = now_nanos();
                    for cmsg in msg.cmsgs() {
                        if let ControlMessageOwned::ScmTimestampns(ts) = cmsg {
                            rx_time = Nanos::from_parts(ts.tv_sec() as u64, ts.tv_nsec() as u64);
                        }
                    }
                    (msg.bytes, rx_time)
                }
                Err(e) if e == Errno::EAGAIN => return Ok(None),
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        };

        Ok(Some((&self.recv_buffer[..bytes], rx_time)))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn try_recv_timestamped(&mut self) -> io::Result<Option<(&[u8], Nanos)>> {
        let rx_time = now_nanos();
        Ok(self.try_recv()?.map(|bytes| (bytes, rx_time)))
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}

/// Listening socket for the order server.
pub struct TcpListener {
    listener: Socket,
}

impl TcpListener {
    /// Binds and listens on `addr:port` with `SO_REUSEADDR`.
    pub fn bind(addr: &str, port: u16) -> io::Result<Self> {
        let socket_addr: SocketAddr = format!("{}:{}", addr, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;

        let domain = if socket_addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let listener = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        listener.set_reuse_address(true)?;
        listener.bind(&socket_addr.into())?;
        listener.listen(128)?;

        Ok(Self { listener })
    }

    /// Accepts one pending connection with `TCP_NODELAY` set.
    pub fn accept(&self) -> io::Result<TcpSocket> {
        let (socket, _addr) = self.listener.accept()?;
        socket.set_nodelay(true)?;
        Ok(TcpSocket::from_socket(socket))
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.listener.set_nonblocking(nonblocking)
    }

    /// The locally bound port; useful when binding to port 0 in tests.
    pub fn local_port(&self) -> io::Result<u16> {
        let addr = self.listener.local_addr()?;
        addr.as_socket()
            .map(|a| a.port())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "non-inet local address"))
    }
}
