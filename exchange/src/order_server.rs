// TCP order-entry gateway.
//
// One listener plus one persistent non-blocking connection per client. A
// connection is bound to the ClientId carried by its first valid frame;
// frames naming that ClientId on any other socket, or another ClientId on
// this socket, are dropped with a log. Inbound frames must arrive with
// consecutive per-client sequence numbers - the transport is TCP, so a gap
// is a client bug and the frame is dropped.
//
// Every accepted request is stamped with the kernel receive time of the read
// that completed it. Within one poll cycle all accepted requests are parked
// in the FIFO sequencer, which sorts them by receive time before publishing
// to the engine ring; the engine therefore sees wire-arrival order no matter
// which socket the poll loop happened to drain first.
//
// Outbound, each engine response is framed with the owning client's
// monotonically increasing outgoing sequence number.

use crate::protocol::{
    ClientRequest, ClientRequestQueue, ClientResponseQueue, SequencedClientRequest,
    SequencedClientResponse, SEQUENCED_CLIENT_REQUEST_SIZE,
};
use common::logging::{LogText, Logger};
use common::net::tcp::{TcpListener, TcpSocket};
use common::time::Nanos;
use common::{log_info, log_warn, ClientId, SeqNum, MAX_CLIENTS, MAX_PENDING_REQUESTS};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_ORDER_SERVER_PORT: u16 = 12345;

#[derive(Debug, Clone)]
pub struct OrderServerConfig {
    pub listen_addr: String,
    pub port: u16,
}

impl Default for OrderServerConfig {
    fn default() -> Self {
        Self { listen_addr: "0.0.0.0".to_string(), port: DEFAULT_ORDER_SERVER_PORT }
    }
}

impl OrderServerConfig {
    pub fn new(listen_addr: &str, port: u16) -> Self {
        Self { listen_addr: listen_addr.to_string(), port }
    }
}

/// A client request paired with the kernel receive time of its read.
#[derive(Debug, Clone, Copy, Default)]
struct TimestampedRequest {
    recv_time: Nanos,
    request: ClientRequest,
}

/// Re-orders one poll cycle's accepted requests into wire-arrival order.
///
/// Requests accumulate unsorted in a bounded scratch buffer;
/// `sequence_and_publish` sorts them by kernel receive time ascending and
/// writes them to the engine ring. The scratch buffer overflowing means the
/// poll cycle accepted more than `MAX_PENDING_REQUESTS` requests, which the
/// deployment is sized to never do.
pub struct FifoSequencer {
    pending: Box<[TimestampedRequest]>,
    pending_count: usize,
    outgoing: Arc<ClientRequestQueue>,
}

impl FifoSequencer {
    pub fn new(outgoing: Arc<ClientRequestQueue>) -> Self {
        Self {
            pending: vec![TimestampedRequest::default(); MAX_PENDING_REQUESTS].into_boxed_slice(),
            pending_count: 0,
            outgoing,
        }
    }

    pub fn push(&mut self, recv_time: Nanos, request: ClientRequest) {
        if self.pending_count >= self.pending.len() {
            panic!("FIFO sequencer overflow ({} pending requests)", self.pending_count);
        }
        self.pending[self.pending_count] = TimestampedRequest { recv_time, request };
        self.pending_count += 1;
    }

    /// Sorts the cycle's requests by receive time and hands them to the
    /// engine in that order.
    pub fn sequence_and_publish(&mut self) {
        if self.pending_count == 0 {
            return;
        }

        // Stable: frames sharing a receive timestamp (one read draining
        // several frames) keep their arrival order.
        self.pending[..self.pending_count].sort_by_key(|r| r.recv_time);

        for entry in &self.pending[..self.pending_count] {
            *self.outgoing.next_to_write() = entry.request;
            self.outgoing.commit_write();
        }
        self.pending_count = 0;
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }
}

struct ClientConnection {
    socket: TcpSocket,
    recv_buffer: Vec<u8>,
    /// Bound on the first valid frame; all later frames must match.
    client_id: Option<ClientId>,
}

pub struct OrderServer {
    listener: TcpListener,
    connections: Vec<Option<ClientConnection>>,
    /// Connection slot currently serving each client id.
    client_to_connection: Box<[Option<usize>]>,
    /// Expected next inbound frame sequence per client; starts at 1.
    next_inbound_seq: Box<[SeqNum]>,
    /// Next outbound frame sequence per client; starts at 1.
    next_outbound_seq: Box<[SeqNum]>,
    sequencer: FifoSequencer,
    responses: Arc<ClientResponseQueue>,
    logger: Logger,
    running: Arc<AtomicBool>,
    config: OrderServerConfig,
}

impl OrderServer {
    pub fn new(
        config: OrderServerConfig,
        engine_requests: Arc<ClientRequestQueue>,
        responses: Arc<ClientResponseQueue>,
        logger: Logger,
        running: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr, config.port)?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            connections: Vec::new(),
            client_to_connection: vec![None; MAX_CLIENTS].into_boxed_slice(),
            next_inbound_seq: vec![1; MAX_CLIENTS].into_boxed_slice(),
            next_outbound_seq: vec![1; MAX_CLIENTS].into_boxed_slice(),
            sequencer: FifoSequencer::new(engine_requests),
            responses,
            logger,
            running,
            config,
        })
    }

    /// The locally bound port (differs from config when binding to port 0).
    pub fn local_port(&self) -> io::Result<u16> {
        self.listener.local_port()
    }

    pub fn config(&self) -> &OrderServerConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().filter(|c| c.is_some()).count()
    }

    /// One cycle: accept, drain sockets, sequence into the engine ring, and
    /// flush engine responses back out.
    pub fn poll(&mut self) {
        self.accept_connections();
        self.drain_connections();
        self.sequencer.sequence_and_publish();
        self.drain_responses();
    }

    pub fn run(&mut self) {
        log_info!(self.logger, "order server started");
        while self.running.load(Ordering::Relaxed) {
            self.poll();
        }
        log_info!(self.logger, "order server stopped");
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(socket) => {
                    if socket.enable_rx_timestamps().is_err() {
                        log_warn!(self.logger, "rx timestamps unavailable on accepted socket");
                    }
                    if socket.set_nonblocking(true).is_err() {
                        continue;
                    }

                    let connection = ClientConnection {
                        socket,
                        recv_buffer: Vec::with_capacity(SEQUENCED_CLIENT_REQUEST_SIZE * 64),
                        client_id: None,
                    };
                    let slot = self.connections.iter().position(|c| c.is_none());
                    match slot {
                        Some(index) => self.connections[index] = Some(connection),
                        None => self.connections.push(Some(connection)),
                    }
                    log_info!(self.logger, "order server accepted connection");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn drain_connections(&mut self) {
        let Self {
            connections,
            client_to_connection,
            next_inbound_seq,
            sequencer,
            logger,
            ..
        } = self;

        let mut closed = Vec::new();

        for (index, slot) in connections.iter_mut().enumerate() {
            let Some(connection) = slot.as_mut() else { continue };
            let ClientConnection { socket, recv_buffer, client_id } = connection;

            // Drain everything the socket has; frames completed by one read
            // inherit that read's kernel timestamp.
            loop {
                match socket.try_recv_timestamped() {
                    Ok(Some((bytes, rx_time))) => {
                        if bytes.is_empty() {
                            closed.push(index);
                            break;
                        }
                        recv_buffer.extend_from_slice(bytes);

                        while recv_buffer.len() >= SEQUENCED_CLIENT_REQUEST_SIZE {
                            let frame = *SequencedClientRequest::from_bytes(
                                &recv_buffer[..SEQUENCED_CLIENT_REQUEST_SIZE],
                            )
                            .expect("sequenced request frame size mismatch");
                            recv_buffer.drain(..SEQUENCED_CLIENT_REQUEST_SIZE);

                            Self::handle_frame(
                                index,
                                client_id,
                                client_to_connection,
                                next_inbound_seq,
                                sequencer,
                                logger,
                                rx_time,
                                &frame,
                            );
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        closed.push(index);
                        break;
                    }
                }
            }
        }

        for index in closed {
            if let Some(connection) = self.connections[index].take() {
                if let Some(client_id) = connection.client_id {
                    self.client_to_connection[client_id as usize] = None;
                    log_info!(
                        self.logger,
                        LogText::WithU64("order server client disconnected", client_id as u64)
                    );
                }
            }
        }
    }

    /// Validates one inbound frame: client-id binding, then sequence check.
    /// Accepted requests go to the sequencer with their receive time.
    #[allow(clippy::too_many_arguments)]
    fn handle_frame(
        connection_index: usize,
        bound_client: &mut Option<ClientId>,
        client_to_connection: &mut [Option<usize>],
        next_inbound_seq: &mut [SeqNum],
        sequencer: &mut FifoSequencer,
        logger: &Logger,
        rx_time: Nanos,
        frame: &SequencedClientRequest,
    ) {
        let client_id = frame.request.client_id;
        if client_id as usize >= MAX_CLIENTS {
            log_warn!(logger, LogText::WithU64("dropping frame, client id out of range", client_id as u64));
            return;
        }

        match *bound_client {
            None => match client_to_connection[client_id as usize] {
                // The client already speaks on another socket.
                Some(other) if other != connection_index => {
                    log_warn!(
                        logger,
                        LogText::WithU64("dropping frame, client bound to another connection", client_id as u64)
                    );
                    return;
                }
                _ => {
                    *bound_client = Some(client_id);
                    client_to_connection[client_id as usize] = Some(connection_index);
                    log_info!(logger, LogText::WithU64("order server bound client", client_id as u64));
                }
            },
            Some(bound) if bound != client_id => {
                log_warn!(
                    logger,
                    LogText::WithU64Pair("dropping frame, client id mismatch bound/got", bound as u64, client_id as u64)
                );
                return;
            }
            Some(_) => {}
        }

        let expected = next_inbound_seq[client_id as usize];
        let seq_num = frame.seq_num;
        if seq_num != expected {
            // TCP delivered it, so a bad sequence is a client defect; drop.
            log_warn!(
                logger,
                LogText::WithU64Pair("dropping frame, bad inbound seq expected/got", expected, seq_num)
            );
            return;
        }
        next_inbound_seq[client_id as usize] = expected + 1;

        sequencer.push(rx_time, frame.request);
    }

    fn drain_responses(&mut self) {
        while let Some(response) = self.responses.next_to_read() {
            let response = *response;
            self.responses.commit_read();

            let client_id = response.client_id;
            let Some(index) = self
                .client_to_connection
                .get(client_id as usize)
                .copied()
                .flatten()
            else {
                log_warn!(
                    self.logger,
                    LogText::WithU64("dropping response, client not connected", client_id as u64)
                );
                continue;
            };

            let seq_num = self.next_outbound_seq[client_id as usize];
            self.next_outbound_seq[client_id as usize] = seq_num + 1;

            let frame = SequencedClientResponse { seq_num, response };
            if let Some(connection) = self.connections[index].as_mut() {
                if connection.socket.send(frame.as_bytes()).is_err() {
                    log_warn!(
                        self.logger,
                        LogText::WithU64("response send failed", client_id as u64)
                    );
                }
            }
        }
    }
}
