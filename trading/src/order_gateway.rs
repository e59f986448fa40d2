// Client-side order gateway.
//
// Mirror of the order server: one persistent non-blocking TCP connection.
// Requests drained from the trade engine's ring go out framed with this
// connection's monotonically increasing sequence number. Inbound response
// frames must carry the expected sequence number and our own client id;
// mismatches are dropped with a log, valid responses land on the trade
// engine's response ring.

use common::logging::{LogText, Logger};
use common::net::tcp::TcpSocket;
use common::{log_info, log_warn, ClientId, SeqNum};
use exchange::protocol::{
    ClientRequestQueue, ClientResponseQueue, SequencedClientRequest, SequencedClientResponse,
    SEQUENCED_CLIENT_RESPONSE_SIZE,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct OrderGatewayConfig {
    pub server_addr: String,
    pub server_port: u16,
}

impl Default for OrderGatewayConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1".to_string(),
            server_port: crate::DEFAULT_ORDER_SERVER_PORT,
        }
    }
}

pub struct OrderGateway {
    socket: TcpSocket,
    client_id: ClientId,
    /// Trade engine -> gateway.
    outgoing_requests: Arc<ClientRequestQueue>,
    /// Gateway -> trade engine.
    incoming_responses: Arc<ClientResponseQueue>,
    /// Sequence for the next outbound frame; starts at 1.
    next_outgoing_seq: SeqNum,
    /// Expected sequence of the next inbound frame; starts at 1.
    next_exp_seq: SeqNum,
    recv_buffer: Vec<u8>,
    logger: Logger,
    running: Arc<AtomicBool>,
}

impl OrderGateway {
    pub fn connect(
        config: &OrderGatewayConfig,
        client_id: ClientId,
        outgoing_requests: Arc<ClientRequestQueue>,
        incoming_responses: Arc<ClientResponseQueue>,
        logger: Logger,
        running: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let socket = TcpSocket::connect(&config.server_addr, config.server_port)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            client_id,
            outgoing_requests,
            incoming_responses,
            next_outgoing_seq: 1,
            next_exp_seq: 1,
            recv_buffer: Vec::with_capacity(SEQUENCED_CLIENT_RESPONSE_SIZE * 64),
            logger,
            running,
        })
    }

    #[inline]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    #[inline]
    pub fn next_outgoing_seq(&self) -> SeqNum {
        self.next_outgoing_seq
    }

    /// One cycle: flush outbound requests, then drain inbound responses.
    pub fn poll(&mut self) {
        self.send_requests();
        self.receive_responses();
    }

    pub fn run(&mut self) {
        log_info!(self.logger, LogText::WithU64("order gateway started, client", self.client_id as u64));
        while self.running.load(Ordering::Relaxed) {
            self.poll();
        }
        log_info!(self.logger, "order gateway stopped");
    }

    fn send_requests(&mut self) {
        while let Some(request) = self.outgoing_requests.next_to_read() {
            let request = *request;
            self.outgoing_requests.commit_read();

            let frame = SequencedClientRequest { seq_num: self.next_outgoing_seq, request };
            self.next_outgoing_seq += 1;

            if self.socket.send(frame.as_bytes()).is_err() {
                log_warn!(self.logger, LogText::WithU64("request send failed, seq", frame.seq_num));
            }
        }
    }

    fn receive_responses(&mut self) {
        loop {
            match self.socket.try_recv() {
                Ok(Some(bytes)) => {
                    if bytes.is_empty() {
                        log_warn!(self.logger, "order server closed the connection");
                        return;
                    }
                    self.recv_buffer.extend_from_slice(bytes);
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }

        while self.recv_buffer.len() >= SEQUENCED_CLIENT_RESPONSE_SIZE {
            let frame = *SequencedClientResponse::from_bytes(
                &self.recv_buffer[..SEQUENCED_CLIENT_RESPONSE_SIZE],
            )
            .expect("sequenced response frame size mismatch");
            self.recv_buffer.drain(..SEQUENCED_CLIENT_RESPONSE_SIZE);

            self.handle_frame(&frame);
        }
    }

    fn handle_frame(&mut self, frame: &SequencedClientResponse) {
        let response_client = frame.response.client_id;
        if response_client != self.client_id {
            log_warn!(
                self.logger,
                LogText::WithU64Pair(
                    "dropping response for foreign client ours/got",
                    self.client_id as u64,
                    response_client as u64
                )
            );
            return;
        }

        let seq_num = frame.seq_num;
        if seq_num != self.next_exp_seq {
            log_warn!(
                self.logger,
                LogText::WithU64Pair("dropping response, bad seq expected/got", self.next_exp_seq, seq_num)
            );
            return;
        }
        self.next_exp_seq += 1;

        *self.incoming_responses.next_to_write() = frame.response;
        self.incoming_responses.commit_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::net::tcp::TcpListener;
    use common::Side;
    use exchange::protocol::{
        ClientRequest, ClientResponse, ClientResponseType, SEQUENCED_CLIENT_REQUEST_SIZE,
    };
    use std::thread;
    use std::time::{Duration, Instant};

    struct Harness {
        gateway: OrderGateway,
        server_socket: TcpSocket,
        outgoing: Arc<ClientRequestQueue>,
        incoming: Arc<ClientResponseQueue>,
    }

    fn harness(client_id: ClientId) -> Harness {
        let listener = TcpListener::bind("127.0.0.1", 0).unwrap();
        let port = listener.local_port().unwrap();

        let outgoing = Arc::new(ClientRequestQueue::new());
        let incoming = Arc::new(ClientResponseQueue::new());
        let config = OrderGatewayConfig { server_addr: "127.0.0.1".to_string(), server_port: port };
        let gateway = OrderGateway::connect(
            &config,
            client_id,
            Arc::clone(&outgoing),
            Arc::clone(&incoming),
            Logger::new(),
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();

        let server_socket = listener.accept().unwrap();
        server_socket.set_nonblocking(true).unwrap();

        Harness { gateway, server_socket, outgoing, incoming }
    }

    fn recv_exactly(socket: &mut TcpSocket, len: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while bytes.len() < len && Instant::now() < deadline {
            if let Some(data) = socket.try_recv().unwrap() {
                bytes.extend_from_slice(data);
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
        assert_eq!(bytes.len(), len, "timed out receiving {} bytes", len);
        bytes
    }

    fn response(client_id: ClientId) -> ClientResponse {
        ClientResponse::new(ClientResponseType::Accepted, client_id, 0, 1, 1, Side::Buy, 50, 0, 10)
    }

    #[test]
    fn outbound_requests_are_stamped_monotonically() {
        let mut h = harness(7);

        for coid in 1..=2u64 {
            *h.outgoing.next_to_write() =
                ClientRequest::new_order(7, 0, coid, Side::Buy, 50, 10);
            h.outgoing.commit_write();
        }
        h.gateway.poll();

        let bytes = recv_exactly(&mut h.server_socket, 2 * SEQUENCED_CLIENT_REQUEST_SIZE);
        let first =
            SequencedClientRequest::from_bytes(&bytes[..SEQUENCED_CLIENT_REQUEST_SIZE]).unwrap();
        let second = SequencedClientRequest::from_bytes(
            &bytes[SEQUENCED_CLIENT_REQUEST_SIZE..2 * SEQUENCED_CLIENT_REQUEST_SIZE],
        )
        .unwrap();
        let (first_seq, second_seq) = (first.seq_num, second.seq_num);
        assert_eq!(first_seq, 1);
        assert_eq!(second_seq, 2);
        assert_eq!(h.gateway.next_outgoing_seq(), 3);
    }

    #[test]
    fn valid_responses_reach_the_response_ring() {
        let mut h = harness(7);

        let frame = SequencedClientResponse { seq_num: 1, response: response(7) };
        h.server_socket.send(frame.as_bytes()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while h.incoming.is_empty() && Instant::now() < deadline {
            h.gateway.poll();
            thread::sleep(Duration::from_millis(1));
        }

        let received = h.incoming.next_to_read().expect("response not delivered");
        assert_eq!(received.response_type(), Some(ClientResponseType::Accepted));
        h.incoming.commit_read();
    }

    #[test]
    fn foreign_client_id_is_dropped() {
        let mut h = harness(7);

        let foreign = SequencedClientResponse { seq_num: 1, response: response(8) };
        h.server_socket.send(foreign.as_bytes()).unwrap();
        let valid = SequencedClientResponse { seq_num: 1, response: response(7) };
        h.server_socket.send(valid.as_bytes()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while h.incoming.is_empty() && Instant::now() < deadline {
            h.gateway.poll();
            thread::sleep(Duration::from_millis(1));
        }

        // Only the frame for our client id arrives; the foreign one never
        // consumed sequence 1.
        let received = *h.incoming.next_to_read().unwrap();
        h.incoming.commit_read();
        let client_id = received.client_id;
        assert_eq!(client_id, 7);
        assert!(h.incoming.is_empty());
    }

    #[test]
    fn bad_sequence_is_dropped() {
        let mut h = harness(7);

        let skipped = SequencedClientResponse { seq_num: 5, response: response(7) };
        h.server_socket.send(skipped.as_bytes()).unwrap();
        let valid = SequencedClientResponse { seq_num: 1, response: response(7) };
        h.server_socket.send(valid.as_bytes()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while h.incoming.is_empty() && Instant::now() < deadline {
            h.gateway.poll();
            thread::sleep(Duration::from_millis(1));
        }

        // Seq 5 dropped; seq 1 accepted.
        assert!(h.incoming.next_to_read().is_some());
        h.incoming.commit_read();
        assert!(h.incoming.is_empty());
    }
}
