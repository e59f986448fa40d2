// Market-data publisher.
//
// Single consumer of the engine's update ring. Each update receives the next
// global incremental sequence number (starting at 1), goes out on the
// incremental multicast group as a `{seq_num, MarketUpdate}` frame, and the
// identical frame is teed onto the synthesizer ring so the snapshot image
// stays aligned with what subscribers saw. Multicast sends are non-blocking
// and lossy by design; the consumer recovers through the snapshot channel.

use crate::protocol::{MarketUpdateQueue, SequencedMarketUpdate, SequencedMarketUpdateQueue};
use common::logging::{LogText, Logger};
use common::net::multicast::MulticastSocket;
use common::{log_info, log_warn, SeqNum};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_INCREMENTAL_ADDR: &str = "239.255.0.1";
pub const DEFAULT_INCREMENTAL_PORT: u16 = 20001;

/// How long the publisher keeps draining its ring after shutdown is
/// requested.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MarketDataPublisherConfig {
    pub multicast_addr: String,
    pub port: u16,
    pub interface: String,
    pub ttl: u32,
}

impl Default for MarketDataPublisherConfig {
    fn default() -> Self {
        Self {
            multicast_addr: DEFAULT_INCREMENTAL_ADDR.to_string(),
            port: DEFAULT_INCREMENTAL_PORT,
            interface: "0.0.0.0".to_string(),
            ttl: 1,
        }
    }
}

pub struct MarketDataPublisher {
    socket: MulticastSocket,
    /// Engine -> publisher.
    incoming: Arc<MarketUpdateQueue>,
    /// Publisher -> snapshot synthesizer.
    snapshot_tap: Arc<SequencedMarketUpdateQueue>,
    /// Next incremental sequence number to assign; the stream starts at 1.
    next_inc_seq: SeqNum,
    total_sent: u64,
    config: MarketDataPublisherConfig,
    logger: Logger,
    running: Arc<AtomicBool>,
}

impl MarketDataPublisher {
    pub fn new(
        config: MarketDataPublisherConfig,
        incoming: Arc<MarketUpdateQueue>,
        snapshot_tap: Arc<SequencedMarketUpdateQueue>,
        logger: Logger,
        running: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let socket = MulticastSocket::sender(&config.interface, config.ttl)?;

        Ok(Self {
            socket,
            incoming,
            snapshot_tap,
            next_inc_seq: 1,
            total_sent: 0,
            config,
            logger,
            running,
        })
    }

    /// Next sequence number that will be assigned.
    #[inline]
    pub fn next_inc_seq(&self) -> SeqNum {
        self.next_inc_seq
    }

    #[inline]
    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    /// Drains the engine ring: stamp, multicast, tee.
    pub fn poll(&mut self) {
        while let Some(update) = self.incoming.next_to_read() {
            let update = *update;
            self.incoming.commit_read();

            let frame = SequencedMarketUpdate { seq_num: self.next_inc_seq, update };
            self.next_inc_seq += 1;

            if self
                .socket
                .send_to(frame.as_bytes(), &self.config.multicast_addr, self.config.port)
                .is_err()
            {
                // Lossy protocol: the gap surfaces at the consumer, which
                // recovers from the snapshot channel.
                log_warn!(self.logger, LogText::WithU64("incremental send failed, seq", frame.seq_num));
            }
            self.total_sent += 1;

            *self.snapshot_tap.next_to_write() = frame;
            self.snapshot_tap.commit_write();
        }
    }

    pub fn run(&mut self) {
        log_info!(self.logger, "market data publisher started");

        while self.running.load(Ordering::Relaxed) {
            self.poll();
            std::hint::spin_loop();
        }

        // Let in-flight engine updates flush before tearing down.
        let deadline = Instant::now() + SHUTDOWN_DRAIN;
        while Instant::now() < deadline && !self.incoming.is_empty() {
            self.poll();
        }

        log_info!(self.logger, LogText::WithU64("market data publisher stopped, sent", self.total_sent));
    }
}
