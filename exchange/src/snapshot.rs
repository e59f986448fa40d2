// Snapshot synthesizer.
//
// Consumes the publisher's tap of sequenced incremental frames and maintains
// a per-instrument image of every live order (its latest ADD, with quantity
// kept current by MODIFYs). Every `snapshot_interval` it multicasts a full
// cycle on the snapshot group:
//
//   seq 0:      SNAPSHOT_START, anchor = last incremental seq applied
//   seq 1..=N:  per instrument, one CLEAR followed by one ADD per live
//               order (ascending market order id)
//   seq N+1:    SNAPSHOT_END, same anchor
//
// The per-instrument CLEAR lets a recovering replica reset before re-adding.
// The anchor rides in the order-id field of the START/END markers; it is
// only accessed through the named protocol helpers.

use crate::protocol::{
    MarketUpdate, MarketUpdateType, SequencedMarketUpdate, SequencedMarketUpdateQueue,
};
use common::logging::{LogText, Logger};
use common::net::multicast::MulticastSocket;
use common::{log_info, log_warn, OrderId, SeqNum, TickerId, MAX_TICKERS};
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_SNAPSHOT_ADDR: &str = "239.255.0.2";
pub const DEFAULT_SNAPSHOT_PORT: u16 = 20000;

#[derive(Debug, Clone)]
pub struct SnapshotSynthesizerConfig {
    pub multicast_addr: String,
    pub port: u16,
    pub interface: String,
    pub ttl: u32,
    pub snapshot_interval: Duration,
}

impl Default for SnapshotSynthesizerConfig {
    fn default() -> Self {
        Self {
            multicast_addr: DEFAULT_SNAPSHOT_ADDR.to_string(),
            port: DEFAULT_SNAPSHOT_PORT,
            interface: "0.0.0.0".to_string(),
            ttl: 1,
            snapshot_interval: Duration::from_secs(60),
        }
    }
}

pub struct SnapshotSynthesizer {
    /// Publisher -> synthesizer tap.
    incoming: Arc<SequencedMarketUpdateQueue>,
    socket: MulticastSocket,
    /// Live orders per instrument: market order id -> its current ADD image.
    ticker_orders: Vec<BTreeMap<OrderId, MarketUpdate>>,
    /// Highest incremental sequence number applied to the image.
    last_inc_seq: SeqNum,
    last_snapshot_time: Instant,
    config: SnapshotSynthesizerConfig,
    logger: Logger,
    running: Arc<AtomicBool>,
}

impl SnapshotSynthesizer {
    pub fn new(
        config: SnapshotSynthesizerConfig,
        incoming: Arc<SequencedMarketUpdateQueue>,
        logger: Logger,
        running: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let socket = MulticastSocket::sender(&config.interface, config.ttl)?;

        Ok(Self {
            incoming,
            socket,
            ticker_orders: (0..MAX_TICKERS).map(|_| BTreeMap::new()).collect(),
            last_inc_seq: 0,
            last_snapshot_time: Instant::now(),
            config,
            logger,
            running,
        })
    }

    #[inline]
    pub fn last_inc_seq(&self) -> SeqNum {
        self.last_inc_seq
    }

    pub fn live_order_count(&self, ticker_id: TickerId) -> usize {
        self.ticker_orders[ticker_id as usize].len()
    }

    /// Applies one incremental frame to the book image.
    pub fn add_to_snapshot(&mut self, frame: &SequencedMarketUpdate) {
        let update = frame.update;

        match update.update_type() {
            Some(MarketUpdateType::Add) => {
                self.ticker_orders[update.ticker_id as usize].insert(update.order_id, update);
            }
            Some(MarketUpdateType::Modify) => {
                let order_id = update.order_id;
                let entry = self.ticker_orders[update.ticker_id as usize]
                    .get_mut(&order_id)
                    .unwrap_or_else(|| panic!("MODIFY for unknown order {}", order_id));
                entry.qty = update.qty;
                entry.price = update.price;
            }
            Some(MarketUpdateType::Cancel) => {
                let order_id = update.order_id;
                self.ticker_orders[update.ticker_id as usize]
                    .remove(&order_id)
                    .unwrap_or_else(|| panic!("CANCEL for unknown order {}", order_id));
            }
            Some(MarketUpdateType::Clear) => {
                self.ticker_orders[update.ticker_id as usize].clear();
            }
            Some(MarketUpdateType::Trade) => {
                // Trades carry no book state; the paired MODIFY/CANCEL does.
            }
            Some(MarketUpdateType::SnapshotStart) | Some(MarketUpdateType::SnapshotEnd) | None => {
                log_warn!(self.logger, LogText::WithU64("unexpected update type on tap", update.msg_type as u64));
            }
            Some(MarketUpdateType::Invalid) => unreachable!("from_u8 never yields Invalid"),
        }

        self.last_inc_seq = frame.seq_num;
    }

    /// Builds one full snapshot cycle for the current image.
    pub fn build_snapshot_frames(&self) -> Vec<SequencedMarketUpdate> {
        let mut frames = Vec::new();
        let mut seq: SeqNum = 0;

        frames.push(SequencedMarketUpdate {
            seq_num: seq,
            update: MarketUpdate::snapshot_start(self.last_inc_seq),
        });
        seq += 1;

        for (ticker, orders) in self.ticker_orders.iter().enumerate() {
            frames.push(SequencedMarketUpdate {
                seq_num: seq,
                update: MarketUpdate::clear(ticker as TickerId),
            });
            seq += 1;

            for order in orders.values() {
                frames.push(SequencedMarketUpdate { seq_num: seq, update: *order });
                seq += 1;
            }
        }

        frames.push(SequencedMarketUpdate {
            seq_num: seq,
            update: MarketUpdate::snapshot_end(self.last_inc_seq),
        });

        frames
    }

    /// Multicasts one snapshot cycle.
    pub fn publish_snapshot(&mut self) {
        let frames = self.build_snapshot_frames();
        for frame in &frames {
            if self
                .socket
                .send_to(frame.as_bytes(), &self.config.multicast_addr, self.config.port)
                .is_err()
            {
                log_warn!(self.logger, LogText::WithU64("snapshot send failed, seq", frame.seq_num));
            }
        }
        log_info!(
            self.logger,
            LogText::WithU64Pair("snapshot cycle published frames/anchor", frames.len() as u64, self.last_inc_seq)
        );
    }

    /// Drains the tap and publishes a cycle when the interval has elapsed.
    pub fn poll(&mut self) {
        while let Some(frame) = self.incoming.next_to_read() {
            let frame = *frame;
            self.incoming.commit_read();
            self.add_to_snapshot(&frame);
        }

        if self.last_snapshot_time.elapsed() >= self.config.snapshot_interval {
            self.last_snapshot_time = Instant::now();
            self.publish_snapshot();
        }
    }

    pub fn run(&mut self) {
        log_info!(self.logger, "snapshot synthesizer started");
        while self.running.load(Ordering::Relaxed) {
            self.poll();
            std::hint::spin_loop();
        }
        log_info!(self.logger, "snapshot synthesizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Side;

    fn synthesizer() -> SnapshotSynthesizer {
        let incoming = Arc::new(SequencedMarketUpdateQueue::new());
        let logger = Logger::new();
        let running = Arc::new(AtomicBool::new(true));
        SnapshotSynthesizer::new(SnapshotSynthesizerConfig::default(), incoming, logger, running)
            .unwrap()
    }

    fn add_frame(seq: SeqNum, order_id: OrderId, ticker: TickerId, qty: u32) -> SequencedMarketUpdate {
        SequencedMarketUpdate {
            seq_num: seq,
            update: MarketUpdate::new(MarketUpdateType::Add, order_id, ticker, Side::Buy, 50, qty, 1),
        }
    }

    #[test]
    fn image_tracks_adds_modifies_and_cancels() {
        let mut s = synthesizer();

        s.add_to_snapshot(&add_frame(1, 10, 0, 5));
        s.add_to_snapshot(&add_frame(2, 11, 0, 7));
        assert_eq!(s.live_order_count(0), 2);

        s.add_to_snapshot(&SequencedMarketUpdate {
            seq_num: 3,
            update: MarketUpdate::new(MarketUpdateType::Modify, 10, 0, Side::Buy, 50, 3, 1),
        });
        s.add_to_snapshot(&SequencedMarketUpdate {
            seq_num: 4,
            update: MarketUpdate::new(MarketUpdateType::Cancel, 11, 0, Side::Buy, 50, 0, 2),
        });

        assert_eq!(s.live_order_count(0), 1);
        assert_eq!(s.last_inc_seq(), 4);
    }

    #[test]
    fn trade_frames_do_not_change_the_image() {
        let mut s = synthesizer();
        s.add_to_snapshot(&add_frame(1, 10, 0, 5));
        s.add_to_snapshot(&SequencedMarketUpdate {
            seq_num: 2,
            update: MarketUpdate::new(
                MarketUpdateType::Trade,
                common::ORDER_ID_INVALID,
                0,
                Side::Sell,
                50,
                2,
                common::PRIORITY_INVALID,
            ),
        });
        assert_eq!(s.live_order_count(0), 1);
        assert_eq!(s.last_inc_seq(), 2);
    }

    #[test]
    fn cycle_is_bracketed_and_gapless() {
        let mut s = synthesizer();
        s.add_to_snapshot(&add_frame(7, 10, 0, 5));
        s.add_to_snapshot(&add_frame(8, 11, 1, 7));

        let frames = s.build_snapshot_frames();

        // Gapless per-cycle sequence 0..=N+1.
        for (i, frame) in frames.iter().enumerate() {
            let seq_num = frame.seq_num;
            assert_eq!(seq_num, i as u64);
        }

        let first = &frames[0];
        let last = frames.last().unwrap();
        assert_eq!(first.update.update_type(), Some(MarketUpdateType::SnapshotStart));
        assert_eq!(last.update.update_type(), Some(MarketUpdateType::SnapshotEnd));
        assert_eq!(first.update.snapshot_anchor_seq(), 8);
        assert_eq!(last.update.snapshot_anchor_seq(), 8);

        // Body: one CLEAR per instrument plus the two live orders.
        let clears = frames
            .iter()
            .filter(|f| f.update.update_type() == Some(MarketUpdateType::Clear))
            .count();
        let adds = frames
            .iter()
            .filter(|f| f.update.update_type() == Some(MarketUpdateType::Add))
            .count();
        assert_eq!(clears, MAX_TICKERS);
        assert_eq!(adds, 2);
    }

    #[test]
    fn clear_resets_one_instrument() {
        let mut s = synthesizer();
        s.add_to_snapshot(&add_frame(1, 10, 0, 5));
        s.add_to_snapshot(&add_frame(2, 20, 1, 5));
        s.add_to_snapshot(&SequencedMarketUpdate {
            seq_num: 3,
            update: MarketUpdate::clear(0),
        });
        assert_eq!(s.live_order_count(0), 0);
        assert_eq!(s.live_order_count(1), 1);
    }

    #[test]
    #[should_panic(expected = "CANCEL for unknown order")]
    fn cancel_for_unknown_order_is_fatal() {
        let mut s = synthesizer();
        s.add_to_snapshot(&SequencedMarketUpdate {
            seq_num: 1,
            update: MarketUpdate::new(MarketUpdateType::Cancel, 99, 0, Side::Buy, 50, 0, 1),
        });
    }
}
