// Market-data consumer with snapshot recovery.
//
// Steady state: subscribed to the incremental group only; frames arriving
// with the expected global sequence number are decoded and pushed straight
// onto the trade engine's ring.
//
// On the first sequence gap the consumer enters recovery:
//  1. join the snapshot group and clear both queueing maps;
//  2. queue every arriving incremental and snapshot frame by sequence;
//  3. a recovery attempt succeeds when the queued snapshot frames form a
//     gapless cycle (SNAPSHOT_START first, SNAPSHOT_END last) and the queued
//     incrementals cover every sequence after the cycle's anchor with no
//     gap;
//  4. on success the snapshot body (markers stripped) and then the
//     incremental tail are fed to the runtime in order, the expected
//     sequence advances past the last queued incremental, the snapshot
//     group is left and the maps are cleared;
//  5. a gap inside the snapshot cycle or a duplicate snapshot sequence
//     discards the queued cycle and waits for the next SNAPSHOT_START.
//
// There is no internal timeout: recovery is driven entirely by arrival.
//
// Socket I/O is separated from the frame protocol so the recovery logic can
// be driven directly in tests; `connect` must be called before polling.

use common::logging::{LogText, Logger};
use common::net::multicast::MulticastSocket;
use common::{log_info, log_warn, SeqNum};
use exchange::protocol::{
    MarketUpdate, MarketUpdateQueue, MarketUpdateType, SequencedMarketUpdate,
    SEQUENCED_MARKET_UPDATE_SIZE,
};
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MarketDataConsumerConfig {
    pub incremental_addr: String,
    pub incremental_port: u16,
    pub snapshot_addr: String,
    pub snapshot_port: u16,
    pub interface: String,
}

impl Default for MarketDataConsumerConfig {
    fn default() -> Self {
        Self {
            incremental_addr: exchange::market_data::DEFAULT_INCREMENTAL_ADDR.to_string(),
            incremental_port: exchange::market_data::DEFAULT_INCREMENTAL_PORT,
            snapshot_addr: exchange::snapshot::DEFAULT_SNAPSHOT_ADDR.to_string(),
            snapshot_port: exchange::snapshot::DEFAULT_SNAPSHOT_PORT,
            interface: "0.0.0.0".to_string(),
        }
    }
}

pub struct MarketDataConsumer {
    /// Joined for the whole lifetime once `connect` succeeds.
    incremental_socket: Option<MulticastSocket>,
    /// Joined only while recovering.
    snapshot_socket: Option<MulticastSocket>,
    /// Consumer -> trade engine.
    outgoing_md: Arc<MarketUpdateQueue>,
    /// Expected next incremental sequence number; the stream starts at 1.
    next_exp_inc_seq: SeqNum,
    in_recovery: bool,
    snapshot_queued: BTreeMap<SeqNum, MarketUpdate>,
    incremental_queued: BTreeMap<SeqNum, MarketUpdate>,
    config: MarketDataConsumerConfig,
    logger: Logger,
    running: Arc<AtomicBool>,
}

impl MarketDataConsumer {
    pub fn new(
        config: MarketDataConsumerConfig,
        outgoing_md: Arc<MarketUpdateQueue>,
        logger: Logger,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            incremental_socket: None,
            snapshot_socket: None,
            outgoing_md,
            next_exp_inc_seq: 1,
            in_recovery: false,
            snapshot_queued: BTreeMap::new(),
            incremental_queued: BTreeMap::new(),
            config,
            logger,
            running,
        }
    }

    /// Joins the incremental group. Without this the consumer only reacts to
    /// frames handed to it directly (as the tests do).
    pub fn connect(&mut self) -> io::Result<()> {
        self.incremental_socket = Some(MulticastSocket::join_group(
            &self.config.incremental_addr,
            self.config.incremental_port,
            &self.config.interface,
        )?);
        Ok(())
    }

    #[inline]
    pub fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    #[inline]
    pub fn next_exp_inc_seq(&self) -> SeqNum {
        self.next_exp_inc_seq
    }

    #[inline]
    pub fn snapshot_subscribed(&self) -> bool {
        self.snapshot_socket.is_some()
    }

    /// Drains both sockets, dispatching frames into the protocol handlers.
    pub fn poll(&mut self) {
        loop {
            let frames = {
                let Some(socket) = self.incremental_socket.as_mut() else { break };
                match socket.try_recv() {
                    Ok(Some(datagram)) => parse_frames(datagram),
                    Ok(None) | Err(_) => break,
                }
            };
            for frame in &frames {
                self.on_incremental_frame(frame);
            }
        }

        loop {
            // Recovery may complete mid-drain and drop the subscription.
            let frames = {
                let Some(socket) = self.snapshot_socket.as_mut() else { break };
                match socket.try_recv() {
                    Ok(Some(datagram)) => parse_frames(datagram),
                    Ok(None) | Err(_) => break,
                }
            };
            for frame in &frames {
                self.on_snapshot_frame(frame);
            }
        }
    }

    pub fn run(&mut self) {
        log_info!(self.logger, "market data consumer started");
        while self.running.load(Ordering::Relaxed) {
            self.poll();
        }
        log_info!(self.logger, "market data consumer stopped");
    }

    /// Handles one frame from the incremental stream.
    pub fn on_incremental_frame(&mut self, frame: &SequencedMarketUpdate) {
        let seq_num = frame.seq_num;

        if !self.in_recovery {
            if seq_num == self.next_exp_inc_seq {
                self.next_exp_inc_seq += 1;
                self.publish(frame.update);
                return;
            }

            // Gap: switch to recovery and start queueing.
            log_warn!(
                self.logger,
                LogText::WithU64Pair("incremental gap expected/got", self.next_exp_inc_seq, seq_num)
            );
            self.start_snapshot_sync();
        }

        self.incremental_queued.insert(seq_num, frame.update);
        self.check_snapshot_sync();
    }

    /// Handles one frame from the snapshot stream.
    pub fn on_snapshot_frame(&mut self, frame: &SequencedMarketUpdate) {
        if !self.in_recovery {
            // Stale subscription; nothing to do with it.
            log_warn!(self.logger, "ignoring snapshot frame outside recovery");
            return;
        }

        let seq_num = frame.seq_num;
        if self.snapshot_queued.contains_key(&seq_num) {
            // A repeated per-cycle sequence means the snapshot stream itself
            // dropped packets; restart collection at the next cycle.
            log_warn!(self.logger, LogText::WithU64("duplicate snapshot seq, restarting cycle", seq_num));
            self.snapshot_queued.clear();
        }
        self.snapshot_queued.insert(seq_num, frame.update);

        self.check_snapshot_sync();
    }

    fn start_snapshot_sync(&mut self) {
        self.in_recovery = true;
        self.snapshot_queued.clear();
        self.incremental_queued.clear();

        // Only join for real when running against sockets.
        if self.incremental_socket.is_some() && self.snapshot_socket.is_none() {
            match MulticastSocket::join_group(
                &self.config.snapshot_addr,
                self.config.snapshot_port,
                &self.config.interface,
            ) {
                Ok(socket) => self.snapshot_socket = Some(socket),
                Err(_) => log_warn!(self.logger, "failed to join snapshot group"),
            }
        }
    }

    fn leave_snapshot_group(&mut self) {
        if let Some(socket) = self.snapshot_socket.take() {
            let _ = socket.leave_group(&self.config.snapshot_addr, &self.config.interface);
        }
    }

    /// Attempts to complete recovery from the queued frames.
    fn check_snapshot_sync(&mut self) {
        if self.snapshot_queued.is_empty() {
            return;
        }

        // The cycle must begin with SNAPSHOT_START; anything queued before
        // one is an unusable partial cycle.
        let (&first_seq, first_update) = self.snapshot_queued.iter().next().unwrap();
        if first_seq != 0 || first_update.update_type() != Some(MarketUpdateType::SnapshotStart) {
            log_warn!(self.logger, "queued snapshot frames do not start a cycle, discarding");
            self.snapshot_queued.clear();
            return;
        }

        // The queued snapshot frames must be gapless.
        let mut replay: Vec<MarketUpdate> = Vec::with_capacity(self.snapshot_queued.len());
        let mut cycle_gap = None;
        let mut expected_seq: SeqNum = 0;
        for (&seq_num, update) in &self.snapshot_queued {
            if seq_num != expected_seq {
                cycle_gap = Some((expected_seq, seq_num));
                break;
            }
            expected_seq += 1;

            let update_type = update.update_type();
            if update_type != Some(MarketUpdateType::SnapshotStart)
                && update_type != Some(MarketUpdateType::SnapshotEnd)
            {
                replay.push(*update);
            }
        }
        if let Some((expected, got)) = cycle_gap {
            log_warn!(
                self.logger,
                LogText::WithU64Pair("snapshot cycle gap expected/got", expected, got)
            );
            self.snapshot_queued.clear();
            return;
        }

        // Cycle still in flight until SNAPSHOT_END shows up.
        let last_update = self.snapshot_queued.values().next_back().unwrap();
        if last_update.update_type() != Some(MarketUpdateType::SnapshotEnd) {
            return;
        }
        let anchor_seq = last_update.snapshot_anchor_seq();

        // Queued incrementals must cover everything after the anchor without
        // a gap; frames at or before the anchor are already inside the
        // snapshot image.
        let mut next_inc_seq = anchor_seq + 1;
        let mut tail_count = 0usize;
        for (&seq_num, update) in &self.incremental_queued {
            if seq_num <= anchor_seq {
                continue;
            }
            if seq_num != next_inc_seq {
                log_warn!(
                    self.logger,
                    LogText::WithU64Pair("incremental tail gap expected/got", next_inc_seq, seq_num)
                );
                self.snapshot_queued.clear();
                return;
            }
            replay.push(*update);
            next_inc_seq += 1;
            tail_count += 1;
        }

        for update in &replay {
            self.publish(*update);
        }

        log_info!(
            self.logger,
            LogText::WithU64Pair(
                "recovered snapshot-body/incremental-tail",
                (replay.len() - tail_count) as u64,
                tail_count as u64
            )
        );

        self.next_exp_inc_seq = next_inc_seq;
        self.snapshot_queued.clear();
        self.incremental_queued.clear();
        self.in_recovery = false;
        self.leave_snapshot_group();
    }

    #[inline]
    fn publish(&self, update: MarketUpdate) {
        *self.outgoing_md.next_to_write() = update;
        self.outgoing_md.commit_write();
    }
}

/// Splits a datagram into sequenced market-update frames.
fn parse_frames(datagram: &[u8]) -> Vec<SequencedMarketUpdate> {
    datagram
        .chunks_exact(SEQUENCED_MARKET_UPDATE_SIZE)
        .filter_map(|chunk| SequencedMarketUpdate::from_bytes(chunk).copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Side;

    fn consumer() -> (MarketDataConsumer, Arc<MarketUpdateQueue>) {
        let outgoing = Arc::new(MarketUpdateQueue::new());
        let consumer = MarketDataConsumer::new(
            MarketDataConsumerConfig::default(),
            Arc::clone(&outgoing),
            Logger::new(),
            Arc::new(AtomicBool::new(true)),
        );
        (consumer, outgoing)
    }

    fn inc(seq: SeqNum, order_id: u64) -> SequencedMarketUpdate {
        SequencedMarketUpdate {
            seq_num: seq,
            update: MarketUpdate::new(MarketUpdateType::Add, order_id, 0, Side::Buy, 50, 10, 1),
        }
    }

    fn snap_add(seq: SeqNum, order_id: u64) -> SequencedMarketUpdate {
        SequencedMarketUpdate {
            seq_num: seq,
            update: MarketUpdate::new(MarketUpdateType::Add, order_id, 0, Side::Buy, 50, 10, 1),
        }
    }

    fn drain(queue: &MarketUpdateQueue) -> Vec<MarketUpdate> {
        let mut out = Vec::new();
        while let Some(u) = queue.next_to_read() {
            out.push(*u);
            queue.commit_read();
        }
        out
    }

    #[test]
    fn in_order_frames_flow_straight_through() {
        let (mut consumer, outgoing) = consumer();
        for seq in 1..=3 {
            consumer.on_incremental_frame(&inc(seq, seq));
        }

        assert!(!consumer.in_recovery());
        assert_eq!(consumer.next_exp_inc_seq(), 4);
        let updates = drain(&outgoing);
        let ids: Vec<_> = updates.iter().map(|u| u.order_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn gap_triggers_recovery_and_queues() {
        let (mut consumer, outgoing) = consumer();
        consumer.on_incremental_frame(&inc(1, 1));
        consumer.on_incremental_frame(&inc(3, 3));

        assert!(consumer.in_recovery());
        // Only the in-order frame reached the runtime.
        assert_eq!(drain(&outgoing).len(), 1);
    }

    #[test]
    fn full_recovery_feeds_body_then_tail() {
        let (mut consumer, outgoing) = consumer();

        // Process 1..=100 in order.
        for seq in 1..=100 {
            consumer.on_incremental_frame(&inc(seq, seq));
        }
        drain(&outgoing);

        // 101..=105 are lost; 106..=120 arrive and trigger/queue.
        for seq in 106..=120 {
            consumer.on_incremental_frame(&inc(seq, seq));
        }
        assert!(consumer.in_recovery());
        assert!(drain(&outgoing).is_empty());

        // A snapshot cycle anchored at 110 arrives: START, two ADDs, END.
        consumer.on_snapshot_frame(&SequencedMarketUpdate {
            seq_num: 0,
            update: MarketUpdate::snapshot_start(110),
        });
        consumer.on_snapshot_frame(&snap_add(1, 1001));
        consumer.on_snapshot_frame(&snap_add(2, 1002));

        // Tail 111..=120 is already queued but END has not arrived yet.
        assert!(consumer.in_recovery());

        consumer.on_snapshot_frame(&SequencedMarketUpdate {
            seq_num: 3,
            update: MarketUpdate::snapshot_end(110),
        });

        assert!(!consumer.in_recovery());
        assert_eq!(consumer.next_exp_inc_seq(), 121);

        let updates = drain(&outgoing);
        let ids: Vec<_> = updates.iter().map(|u| u.order_id).collect();
        // Snapshot body first, then incrementals 111..=120.
        let mut expected = vec![1001, 1002];
        expected.extend(111..=120);
        assert_eq!(ids, expected);

        // Steady state resumes.
        consumer.on_incremental_frame(&inc(121, 121));
        assert_eq!(drain(&outgoing).len(), 1);
        assert_eq!(consumer.next_exp_inc_seq(), 122);
    }

    #[test]
    fn snapshot_without_start_is_discarded() {
        let (mut consumer, _outgoing) = consumer();
        consumer.on_incremental_frame(&inc(5, 5));
        assert!(consumer.in_recovery());

        // Joined mid-cycle: first frames carry non-zero sequences.
        consumer.on_snapshot_frame(&snap_add(7, 1001));
        consumer.on_snapshot_frame(&snap_add(8, 1002));

        // Still recovering, queue discarded, waiting for the next START.
        assert!(consumer.in_recovery());
        assert!(consumer.snapshot_queued.is_empty());
    }

    #[test]
    fn duplicate_snapshot_sequence_restarts_collection() {
        let (mut consumer, _outgoing) = consumer();
        consumer.on_incremental_frame(&inc(5, 5));

        consumer.on_snapshot_frame(&SequencedMarketUpdate {
            seq_num: 0,
            update: MarketUpdate::snapshot_start(4),
        });
        consumer.on_snapshot_frame(&snap_add(1, 1001));
        // The same per-cycle sequence again: collection restarts, and the
        // leftover mid-cycle frame is discarded while waiting for a START.
        consumer.on_snapshot_frame(&snap_add(1, 1002));

        assert!(consumer.in_recovery());
        assert!(consumer.snapshot_queued.is_empty());
    }

    #[test]
    fn incremental_tail_gap_defers_recovery_to_next_cycle() {
        let (mut consumer, outgoing) = consumer();
        for seq in 1..=10 {
            consumer.on_incremental_frame(&inc(seq, seq));
        }
        drain(&outgoing);

        // Lose 11; 12 arrives, then 14 (so the tail 13 is missing too).
        consumer.on_incremental_frame(&inc(12, 12));
        consumer.on_incremental_frame(&inc(14, 14));
        assert!(consumer.in_recovery());

        // Snapshot anchored at 12: tail must cover 13.. but 13 is missing.
        consumer.on_snapshot_frame(&SequencedMarketUpdate {
            seq_num: 0,
            update: MarketUpdate::snapshot_start(12),
        });
        consumer.on_snapshot_frame(&snap_add(1, 1001));
        consumer.on_snapshot_frame(&SequencedMarketUpdate {
            seq_num: 2,
            update: MarketUpdate::snapshot_end(12),
        });

        // Recovery fails this cycle; nothing reaches the runtime.
        assert!(consumer.in_recovery());
        assert!(drain(&outgoing).is_empty());

        // 13 finally shows up, then the next cycle lands: recovery
        // completes once a gapless cycle is queued.
        consumer.on_incremental_frame(&inc(13, 13));
        consumer.on_snapshot_frame(&SequencedMarketUpdate {
            seq_num: 0,
            update: MarketUpdate::snapshot_start(12),
        });
        consumer.on_snapshot_frame(&snap_add(1, 1001));
        consumer.on_snapshot_frame(&SequencedMarketUpdate {
            seq_num: 2,
            update: MarketUpdate::snapshot_end(12),
        });

        assert!(!consumer.in_recovery());
        assert_eq!(consumer.next_exp_inc_seq(), 15);
        let ids: Vec<_> = drain(&outgoing).iter().map(|u| u.order_id).collect();
        assert_eq!(ids, vec![1001, 13, 14]);
    }

    #[test]
    fn parse_frames_splits_coalesced_datagrams() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(inc(1, 1).as_bytes());
        bytes.extend_from_slice(inc(2, 2).as_bytes());

        let frames = parse_frames(&bytes);
        assert_eq!(frames.len(), 2);
        let (first_seq, second_seq) = (frames[0].seq_num, frames[1].seq_num);
        assert_eq!(first_seq, 1);
        assert_eq!(second_seq, 2);
    }
}
