// Trading runtime.
//
// Owns the client-side state - book replicas, feature engine, position
// keeper, risk manager, order manager and the algorithm - and runs the event
// loop over the two inbound rings. Venue responses are processed before
// market data so order and position state is current when the algorithm
// reacts to prices.
//
// Market-data routing: TRADE updates go to the feature engine and the
// algorithm only (they carry no book state); every other update is applied
// to the instrument's replica, after which the refreshed BBO fans out to the
// feature engine, the position keeper and the algorithm.

use crate::features::FeatureEngine;
use crate::market_book::MarketOrderBook;
use crate::order_manager::OrderManager;
use crate::position::{PositionInfo, PositionKeeper};
use crate::risk::{RiskCfg, RiskManager};
use crate::strategies::{LiquidityTaker, MarketMaker, TradeAlgo};
use common::logging::{LogText, Logger};
use common::{log_info, log_warn, ClientId, Qty, Side, TickerId, MAX_ORDER_IDS, MAX_TICKERS};
use exchange::protocol::{
    ClientRequestQueue, ClientResponse, ClientResponseQueue, ClientResponseType, MarketUpdate,
    MarketUpdateQueue, MarketUpdateType,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-instrument algorithm parameters: the working size and the signal
/// threshold, plus the instrument's risk limits.
#[derive(Debug, Clone, Copy)]
pub struct TickerCfg {
    pub clip: Qty,
    pub threshold: f64,
    pub risk_cfg: RiskCfg,
}

impl Default for TickerCfg {
    fn default() -> Self {
        Self { clip: 10, threshold: 0.7, risk_cfg: RiskCfg::default() }
    }
}

/// Which algorithm to run; fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgoType {
    MarketMaker,
    LiquidityTaker,
    None,
}

#[derive(Debug, Clone)]
pub struct TradeEngineConfig {
    pub client_id: ClientId,
    /// One entry per ticker id.
    pub ticker_cfg: Vec<TickerCfg>,
    /// Order-arena size of each replica book.
    pub book_order_capacity: usize,
}

impl Default for TradeEngineConfig {
    fn default() -> Self {
        Self {
            client_id: 1,
            ticker_cfg: vec![TickerCfg::default(); MAX_TICKERS],
            book_order_capacity: MAX_ORDER_IDS,
        }
    }
}

pub struct TradeEngine {
    client_id: ClientId,
    books: Vec<MarketOrderBook>,
    feature_engine: FeatureEngine,
    position_keeper: PositionKeeper,
    risk_manager: RiskManager,
    order_manager: OrderManager,
    algo: TradeAlgo,
    /// Consumer -> trade engine.
    incoming_md: Arc<MarketUpdateQueue>,
    /// Gateway -> trade engine.
    incoming_responses: Arc<ClientResponseQueue>,
    logger: Logger,
    running: Arc<AtomicBool>,
}

impl TradeEngine {
    pub fn new(
        config: TradeEngineConfig,
        algo_type: AlgoType,
        incoming_md: Arc<MarketUpdateQueue>,
        incoming_responses: Arc<ClientResponseQueue>,
        outgoing_requests: Arc<ClientRequestQueue>,
        logger: Logger,
        running: Arc<AtomicBool>,
    ) -> Self {
        assert_eq!(config.ticker_cfg.len(), MAX_TICKERS, "one TickerCfg per ticker required");

        let books = (0..MAX_TICKERS)
            .map(|t| MarketOrderBook::with_order_capacity(t as TickerId, config.book_order_capacity))
            .collect();

        let mut risk_manager = RiskManager::new();
        for (ticker, cfg) in config.ticker_cfg.iter().enumerate() {
            risk_manager.set_risk_cfg(ticker as TickerId, cfg.risk_cfg);
        }

        let order_manager = OrderManager::new(config.client_id, outgoing_requests);

        let algo = match algo_type {
            AlgoType::MarketMaker => {
                TradeAlgo::MarketMaker(MarketMaker::new(config.ticker_cfg.clone()))
            }
            AlgoType::LiquidityTaker => {
                TradeAlgo::LiquidityTaker(LiquidityTaker::new(config.ticker_cfg.clone()))
            }
            AlgoType::None => TradeAlgo::None,
        };

        Self {
            client_id: config.client_id,
            books,
            feature_engine: FeatureEngine::new(),
            position_keeper: PositionKeeper::new(),
            risk_manager,
            order_manager,
            algo,
            incoming_md,
            incoming_responses,
            logger,
            running,
        }
    }

    #[inline]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    #[inline]
    pub fn book(&self, ticker_id: TickerId) -> &MarketOrderBook {
        &self.books[ticker_id as usize]
    }

    #[inline]
    pub fn position(&self, ticker_id: TickerId) -> &PositionInfo {
        self.position_keeper.position(ticker_id)
    }

    #[inline]
    pub fn order_manager(&self) -> &OrderManager {
        &self.order_manager
    }

    #[inline]
    pub fn position_keeper(&self) -> &PositionKeeper {
        &self.position_keeper
    }

    /// One event-loop cycle: responses first, then market data.
    pub fn poll(&mut self) {
        while let Some(response) = self.incoming_responses.next_to_read() {
            let response = *response;
            self.incoming_responses.commit_read();
            self.on_order_update(&response);
        }

        while let Some(update) = self.incoming_md.next_to_read() {
            let update = *update;
            self.incoming_md.commit_read();
            self.on_market_update(&update);
        }
    }

    pub fn run(&mut self) {
        log_info!(self.logger, LogText::WithU64("trade engine started, client", self.client_id as u64));

        while self.running.load(Ordering::Relaxed) {
            self.poll();
        }

        // Finish whatever the pipeline already delivered before exiting.
        while !self.incoming_md.is_empty() || !self.incoming_responses.is_empty() {
            self.poll();
        }

        log_info!(self.logger, LogText::WithF64("trade engine stopped, total pnl", self.position_keeper.total_pnl()));
    }

    /// Applies one venue response to positions, the order manager and the
    /// algorithm.
    pub fn on_order_update(&mut self, response: &ClientResponse) {
        if response.client_id != self.client_id {
            log_warn!(self.logger, LogText::WithU64("response for foreign client", response.client_id as u64));
            return;
        }

        if response.response_type() == Some(ClientResponseType::Filled) {
            self.position_keeper.add_fill(response);
            log_info!(
                self.logger,
                LogText::WithF64("fill applied, total pnl", self.position_keeper.total_pnl())
            );
        }

        self.order_manager.on_order_update(response);
        self.algo.on_order_update(response);
    }

    /// Applies one market update.
    pub fn on_market_update(&mut self, update: &MarketUpdate) {
        let ticker_id = update.ticker_id;
        if ticker_id as usize >= MAX_TICKERS {
            log_warn!(self.logger, LogText::WithU64("update for out-of-range ticker", ticker_id as u64));
            return;
        }

        match update.update_type() {
            Some(MarketUpdateType::Trade) => {
                let book = &self.books[ticker_id as usize];
                self.feature_engine.on_trade_update(update, book);
                self.algo.on_trade_update(
                    update,
                    book,
                    &self.feature_engine,
                    &mut self.order_manager,
                    &self.risk_manager,
                    &self.position_keeper,
                );
            }
            Some(_) => {
                let book = &mut self.books[ticker_id as usize];
                book.on_market_update(update);
                let bbo = *book.bbo();

                self.feature_engine.on_order_book_update(&bbo);
                self.position_keeper.update_bbo(ticker_id, &bbo);
                self.algo.on_order_book_update(
                    ticker_id,
                    update.price,
                    update.side().unwrap_or(Side::Invalid),
                    &self.books[ticker_id as usize],
                    &self.feature_engine,
                    &mut self.order_manager,
                    &self.risk_manager,
                    &self.position_keeper,
                );
            }
            None => {
                log_warn!(self.logger, LogText::WithU64("unknown market update type", update.msg_type as u64));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_manager::OMOrderState;
    use common::PRIORITY_INVALID;
    use exchange::protocol::{ClientRequest, ClientRequestType};

    const TEST_BOOK_CAPACITY: usize = 256;

    struct Harness {
        engine: TradeEngine,
        md: Arc<MarketUpdateQueue>,
        responses: Arc<ClientResponseQueue>,
        requests: Arc<ClientRequestQueue>,
    }

    fn harness(algo_type: AlgoType, threshold: f64) -> Harness {
        let md = Arc::new(MarketUpdateQueue::new());
        let responses = Arc::new(ClientResponseQueue::new());
        let requests = Arc::new(ClientRequestQueue::new());

        let config = TradeEngineConfig {
            client_id: 7,
            ticker_cfg: vec![
                TickerCfg { clip: 10, threshold, risk_cfg: RiskCfg::default() };
                MAX_TICKERS
            ],
            book_order_capacity: TEST_BOOK_CAPACITY,
        };
        let engine = TradeEngine::new(
            config,
            algo_type,
            Arc::clone(&md),
            Arc::clone(&responses),
            Arc::clone(&requests),
            Logger::new(),
            Arc::new(AtomicBool::new(true)),
        );
        Harness { engine, md, responses, requests }
    }

    fn push_md(h: &Harness, update: MarketUpdate) {
        *h.md.next_to_write() = update;
        h.md.commit_write();
    }

    fn push_response(h: &Harness, response: ClientResponse) {
        *h.responses.next_to_write() = response;
        h.responses.commit_write();
    }

    fn drain_requests(queue: &ClientRequestQueue) -> Vec<ClientRequest> {
        let mut out = Vec::new();
        while let Some(r) = queue.next_to_read() {
            out.push(*r);
            queue.commit_read();
        }
        out
    }

    fn add(order_id: u64, side: Side, price: i64, qty: u32) -> MarketUpdate {
        MarketUpdate::new(MarketUpdateType::Add, order_id, 0, side, price, qty, 1)
    }

    #[test]
    fn market_updates_drive_the_replica_book() {
        let mut h = harness(AlgoType::None, 0.5);
        push_md(&h, add(1, Side::Buy, 100, 10));
        push_md(&h, add(2, Side::Sell, 110, 5));
        h.engine.poll();

        let bbo = *h.engine.book(0).bbo();
        assert_eq!(bbo.bid_price, 100);
        assert_eq!(bbo.ask_price, 110);
        assert_eq!(h.engine.book(0).order_count(), 2);
    }

    #[test]
    fn fills_update_positions() {
        let mut h = harness(AlgoType::None, 0.5);
        push_response(
            &h,
            ClientResponse::new(ClientResponseType::Filled, 7, 0, 1, 1, Side::Buy, 100, 10, 0),
        );
        h.engine.poll();

        assert_eq!(h.engine.position(0).position, 10);
        assert_eq!(h.engine.position(0).volume, 10);
    }

    #[test]
    fn foreign_client_responses_are_ignored() {
        let mut h = harness(AlgoType::None, 0.5);
        push_response(
            &h,
            ClientResponse::new(ClientResponseType::Filled, 9, 0, 1, 1, Side::Buy, 100, 10, 0),
        );
        h.engine.poll();
        assert_eq!(h.engine.position(0).position, 0);
    }

    #[test]
    fn market_maker_quotes_both_sides_through_the_pipeline() {
        let mut h = harness(AlgoType::MarketMaker, 0.0);
        push_md(&h, add(1, Side::Buy, 100, 10));
        push_md(&h, add(2, Side::Sell, 110, 10));
        h.engine.poll();

        let requests = drain_requests(&h.requests);
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| {
            let client_id = r.client_id;
            r.request_type() == Some(ClientRequestType::New) && client_id == 7
        }));
        assert_eq!(h.engine.order_manager().order(0, Side::Buy).state, OMOrderState::PendingNew);
        assert_eq!(h.engine.order_manager().order(0, Side::Sell).state, OMOrderState::PendingNew);
    }

    #[test]
    fn liquidity_taker_fires_on_large_trades_only() {
        let mut h = harness(AlgoType::LiquidityTaker, 0.5);
        push_md(&h, add(1, Side::Buy, 100, 20));
        push_md(&h, add(2, Side::Sell, 110, 20));
        // Small print: ratio 0.1.
        push_md(
            &h,
            MarketUpdate::new(
                MarketUpdateType::Trade,
                common::ORDER_ID_INVALID,
                0,
                Side::Buy,
                110,
                2,
                PRIORITY_INVALID,
            ),
        );
        h.engine.poll();
        assert!(drain_requests(&h.requests).is_empty());

        // Large print: ratio 0.75.
        push_md(
            &h,
            MarketUpdate::new(
                MarketUpdateType::Trade,
                common::ORDER_ID_INVALID,
                0,
                Side::Buy,
                110,
                15,
                PRIORITY_INVALID,
            ),
        );
        h.engine.poll();

        let requests = drain_requests(&h.requests);
        assert_eq!(requests.len(), 1);
        let (side, price) = (requests[0].side, requests[0].price);
        assert_eq!(side, Side::Buy as i8);
        assert_eq!(price, 110);
    }

    #[test]
    fn bbo_updates_remark_open_positions() {
        let mut h = harness(AlgoType::None, 0.5);
        push_response(
            &h,
            ClientResponse::new(ClientResponseType::Filled, 7, 0, 1, 1, Side::Buy, 100, 10, 0),
        );
        push_md(&h, add(1, Side::Buy, 104, 10));
        push_md(&h, add(2, Side::Sell, 108, 10));
        h.engine.poll();

        // Mid is 106 against open VWAP 100.
        let unreal = h.engine.position(0).unreal_pnl;
        assert!((unreal - 60.0).abs() < 1e-9);
    }
}
