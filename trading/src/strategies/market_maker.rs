// Passive market-making algorithm.
//
// Quotes one clip on each side of the book through the order manager. The
// quoted price joins the touch when the fair value is at least `threshold`
// away from it (enough expected edge), and backs off one tick otherwise.
// All order lifecycle mechanics live in the order manager; this file is
// only the pricing decision.

use crate::features::FeatureEngine;
use crate::market_book::MarketOrderBook;
use crate::order_manager::OrderManager;
use crate::position::PositionKeeper;
use crate::risk::RiskManager;
use crate::trade_engine::TickerCfg;
use common::{Price, Side, TickerId};
use exchange::protocol::{ClientResponse, MarketUpdate};

pub struct MarketMaker {
    ticker_cfg: Vec<TickerCfg>,
}

impl MarketMaker {
    pub fn new(ticker_cfg: Vec<TickerCfg>) -> Self {
        Self { ticker_cfg }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_order_book_update(
        &mut self,
        ticker_id: TickerId,
        _price: Price,
        _side: Side,
        book: &MarketOrderBook,
        features: &FeatureEngine,
        order_manager: &mut OrderManager,
        risk_manager: &RiskManager,
        position_keeper: &PositionKeeper,
    ) {
        let bbo = book.bbo();
        let fair_price = features.mkt_price();
        if !bbo.is_valid() || !fair_price.is_finite() {
            return;
        }

        let cfg = &self.ticker_cfg[ticker_id as usize];

        let bid_price =
            bbo.bid_price - if fair_price - bbo.bid_price as f64 >= cfg.threshold { 0 } else { 1 };
        let ask_price =
            bbo.ask_price + if bbo.ask_price as f64 - fair_price >= cfg.threshold { 0 } else { 1 };

        order_manager.move_orders(
            ticker_id,
            bid_price,
            ask_price,
            cfg.clip,
            risk_manager,
            position_keeper,
        );
    }

    /// Trades move the fair value through the feature engine; no direct
    /// action here.
    pub fn on_trade_update(&mut self, _update: &MarketUpdate, _book: &MarketOrderBook) {}

    /// Lifecycle state is tracked by the order manager.
    pub fn on_order_update(&mut self, _response: &ClientResponse) {}
}
