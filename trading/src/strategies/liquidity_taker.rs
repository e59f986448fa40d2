// Aggressive liquidity-taking algorithm.
//
// Watches trade prints. When the aggressive-trade-quantity ratio clears the
// instrument's threshold - someone just consumed a large share of the
// displayed size - it follows the aggressor: an aggressive order on the same
// side through the order manager, priced at the touch it will cross. Book
// updates by themselves trigger nothing.

use crate::features::FeatureEngine;
use crate::market_book::MarketOrderBook;
use crate::order_manager::OrderManager;
use crate::position::PositionKeeper;
use crate::risk::RiskManager;
use crate::trade_engine::TickerCfg;
use common::{Price, Side, TickerId, PRICE_INVALID};
use exchange::protocol::{ClientResponse, MarketUpdate};

pub struct LiquidityTaker {
    ticker_cfg: Vec<TickerCfg>,
}

impl LiquidityTaker {
    pub fn new(ticker_cfg: Vec<TickerCfg>) -> Self {
        Self { ticker_cfg }
    }

    pub fn on_trade_update(
        &mut self,
        update: &MarketUpdate,
        book: &MarketOrderBook,
        features: &FeatureEngine,
        order_manager: &mut OrderManager,
        risk_manager: &RiskManager,
        position_keeper: &PositionKeeper,
    ) {
        let bbo = book.bbo();
        let ratio = features.agg_trade_qty_ratio();
        if !bbo.is_valid() || !ratio.is_finite() {
            return;
        }

        let ticker_id = update.ticker_id;
        let cfg = &self.ticker_cfg[ticker_id as usize];
        if ratio < cfg.threshold {
            return;
        }

        match update.side() {
            Some(Side::Buy) => {
                // Follow the buyer: lift the offer, no resting bid wanted.
                order_manager.move_orders(
                    ticker_id,
                    bbo.ask_price,
                    PRICE_INVALID,
                    cfg.clip,
                    risk_manager,
                    position_keeper,
                );
            }
            Some(Side::Sell) => {
                order_manager.move_orders(
                    ticker_id,
                    PRICE_INVALID,
                    bbo.bid_price,
                    cfg.clip,
                    risk_manager,
                    position_keeper,
                );
            }
            _ => {}
        }
    }

    /// Book moves alone carry no signal for this algorithm.
    pub fn on_order_book_update(
        &mut self,
        _ticker_id: TickerId,
        _price: Price,
        _side: Side,
        _book: &MarketOrderBook,
    ) {
    }

    /// Lifecycle state is tracked by the order manager.
    pub fn on_order_update(&mut self, _response: &ClientResponse) {}
}
