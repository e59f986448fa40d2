// Trading algorithms.
//
// An algorithm fills three callback slots: order-book updates, trade prints,
// and venue responses for its own orders. The choice is made once at startup,
// so dispatch is a tagged enum rather than a trait object.

pub mod liquidity_taker;
pub mod market_maker;

pub use liquidity_taker::LiquidityTaker;
pub use market_maker::MarketMaker;

use crate::market_book::MarketOrderBook;
use crate::features::FeatureEngine;
use crate::order_manager::OrderManager;
use crate::position::PositionKeeper;
use crate::risk::RiskManager;
use common::{Price, Side, TickerId};
use exchange::protocol::{ClientResponse, MarketUpdate};

/// The algorithm driving this trading session.
pub enum TradeAlgo {
    MarketMaker(MarketMaker),
    LiquidityTaker(LiquidityTaker),
    /// Passive session: consume market data, send nothing.
    None,
}

impl TradeAlgo {
    /// Order book changed for `ticker_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn on_order_book_update(
        &mut self,
        ticker_id: TickerId,
        price: Price,
        side: Side,
        book: &MarketOrderBook,
        features: &FeatureEngine,
        order_manager: &mut OrderManager,
        risk_manager: &RiskManager,
        position_keeper: &PositionKeeper,
    ) {
        match self {
            TradeAlgo::MarketMaker(algo) => algo.on_order_book_update(
                ticker_id,
                price,
                side,
                book,
                features,
                order_manager,
                risk_manager,
                position_keeper,
            ),
            TradeAlgo::LiquidityTaker(algo) => {
                algo.on_order_book_update(ticker_id, price, side, book)
            }
            TradeAlgo::None => {}
        }
    }

    /// A trade printed on the incremental stream.
    pub fn on_trade_update(
        &mut self,
        update: &MarketUpdate,
        book: &MarketOrderBook,
        features: &FeatureEngine,
        order_manager: &mut OrderManager,
        risk_manager: &RiskManager,
        position_keeper: &PositionKeeper,
    ) {
        match self {
            TradeAlgo::MarketMaker(algo) => algo.on_trade_update(update, book),
            TradeAlgo::LiquidityTaker(algo) => algo.on_trade_update(
                update,
                book,
                features,
                order_manager,
                risk_manager,
                position_keeper,
            ),
            TradeAlgo::None => {}
        }
    }

    /// The venue answered one of our orders.
    pub fn on_order_update(&mut self, response: &ClientResponse) {
        match self {
            TradeAlgo::MarketMaker(algo) => algo.on_order_update(response),
            TradeAlgo::LiquidityTaker(algo) => algo.on_order_update(response),
            TradeAlgo::None => {}
        }
    }
}
