// Signal features derived from market data.
//
// Two features feed the algorithms:
// - fair market price: the quantity-weighted mid, leaning toward the side
//   with less displayed size;
// - aggressive trade quantity ratio: the last trade's quantity relative to
//   the displayed quantity it hit, a crude urgency measure.
//
// Both are NaN until enough state exists to compute them.

use crate::market_book::{MarketOrderBook, BBO};
use common::Side;
use exchange::protocol::MarketUpdate;

/// Sentinel for a feature with no value yet.
pub const FEATURE_INVALID: f64 = f64::NAN;

pub struct FeatureEngine {
    mkt_price: f64,
    agg_trade_qty_ratio: f64,
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureEngine {
    pub fn new() -> Self {
        Self { mkt_price: FEATURE_INVALID, agg_trade_qty_ratio: FEATURE_INVALID }
    }

    /// Fair value estimate; NaN until both sides of the book are present.
    #[inline]
    pub fn mkt_price(&self) -> f64 {
        self.mkt_price
    }

    /// Last trade's aggression ratio; NaN until a trade has been seen.
    #[inline]
    pub fn agg_trade_qty_ratio(&self) -> f64 {
        self.agg_trade_qty_ratio
    }

    /// Recomputes the fair price from a fresh top of book.
    pub fn on_order_book_update(&mut self, bbo: &BBO) {
        if bbo.is_valid() {
            let bid_qty = bbo.bid_qty as f64;
            let ask_qty = bbo.ask_qty as f64;
            self.mkt_price = (bbo.bid_price as f64 * ask_qty + bbo.ask_price as f64 * bid_qty)
                / (bid_qty + ask_qty);
        }
    }

    /// Recomputes the aggression ratio from a trade print. The trade carries
    /// the aggressor's side, so the displayed quantity it consumed is the
    /// opposite side of the book.
    pub fn on_trade_update(&mut self, update: &MarketUpdate, book: &MarketOrderBook) {
        let bbo = book.bbo();
        let resting_qty = match update.side() {
            Some(Side::Buy) => bbo.ask_qty,
            Some(Side::Sell) => bbo.bid_qty,
            _ => return,
        };
        if resting_qty > 0 {
            self.agg_trade_qty_ratio = update.qty as f64 / resting_qty as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Side, PRIORITY_INVALID};
    use exchange::protocol::MarketUpdateType;

    #[test]
    fn features_start_invalid() {
        let features = FeatureEngine::new();
        assert!(features.mkt_price().is_nan());
        assert!(features.agg_trade_qty_ratio().is_nan());
    }

    #[test]
    fn fair_price_weights_toward_the_thin_side() {
        let mut features = FeatureEngine::new();
        let bbo = BBO { bid_price: 100, bid_qty: 30, ask_price: 102, ask_qty: 10 };
        features.on_order_book_update(&bbo);

        // (100*10 + 102*30) / 40 = 101.5: the heavier bid size pushes the
        // fair price toward the ask.
        assert!((features.mkt_price() - 101.5).abs() < 1e-9);
    }

    #[test]
    fn one_sided_book_keeps_the_previous_fair_price() {
        let mut features = FeatureEngine::new();
        features.on_order_book_update(&BBO {
            bid_price: 100,
            bid_qty: 10,
            ask_price: 102,
            ask_qty: 10,
        });
        let before = features.mkt_price();

        features.on_order_book_update(&BBO::new());
        assert!((features.mkt_price() - before).abs() < 1e-9);
    }

    #[test]
    fn trade_ratio_uses_the_resting_side() {
        let mut features = FeatureEngine::new();
        let mut book = MarketOrderBook::with_order_capacity(0, 64);
        book.on_market_update(&MarketUpdate::new(
            MarketUpdateType::Add,
            1,
            0,
            Side::Sell,
            102,
            20,
            1,
        ));
        book.on_market_update(&MarketUpdate::new(
            MarketUpdateType::Add,
            2,
            0,
            Side::Buy,
            100,
            40,
            1,
        ));

        // Aggressive buy for 5 against 20 displayed at the ask.
        let trade = MarketUpdate::new(
            MarketUpdateType::Trade,
            common::ORDER_ID_INVALID,
            0,
            Side::Buy,
            102,
            5,
            PRIORITY_INVALID,
        );
        features.on_trade_update(&trade, &book);
        assert!((features.agg_trade_qty_ratio() - 0.25).abs() < 1e-9);

        // Aggressive sell for 10 against 40 displayed at the bid.
        let trade = MarketUpdate::new(
            MarketUpdateType::Trade,
            common::ORDER_ID_INVALID,
            0,
            Side::Sell,
            100,
            10,
            PRIORITY_INVALID,
        );
        features.on_trade_update(&trade, &book);
        assert!((features.agg_trade_qty_ratio() - 0.25).abs() < 1e-9);
    }
}
