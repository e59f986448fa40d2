// Position and pnl tracking.
//
// Each instrument carries a signed position, realized and unrealized pnl,
// cumulative traded volume, and two open-VWAP accumulators keyed by side.
// The accumulator of the side that opened the position holds the running sum
// of price * qty for the opening fills; dividing by |position| yields the
// open volume-weighted average price.
//
// Fills that agree with the position's sign (or arrive flat) extend the
// opening side's accumulator. Fills against the sign realize pnl on the
// closed portion at the open VWAP, shrink the opposite accumulator
// proportionally, and on a sign flip reseed the accumulators with the
// residual at the fill price. Unrealized pnl is marked at the latest fill
// price, and re-marked at the BBO mid whenever top-of-book moves.

use crate::market_book::BBO;
use common::{Price, Qty, Side, TickerId, MAX_TICKERS, PRICE_INVALID};
use exchange::protocol::{ClientResponse, ClientResponseType};

#[derive(Debug, Clone, Default)]
pub struct PositionInfo {
    pub position: i64,
    pub real_pnl: f64,
    pub unreal_pnl: f64,
    pub total_pnl: f64,
    /// Sum of price * qty for position-opening fills, indexed by
    /// `Side::index()` (buys open longs, sells open shorts).
    pub open_vwap: [f64; 2],
    pub volume: u64,
    /// Latest top-of-book seen for this instrument.
    pub bbo: BBO,
}

impl PositionInfo {
    /// Applies one execution.
    pub fn add_fill(&mut self, side: Side, exec_qty: Qty, price: Price) {
        let old_position = self.position;
        let side_index = side.index();
        let opp_index = side.opposite().index();
        let side_value = side.value();
        let price_f = price as f64;
        let qty_f = exec_qty as f64;

        self.position += exec_qty as i64 * side_value;
        self.volume += exec_qty as u64;

        if old_position * side_value >= 0 {
            // Opening or increasing: extend this side's accumulator.
            self.open_vwap[side_index] += price_f * qty_f;
        } else {
            // Reducing: realize against the opposite side's open VWAP and
            // shrink that accumulator to the remaining size.
            let opp_vwap = self.open_vwap[opp_index] / old_position.abs() as f64;
            self.open_vwap[opp_index] = opp_vwap * self.position.abs() as f64;
            let closed_qty = (exec_qty as i64).min(old_position.abs());
            self.real_pnl += closed_qty as f64 * (opp_vwap - price_f) * side_value as f64;

            if self.position * old_position < 0 {
                // Sign flipped: the residual opens a fresh position here.
                self.open_vwap[side_index] = price_f * self.position.abs() as f64;
                self.open_vwap[opp_index] = 0.0;
            }
        }

        if self.position == 0 {
            self.open_vwap = [0.0, 0.0];
            self.unreal_pnl = 0.0;
        } else if self.position > 0 {
            self.unreal_pnl = (price_f - self.open_vwap[Side::Buy.index()] / self.position.abs() as f64)
                * self.position.abs() as f64;
        } else {
            self.unreal_pnl = (self.open_vwap[Side::Sell.index()] / self.position.abs() as f64 - price_f)
                * self.position.abs() as f64;
        }

        self.total_pnl = self.unreal_pnl + self.real_pnl;
    }

    /// Re-marks unrealized pnl at the mid price of a fresh BBO.
    pub fn update_bbo(&mut self, bbo: &BBO) {
        self.bbo = *bbo;

        if self.position == 0 || bbo.bid_price == PRICE_INVALID || bbo.ask_price == PRICE_INVALID {
            return;
        }

        let mid = (bbo.bid_price + bbo.ask_price) as f64 * 0.5;
        if self.position > 0 {
            self.unreal_pnl = (mid - self.open_vwap[Side::Buy.index()] / self.position.abs() as f64)
                * self.position.abs() as f64;
        } else {
            self.unreal_pnl = (self.open_vwap[Side::Sell.index()] / self.position.abs() as f64 - mid)
                * self.position.abs() as f64;
        }
        self.total_pnl = self.unreal_pnl + self.real_pnl;
    }
}

/// Per-instrument position table for one trading account.
pub struct PositionKeeper {
    positions: Vec<PositionInfo>,
}

impl Default for PositionKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionKeeper {
    pub fn new() -> Self {
        Self { positions: vec![PositionInfo::default(); MAX_TICKERS] }
    }

    /// Applies a FILLED response to its instrument's position.
    pub fn add_fill(&mut self, response: &ClientResponse) {
        debug_assert_eq!(response.response_type(), Some(ClientResponseType::Filled));
        let side = Side::from_i8(response.side)
            .unwrap_or_else(|| panic!("fill with invalid side {}", response.side));
        self.positions[response.ticker_id as usize].add_fill(side, response.exec_qty, response.price);
    }

    pub fn update_bbo(&mut self, ticker_id: TickerId, bbo: &BBO) {
        self.positions[ticker_id as usize].update_bbo(bbo);
    }

    #[inline]
    pub fn position(&self, ticker_id: TickerId) -> &PositionInfo {
        &self.positions[ticker_id as usize]
    }

    pub fn total_pnl(&self) -> f64 {
        self.positions.iter().map(|p| p.total_pnl).sum()
    }
}
