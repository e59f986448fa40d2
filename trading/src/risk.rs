// Pre-trade risk checks.
//
// Risk lives entirely on the client side; the venue never rejects for risk.
// Each instrument carries a static configuration and every outgoing order is
// checked against it before it leaves the order manager.

use crate::position::PositionInfo;
use common::{Qty, Side, TickerId, MAX_TICKERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskCheckResult {
    Allowed,
    /// Order quantity exceeds the per-order limit.
    OrderTooLarge,
    /// The post-fill projection |position + signed qty| exceeds the limit.
    PositionTooLarge,
    /// Current total pnl is below the loss limit.
    LossTooLarge,
}

impl RiskCheckResult {
    #[inline]
    pub fn is_allowed(self) -> bool {
        self == RiskCheckResult::Allowed
    }
}

/// Static per-instrument limits. `max_loss` is a positive magnitude; the
/// check trips when total pnl drops below `-max_loss`.
#[derive(Debug, Clone, Copy)]
pub struct RiskCfg {
    pub max_order_size: Qty,
    pub max_position: i64,
    pub max_loss: f64,
}

impl Default for RiskCfg {
    fn default() -> Self {
        Self { max_order_size: 1000, max_position: 10_000, max_loss: 100_000.0 }
    }
}

pub struct RiskManager {
    ticker_cfg: Vec<RiskCfg>,
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskManager {
    pub fn new() -> Self {
        Self { ticker_cfg: vec![RiskCfg::default(); MAX_TICKERS] }
    }

    pub fn set_risk_cfg(&mut self, ticker_id: TickerId, cfg: RiskCfg) {
        self.ticker_cfg[ticker_id as usize] = cfg;
    }

    pub fn risk_cfg(&self, ticker_id: TickerId) -> &RiskCfg {
        &self.ticker_cfg[ticker_id as usize]
    }

    /// Checks a prospective order for `ticker_id` against the instrument's
    /// limits and the current position.
    pub fn check_pre_trade_risk(
        &self,
        position: &PositionInfo,
        ticker_id: TickerId,
        side: Side,
        qty: Qty,
    ) -> RiskCheckResult {
        let cfg = &self.ticker_cfg[ticker_id as usize];

        if qty > cfg.max_order_size {
            return RiskCheckResult::OrderTooLarge;
        }

        let projected = position.position + side.value() * qty as i64;
        if projected.abs() > cfg.max_position {
            return RiskCheckResult::PositionTooLarge;
        }

        if position.total_pnl < -cfg.max_loss {
            return RiskCheckResult::LossTooLarge;
        }

        RiskCheckResult::Allowed
    }
}
