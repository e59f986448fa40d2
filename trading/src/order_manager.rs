// Order manager.
//
// Hides order lifecycle bookkeeping from the algorithms: at most one managed
// order per (instrument, side), each walking the state machine
//
//   Invalid/Dead -> PendingNew -> Live -> PendingCancel -> Dead
//
// `move_orders` is the whole algorithm-facing surface: "have one order of
// `clip` working at this bid price and one at this ask price". A live order
// at the wrong price gets cancelled (its replacement goes out once the
// cancel is confirmed); a dead slot with a valid target price gets a
// risk-checked NEW; pending slots are left alone until the venue answers.
// An invalid target price means "no order on that side".
//
// Outgoing requests are written to the gateway ring; client order ids are
// assigned monotonically here.

use crate::position::PositionKeeper;
use crate::risk::{RiskCheckResult, RiskManager};
use common::{ClientId, OrderId, Price, Qty, Side, TickerId, MAX_TICKERS, PRICE_INVALID};
use exchange::protocol::{
    ClientRequest, ClientRequestQueue, ClientResponse, ClientResponseType,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OMOrderState {
    #[default]
    Invalid,
    PendingNew,
    Live,
    PendingCancel,
    Dead,
}

/// One managed order slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct OMOrder {
    pub ticker_id: TickerId,
    pub order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub state: OMOrderState,
}

pub struct OrderManager {
    client_id: ClientId,
    /// One (bid, ask) slot pair per instrument, indexed by `Side::index()`.
    ticker_side_orders: Vec<[OMOrder; 2]>,
    /// Trade engine -> order gateway.
    outgoing_requests: Arc<ClientRequestQueue>,
    next_order_id: OrderId,
    risk_rejections: u64,
}

impl OrderManager {
    pub fn new(client_id: ClientId, outgoing_requests: Arc<ClientRequestQueue>) -> Self {
        Self {
            client_id,
            ticker_side_orders: vec![[OMOrder::default(); 2]; MAX_TICKERS],
            outgoing_requests,
            next_order_id: 1,
            risk_rejections: 0,
        }
    }

    #[inline]
    pub fn order(&self, ticker_id: TickerId, side: Side) -> &OMOrder {
        &self.ticker_side_orders[ticker_id as usize][side.index()]
    }

    #[inline]
    pub fn risk_rejections(&self) -> u64 {
        self.risk_rejections
    }

    /// Advances the managed order's state machine from a venue response.
    pub fn on_order_update(&mut self, response: &ClientResponse) {
        // Rejects for unknown orders carry no side; nothing is tracked for
        // them anyway.
        let Some(side) = response.side() else { return };

        let order = &mut self.ticker_side_orders[response.ticker_id as usize][side.index()];
        match response.response_type() {
            Some(ClientResponseType::Accepted) => {
                order.state = OMOrderState::Live;
            }
            Some(ClientResponseType::Canceled) => {
                order.state = OMOrderState::Dead;
            }
            Some(ClientResponseType::Filled) => {
                order.qty = response.leaves_qty;
                if order.qty == 0 {
                    order.state = OMOrderState::Dead;
                }
            }
            Some(ClientResponseType::CancelRejected) | Some(ClientResponseType::Invalid) | None => {}
        }
    }

    /// Works both sides of `ticker_id` toward the requested quotes.
    pub fn move_orders(
        &mut self,
        ticker_id: TickerId,
        bid_price: Price,
        ask_price: Price,
        clip: Qty,
        risk_manager: &RiskManager,
        position_keeper: &PositionKeeper,
    ) {
        self.move_order(ticker_id, Side::Buy, bid_price, clip, risk_manager, position_keeper);
        self.move_order(ticker_id, Side::Sell, ask_price, clip, risk_manager, position_keeper);
    }

    fn move_order(
        &mut self,
        ticker_id: TickerId,
        side: Side,
        price: Price,
        qty: Qty,
        risk_manager: &RiskManager,
        position_keeper: &PositionKeeper,
    ) {
        let order = self.ticker_side_orders[ticker_id as usize][side.index()];
        match order.state {
            OMOrderState::Live => {
                if order.price != price {
                    self.cancel_order(ticker_id, side);
                }
            }
            OMOrderState::Invalid | OMOrderState::Dead => {
                if price != PRICE_INVALID {
                    let verdict = risk_manager.check_pre_trade_risk(
                        position_keeper.position(ticker_id),
                        ticker_id,
                        side,
                        qty,
                    );
                    if verdict == RiskCheckResult::Allowed {
                        self.new_order(ticker_id, side, price, qty);
                    } else {
                        self.risk_rejections += 1;
                    }
                }
            }
            // In flight; wait for the venue's answer.
            OMOrderState::PendingNew | OMOrderState::PendingCancel => {}
        }
    }

    fn new_order(&mut self, ticker_id: TickerId, side: Side, price: Price, qty: Qty) {
        let order_id = self.next_order_id;
        self.next_order_id += 1;

        let request = ClientRequest::new_order(self.client_id, ticker_id, order_id, side, price, qty);
        *self.outgoing_requests.next_to_write() = request;
        self.outgoing_requests.commit_write();

        self.ticker_side_orders[ticker_id as usize][side.index()] = OMOrder {
            ticker_id,
            order_id,
            side,
            price,
            qty,
            state: OMOrderState::PendingNew,
        };
    }

    fn cancel_order(&mut self, ticker_id: TickerId, side: Side) {
        let order = &mut self.ticker_side_orders[ticker_id as usize][side.index()];

        let request = ClientRequest::cancel_order(
            self.client_id,
            ticker_id,
            order.order_id,
            side,
            order.price,
            order.qty,
        );
        *self.outgoing_requests.next_to_write() = request;
        self.outgoing_requests.commit_write();

        order.state = OMOrderState::PendingCancel;
    }
}
