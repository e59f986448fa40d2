// Price-time-priority limit order book.
//
// Structure, per instrument:
// - two circular doubly-linked lists of price levels (bids and asks), most
//   aggressive level first, with a separate head reference per side;
// - per level, a circular doubly-linked FIFO of orders (head = oldest);
// - all links are arena indices into fixed-capacity pools, never references;
// - a direct-mapped `price mod MAX_PRICE_LEVELS` lookup from price to level.
//   The active price window must stay narrower than MAX_PRICE_LEVELS ticks;
//   a slot already holding a different live price is a fatal invariant
//   breach, not a runtime case;
// - a (client, client-order-id) map to the resting order.
//
// Matching consumes only the first order of the best level per iteration;
// the enclosing loop re-enters until the aggressor is exhausted or no level
// crosses. Responses and market updates are written straight onto the shared
// rings, aggressor response before passive response for every fill.

use crate::protocol::{
    ClientResponse, ClientResponseQueue, ClientResponseType, MarketUpdate, MarketUpdateQueue,
    MarketUpdateType,
};
use common::mem_pool::MemPool;
use common::{
    ClientId, OrderId, Price, Priority, Qty, Side, TickerId, MAX_ORDER_IDS, MAX_PRICE_LEVELS,
    ORDER_ID_INVALID, PRICE_INVALID, PRIORITY_INVALID, QTY_INVALID,
};
use std::collections::HashMap;
use std::sync::Arc;

/// A resting order. `prev`/`next` are arena indices forming the circular
/// FIFO at the order's price level.
#[derive(Debug, Clone, Copy, Default)]
pub struct Order {
    pub ticker_id: TickerId,
    pub client_id: ClientId,
    pub client_order_id: OrderId,
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
    prev: usize,
    next: usize,
}

/// One price level. `prev`/`next` are arena indices forming the circular
/// level list of the owning side.
#[derive(Debug, Clone, Copy, Default)]
struct PriceLevel {
    side: Side,
    price: Price,
    first_order: usize,
    prev: usize,
    next: usize,
}

pub struct OrderBook {
    ticker_id: TickerId,
    /// Best bid level, or `None` when the bid side is empty.
    bids_head: Option<usize>,
    /// Best ask level, or `None` when the ask side is empty.
    asks_head: Option<usize>,
    /// Direct-mapped price lookup keyed by `price mod MAX_PRICE_LEVELS`.
    price_to_level: Box<[Option<usize>]>,
    /// Live orders by (owning client, client-assigned order id).
    client_orders: HashMap<(ClientId, OrderId), usize>,
    level_pool: MemPool<PriceLevel>,
    order_pool: MemPool<Order>,
    next_market_order_id: OrderId,
    responses: Arc<ClientResponseQueue>,
    updates: Arc<MarketUpdateQueue>,
}

impl OrderBook {
    pub fn new(
        ticker_id: TickerId,
        responses: Arc<ClientResponseQueue>,
        updates: Arc<MarketUpdateQueue>,
    ) -> Self {
        Self::with_order_capacity(ticker_id, MAX_ORDER_IDS, responses, updates)
    }

    /// Book with a reduced order arena; tests use this so a book does not
    /// pre-construct a million order slots.
    pub fn with_order_capacity(
        ticker_id: TickerId,
        order_capacity: usize,
        responses: Arc<ClientResponseQueue>,
        updates: Arc<MarketUpdateQueue>,
    ) -> Self {
        Self {
            ticker_id,
            bids_head: None,
            asks_head: None,
            price_to_level: vec![None; MAX_PRICE_LEVELS].into_boxed_slice(),
            client_orders: HashMap::new(),
            level_pool: MemPool::new(2 * MAX_PRICE_LEVELS),
            order_pool: MemPool::new(order_capacity),
            next_market_order_id: 1,
            responses,
            updates,
        }
    }

    #[inline]
    pub fn ticker_id(&self) -> TickerId {
        self.ticker_id
    }

    /// Accepts a new order: assigns the market order id, acknowledges,
    /// crosses against the far side, and rests any residual quantity.
    pub fn add(
        &mut self,
        client_id: ClientId,
        client_order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) {
        let market_order_id = self.next_market_order_id;
        self.next_market_order_id += 1;

        self.send_client_response(ClientResponse::new(
            ClientResponseType::Accepted,
            client_id,
            self.ticker_id,
            client_order_id,
            market_order_id,
            side,
            price,
            0,
            qty,
        ));

        let leaves_qty = self.check_for_match(client_id, client_order_id, side, price, qty, market_order_id);

        if leaves_qty > 0 {
            let priority = self.next_priority(price);
            let handle = self.order_pool.allocate(Order {
                ticker_id: self.ticker_id,
                client_id,
                client_order_id,
                market_order_id,
                side,
                price,
                qty: leaves_qty,
                priority,
                prev: 0,
                next: 0,
            });
            self.attach_order(handle);

            self.send_market_update(MarketUpdate::new(
                MarketUpdateType::Add,
                market_order_id,
                self.ticker_id,
                side,
                price,
                leaves_qty,
                priority,
            ));
        }
    }

    /// Cancels a resting order. Unknown or foreign (client, order id) pairs
    /// get a CANCEL_REJECTED and leave the book untouched.
    pub fn cancel(&mut self, client_id: ClientId, order_id: OrderId) {
        let Some(handle) = self.client_orders.get(&(client_id, order_id)).copied() else {
            self.send_client_response(ClientResponse::new(
                ClientResponseType::CancelRejected,
                client_id,
                self.ticker_id,
                order_id,
                ORDER_ID_INVALID,
                Side::Invalid,
                PRICE_INVALID,
                QTY_INVALID,
                QTY_INVALID,
            ));
            return;
        };

        let order = *self.order_pool.get(handle);

        self.send_client_response(ClientResponse::new(
            ClientResponseType::Canceled,
            client_id,
            self.ticker_id,
            order_id,
            order.market_order_id,
            order.side,
            order.price,
            QTY_INVALID,
            order.qty,
        ));
        self.send_market_update(MarketUpdate::new(
            MarketUpdateType::Cancel,
            order.market_order_id,
            self.ticker_id,
            order.side,
            order.price,
            0,
            order.priority,
        ));

        self.detach_order(handle);
    }

    /// Crossing loop. Matches the aggressor against the first order of the
    /// best far-side level, one resting order per iteration, until the
    /// aggressor is exhausted or no level crosses. Returns the aggressor's
    /// remaining quantity.
    fn check_for_match(
        &mut self,
        client_id: ClientId,
        client_order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
        new_market_order_id: OrderId,
    ) -> Qty {
        let mut leaves_qty = qty;

        while leaves_qty > 0 {
            let Some(best_handle) = (match side {
                Side::Buy => self.asks_head,
                Side::Sell => self.bids_head,
                Side::Invalid => unreachable!("matching an invalid side"),
            }) else {
                break;
            };

            let best_price = self.level_pool.get(best_handle).price;
            let crosses = match side {
                Side::Buy => price >= best_price,
                Side::Sell => price <= best_price,
                Side::Invalid => unreachable!(),
            };
            if !crosses {
                break;
            }

            let passive_handle = self.level_pool.get(best_handle).first_order;
            let passive = *self.order_pool.get(passive_handle);
            let fill_qty = leaves_qty.min(passive.qty);
            let passive_leaves = passive.qty - fill_qty;
            leaves_qty -= fill_qty;
            self.order_pool.get_mut(passive_handle).qty = passive_leaves;

            // Aggressor's fill first, then the resting owner's.
            self.send_client_response(ClientResponse::new(
                ClientResponseType::Filled,
                client_id,
                self.ticker_id,
                client_order_id,
                new_market_order_id,
                side,
                passive.price,
                fill_qty,
                leaves_qty,
            ));
            self.send_client_response(ClientResponse::new(
                ClientResponseType::Filled,
                passive.client_id,
                self.ticker_id,
                passive.client_order_id,
                passive.market_order_id,
                passive.side,
                passive.price,
                fill_qty,
                passive_leaves,
            ));

            // TRADE carries the aggressor's side; consumers must not infer
            // resting-side direction from it.
            self.send_market_update(MarketUpdate::new(
                MarketUpdateType::Trade,
                ORDER_ID_INVALID,
                self.ticker_id,
                side,
                passive.price,
                fill_qty,
                PRIORITY_INVALID,
            ));

            if passive_leaves == 0 {
                self.send_market_update(MarketUpdate::new(
                    MarketUpdateType::Cancel,
                    passive.market_order_id,
                    self.ticker_id,
                    passive.side,
                    passive.price,
                    passive.qty,
                    PRIORITY_INVALID,
                ));
                self.detach_order(passive_handle);
            } else {
                self.send_market_update(MarketUpdate::new(
                    MarketUpdateType::Modify,
                    passive.market_order_id,
                    self.ticker_id,
                    passive.side,
                    passive.price,
                    passive_leaves,
                    passive.priority,
                ));
            }
        }

        leaves_qty
    }

    // ------------------------------------------------------------------
    // Level and order list surgery
    // ------------------------------------------------------------------

    #[inline]
    fn price_index(price: Price) -> usize {
        price.rem_euclid(MAX_PRICE_LEVELS as i64) as usize
    }

    /// Level holding `price`, if any. A slot occupied by a different price
    /// means two live prices collided in the direct map, which violates the
    /// narrow-active-window contract.
    fn level_at_price(&self, price: Price) -> Option<usize> {
        let handle = self.price_to_level[Self::price_index(price)]?;
        let level = self.level_pool.get(handle);
        assert!(
            level.price == price,
            "price slot collision: live {} vs requested {}",
            level.price,
            price
        );
        Some(handle)
    }

    /// Priority the next order at `price` would receive: one past the
    /// current tail, or 1 on a fresh level.
    fn next_priority(&self, price: Price) -> Priority {
        match self.level_at_price(price) {
            None => 1,
            Some(handle) => {
                let first = self.level_pool.get(handle).first_order;
                let tail = self.order_pool.get(first).prev;
                self.order_pool.get(tail).priority + 1
            }
        }
    }

    /// Links a freshly allocated order at the tail of its level's FIFO,
    /// creating and splicing in the level if needed, and indexes it by
    /// (client, client-order-id).
    fn attach_order(&mut self, handle: usize) {
        let (client_id, client_order_id, side, price) = {
            let order = self.order_pool.get(handle);
            (order.client_id, order.client_order_id, order.side, order.price)
        };

        match self.level_at_price(price) {
            None => {
                {
                    let order = self.order_pool.get_mut(handle);
                    order.prev = handle;
                    order.next = handle;
                }
                let level_handle = self.level_pool.allocate(PriceLevel {
                    side,
                    price,
                    first_order: handle,
                    prev: 0,
                    next: 0,
                });
                self.price_to_level[Self::price_index(price)] = Some(level_handle);
                self.link_level(level_handle);
            }
            Some(level_handle) => {
                let first = self.level_pool.get(level_handle).first_order;
                let tail = self.order_pool.get(first).prev;
                self.order_pool.get_mut(tail).next = handle;
                {
                    let order = self.order_pool.get_mut(handle);
                    order.prev = tail;
                    order.next = first;
                }
                self.order_pool.get_mut(first).prev = handle;
            }
        }

        self.client_orders.insert((client_id, client_order_id), handle);
    }

    /// Unlinks an order from its level FIFO and both lookups, collapsing the
    /// level when the last order departs.
    fn detach_order(&mut self, handle: usize) {
        let order = *self.order_pool.get(handle);
        let level_handle = self
            .level_at_price(order.price)
            .unwrap_or_else(|| panic!("order {} has no level at {}", order.market_order_id, order.price));

        if order.next == handle {
            self.unlink_level(level_handle);
        } else {
            self.order_pool.get_mut(order.prev).next = order.next;
            self.order_pool.get_mut(order.next).prev = order.prev;
            if self.level_pool.get(level_handle).first_order == handle {
                self.level_pool.get_mut(level_handle).first_order = order.next;
            }
        }

        self.client_orders.remove(&(order.client_id, order.client_order_id));
        self.order_pool.deallocate(handle);
    }

    /// Splices a new level into its side's circular list, keeping the list
    /// most-aggressive-first and the head pointing at the best level.
    fn link_level(&mut self, handle: usize) {
        let (side, price) = {
            let level = self.level_pool.get(handle);
            (level.side, level.price)
        };

        let Some(head) = self.head_of(side) else {
            let level = self.level_pool.get_mut(handle);
            level.prev = handle;
            level.next = handle;
            self.set_head(side, Some(handle));
            return;
        };

        // Find the first level the new one outranks; insert before it. If
        // none, the new level is the least aggressive and goes at the tail.
        let mut target = head;
        let mut insert_before = false;
        loop {
            let target_price = self.level_pool.get(target).price;
            if Self::more_aggressive(side, price, target_price) {
                insert_before = true;
                break;
            }
            target = self.level_pool.get(target).next;
            if target == head {
                break;
            }
        }

        if insert_before {
            let prev = self.level_pool.get(target).prev;
            {
                let level = self.level_pool.get_mut(handle);
                level.prev = prev;
                level.next = target;
            }
            self.level_pool.get_mut(prev).next = handle;
            self.level_pool.get_mut(target).prev = handle;
            if target == head {
                self.set_head(side, Some(handle));
            }
        } else {
            let tail = self.level_pool.get(head).prev;
            {
                let level = self.level_pool.get_mut(handle);
                level.prev = tail;
                level.next = head;
            }
            self.level_pool.get_mut(tail).next = handle;
            self.level_pool.get_mut(head).prev = handle;
        }
    }

    /// Removes an empty level from its side's list and the price map.
    fn unlink_level(&mut self, handle: usize) {
        let (side, price, prev, next) = {
            let level = self.level_pool.get(handle);
            (level.side, level.price, level.prev, level.next)
        };

        if next == handle {
            self.set_head(side, None);
        } else {
            self.level_pool.get_mut(prev).next = next;
            self.level_pool.get_mut(next).prev = prev;
            if self.head_of(side) == Some(handle) {
                self.set_head(side, Some(next));
            }
        }

        self.price_to_level[Self::price_index(price)] = None;
        self.level_pool.deallocate(handle);
    }

    #[inline]
    fn more_aggressive(side: Side, a: Price, b: Price) -> bool {
        match side {
            Side::Buy => a > b,
            Side::Sell => a < b,
            Side::Invalid => unreachable!(),
        }
    }

    #[inline]
    fn head_of(&self, side: Side) -> Option<usize> {
        match side {
            Side::Buy => self.bids_head,
            Side::Sell => self.asks_head,
            Side::Invalid => unreachable!(),
        }
    }

    #[inline]
    fn set_head(&mut self, side: Side, head: Option<usize>) {
        match side {
            Side::Buy => self.bids_head = head,
            Side::Sell => self.asks_head = head,
            Side::Invalid => unreachable!(),
        }
    }

    #[inline]
    fn send_client_response(&self, response: ClientResponse) {
        *self.responses.next_to_write() = response;
        self.responses.commit_write();
    }

    #[inline]
    fn send_market_update(&self, update: MarketUpdate) {
        *self.updates.next_to_write() = update;
        self.updates.commit_write();
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn best_bid(&self) -> Option<Price> {
        self.bids_head.map(|h| self.level_pool.get(h).price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks_head.map(|h| self.level_pool.get(h).price)
    }

    pub fn order_count(&self) -> usize {
        self.client_orders.len()
    }

    pub fn get_order(&self, client_id: ClientId, client_order_id: OrderId) -> Option<&Order> {
        let handle = self.client_orders.get(&(client_id, client_order_id))?;
        Some(self.order_pool.get(*handle))
    }

    /// Level prices best-first for one side.
    pub fn side_prices(&self, side: Side) -> Vec<Price> {
        let mut prices = Vec::new();
        let Some(head) = self.head_of(side) else { return prices };
        let mut handle = head;
        loop {
            prices.push(self.level_pool.get(handle).price);
            handle = self.level_pool.get(handle).next;
            if handle == head {
                break;
            }
        }
        prices
    }

    /// (market order id, qty, priority) head-to-tail at one price.
    pub fn level_orders(&self, price: Price) -> Vec<(OrderId, Qty, Priority)> {
        let mut orders = Vec::new();
        let Some(level_handle) = self.level_at_price(price) else { return orders };
        let first = self.level_pool.get(level_handle).first_order;
        let mut handle = first;
        loop {
            let order = self.order_pool.get(handle);
            orders.push((order.market_order_id, order.qty, order.priority));
            handle = order.next;
            if handle == first {
                break;
            }
        }
        orders
    }

    /// Walks both sides and panics on any structural violation: level lists
    /// not strictly ordered, level FIFOs with non-increasing priorities, or
    /// orders unreachable from the lookups.
    pub fn check_invariants(&self) {
        let mut reachable = 0usize;
        for side in [Side::Buy, Side::Sell] {
            let prices = self.side_prices(side);
            for pair in prices.windows(2) {
                let ordered = match side {
                    Side::Buy => pair[0] > pair[1],
                    Side::Sell => pair[0] < pair[1],
                    Side::Invalid => unreachable!(),
                };
                assert!(ordered, "{} levels out of order: {} then {}", side, pair[0], pair[1]);
            }
            for price in prices {
                let orders = self.level_orders(price);
                for pair in orders.windows(2) {
                    assert!(
                        pair[0].2 < pair[1].2,
                        "priorities out of order at {}: {} then {}",
                        price,
                        pair[0].2,
                        pair[1].2
                    );
                }
                reachable += orders.len();
            }
        }
        assert_eq!(reachable, self.client_orders.len(), "orders unreachable from side heads");
    }
}
