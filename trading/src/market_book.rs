// Client-side order-book replica.
//
// Mirrors the engine book's intrusive structure - circular doubly-linked
// price levels (best first) and per-level FIFOs, all linked by arena
// indices - but each order carries only what the market-data stream
// publishes: market order id, side, price, quantity, priority. The venue
// already canonicalized identity, so there is no client id here and the
// lookup is keyed by market order id alone.
//
// After every book-changing update the top-of-book summary (BBO) is
// recomputed by aggregating quantity over the head level of each side.

use common::mem_pool::MemPool;
use common::{
    OrderId, Price, Priority, Qty, Side, TickerId, MAX_ORDER_IDS, MAX_PRICE_LEVELS, PRICE_INVALID,
};
use exchange::protocol::{MarketUpdate, MarketUpdateType};
use std::collections::HashMap;

/// Best bid/offer: top-of-book prices with quantity aggregated across the
/// whole head level.
#[derive(Debug, Clone, Copy)]
pub struct BBO {
    pub bid_price: Price,
    pub bid_qty: Qty,
    pub ask_price: Price,
    pub ask_qty: Qty,
}

impl Default for BBO {
    fn default() -> Self {
        Self::new()
    }
}

impl BBO {
    pub fn new() -> Self {
        Self { bid_price: PRICE_INVALID, bid_qty: 0, ask_price: PRICE_INVALID, ask_qty: 0 }
    }

    #[inline]
    pub fn has_bid(&self) -> bool {
        self.bid_price != PRICE_INVALID && self.bid_qty > 0
    }

    #[inline]
    pub fn has_ask(&self) -> bool {
        self.ask_price != PRICE_INVALID && self.ask_qty > 0
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.has_bid() && self.has_ask()
    }

    #[inline]
    pub fn mid_price(&self) -> Option<f64> {
        if self.is_valid() {
            Some((self.bid_price + self.ask_price) as f64 * 0.5)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MarketOrder {
    order_id: OrderId,
    side: Side,
    price: Price,
    qty: Qty,
    priority: Priority,
    prev: usize,
    next: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct MarketPriceLevel {
    side: Side,
    price: Price,
    first_order: usize,
    prev: usize,
    next: usize,
}

pub struct MarketOrderBook {
    ticker_id: TickerId,
    bids_head: Option<usize>,
    asks_head: Option<usize>,
    price_to_level: Box<[Option<usize>]>,
    orders_by_id: HashMap<OrderId, usize>,
    level_pool: MemPool<MarketPriceLevel>,
    order_pool: MemPool<MarketOrder>,
    bbo: BBO,
}

impl MarketOrderBook {
    pub fn new(ticker_id: TickerId) -> Self {
        Self::with_order_capacity(ticker_id, MAX_ORDER_IDS)
    }

    pub fn with_order_capacity(ticker_id: TickerId, order_capacity: usize) -> Self {
        Self {
            ticker_id,
            bids_head: None,
            asks_head: None,
            price_to_level: vec![None; MAX_PRICE_LEVELS].into_boxed_slice(),
            orders_by_id: HashMap::new(),
            level_pool: MemPool::new(2 * MAX_PRICE_LEVELS),
            order_pool: MemPool::new(order_capacity),
            bbo: BBO::new(),
        }
    }

    #[inline]
    pub fn ticker_id(&self) -> TickerId {
        self.ticker_id
    }

    #[inline]
    pub fn bbo(&self) -> &BBO {
        &self.bbo
    }

    pub fn order_count(&self) -> usize {
        self.orders_by_id.len()
    }

    /// Applies one book-changing update. TRADE frames carry no book state
    /// and are dispatched to the algorithm by the runtime, not applied here;
    /// the snapshot markers never reach the book (the consumer strips them).
    pub fn on_market_update(&mut self, update: &MarketUpdate) {
        match update.update_type() {
            Some(MarketUpdateType::Add) => {
                let side = Side::from_i8(update.side)
                    .unwrap_or_else(|| panic!("ADD with invalid side {}", update.side));
                self.add_order(update.order_id, side, update.price, update.qty, update.priority);
            }
            Some(MarketUpdateType::Modify) => {
                let order_id = update.order_id;
                let handle = *self
                    .orders_by_id
                    .get(&order_id)
                    .unwrap_or_else(|| panic!("MODIFY for unknown order {}", order_id));
                self.order_pool.get_mut(handle).qty = update.qty;
            }
            Some(MarketUpdateType::Cancel) => {
                let order_id = update.order_id;
                let handle = *self
                    .orders_by_id
                    .get(&order_id)
                    .unwrap_or_else(|| panic!("CANCEL for unknown order {}", order_id));
                self.remove_order(handle);
            }
            Some(MarketUpdateType::Clear) => {
                self.clear();
            }
            Some(MarketUpdateType::Trade)
            | Some(MarketUpdateType::SnapshotStart)
            | Some(MarketUpdateType::SnapshotEnd)
            | None => {}
            Some(MarketUpdateType::Invalid) => unreachable!("from_u8 never yields Invalid"),
        }

        self.update_bbo();
    }

    /// Frees the whole replica: pools, lookups, heads and BBO.
    pub fn clear(&mut self) {
        self.orders_by_id.clear();
        self.order_pool.clear();
        self.level_pool.clear();
        self.price_to_level.iter_mut().for_each(|slot| *slot = None);
        self.bids_head = None;
        self.asks_head = None;
        self.bbo = BBO::new();
    }

    fn update_bbo(&mut self) {
        match self.bids_head {
            Some(head) => {
                self.bbo.bid_price = self.level_pool.get(head).price;
                self.bbo.bid_qty = self.level_qty(head);
            }
            None => {
                self.bbo.bid_price = PRICE_INVALID;
                self.bbo.bid_qty = 0;
            }
        }
        match self.asks_head {
            Some(head) => {
                self.bbo.ask_price = self.level_pool.get(head).price;
                self.bbo.ask_qty = self.level_qty(head);
            }
            None => {
                self.bbo.ask_price = PRICE_INVALID;
                self.bbo.ask_qty = 0;
            }
        }
    }

    fn level_qty(&self, level_handle: usize) -> Qty {
        let first = self.level_pool.get(level_handle).first_order;
        let mut qty = 0;
        let mut handle = first;
        loop {
            let order = self.order_pool.get(handle);
            qty += order.qty;
            handle = order.next;
            if handle == first {
                break;
            }
        }
        qty
    }

    fn add_order(&mut self, order_id: OrderId, side: Side, price: Price, qty: Qty, priority: Priority) {
        let handle = self.order_pool.allocate(MarketOrder {
            order_id,
            side,
            price,
            qty,
            priority,
            prev: 0,
            next: 0,
        });

        match self.level_at_price(price) {
            None => {
                {
                    let order = self.order_pool.get_mut(handle);
                    order.prev = handle;
                    order.next = handle;
                }
                let level_handle = self.level_pool.allocate(MarketPriceLevel {
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

        self.orders_by_id.insert(order_id, handle);
    }

    fn remove_order(&mut self, handle: usize) {
        let order = *self.order_pool.get(handle);
        let level_handle = self
            .level_at_price(order.price)
            .unwrap_or_else(|| panic!("order {} has no level at {}", order.order_id, order.price));

        if order.next == handle {
            self.unlink_level(level_handle);
        } else {
            self.order_pool.get_mut(order.prev).next = order.next;
            self.order_pool.get_mut(order.next).prev = order.prev;
            if self.level_pool.get(level_handle).first_order == handle {
                self.level_pool.get_mut(level_handle).first_order = order.next;
            }
        }

        self.orders_by_id.remove(&order.order_id);
        self.order_pool.deallocate(handle);
    }

    #[inline]
    fn price_index(price: Price) -> usize {
        price.rem_euclid(MAX_PRICE_LEVELS as i64) as usize
    }

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

    /// (order id, qty, priority) head-to-tail at one price; test support.
    pub fn level_orders(&self, price: Price) -> Vec<(OrderId, Qty, Priority)> {
        let mut orders = Vec::new();
        let Some(level_handle) = self.level_at_price(price) else { return orders };
        let first = self.level_pool.get(level_handle).first_order;
        let mut handle = first;
        loop {
            let order = self.order_pool.get(handle);
            orders.push((order.order_id, order.qty, order.priority));
            handle = order.next;
            if handle == first {
                break;
            }
        }
        orders
    }

    /// Level prices best-first for one side; test support.
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
}
