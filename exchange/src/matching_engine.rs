// Matching engine thread.
//
// Single consumer of the request ring fed by the order server, single
// producer of the response ring (back to the order server) and the market
// update ring (to the publisher). Because every request for an instrument is
// serialized through this one thread, the engine is the totalizer: the
// market updates it emits for an instrument are that instrument's canonical
// event sequence.
//
// A request whose type byte does not decode is a sender-side defect and
// aborts the process; malformed fields inside an otherwise well-typed
// request (side, out-of-range ticker) are the same tier. Business-level
// anomalies (cancel of an unknown order) become reject responses.

use crate::order_book::OrderBook;
use crate::protocol::{
    ClientRequest, ClientRequestQueue, ClientRequestType, ClientResponseQueue, MarketUpdateQueue,
};
use common::logging::{Logger, LogText};
use common::{log_info, Side, TickerId, MAX_TICKERS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct MatchingEngine {
    /// Books indexed directly by ticker id; `None` for unconfigured slots.
    books: Vec<Option<OrderBook>>,
    incoming_requests: Arc<ClientRequestQueue>,
    responses: Arc<ClientResponseQueue>,
    updates: Arc<MarketUpdateQueue>,
    logger: Logger,
    running: Arc<AtomicBool>,
}

impl MatchingEngine {
    pub fn new(
        incoming_requests: Arc<ClientRequestQueue>,
        responses: Arc<ClientResponseQueue>,
        updates: Arc<MarketUpdateQueue>,
        logger: Logger,
        running: Arc<AtomicBool>,
    ) -> Self {
        let mut books = Vec::with_capacity(MAX_TICKERS);
        books.resize_with(MAX_TICKERS, || None);

        Self { books, incoming_requests, responses, updates, logger, running }
    }

    /// Creates the book for `ticker_id` with the full production arena.
    pub fn add_ticker(&mut self, ticker_id: TickerId) {
        let book =
            OrderBook::new(ticker_id, Arc::clone(&self.responses), Arc::clone(&self.updates));
        self.books[ticker_id as usize] = Some(book);
    }

    /// Creates the book for `ticker_id` with a reduced order arena (tests).
    pub fn add_ticker_with_capacity(&mut self, ticker_id: TickerId, order_capacity: usize) {
        let book = OrderBook::with_order_capacity(
            ticker_id,
            order_capacity,
            Arc::clone(&self.responses),
            Arc::clone(&self.updates),
        );
        self.books[ticker_id as usize] = Some(book);
    }

    pub fn ticker_count(&self) -> usize {
        self.books.iter().filter(|b| b.is_some()).count()
    }

    pub fn book(&self, ticker_id: TickerId) -> Option<&OrderBook> {
        self.books.get(ticker_id as usize)?.as_ref()
    }

    /// Routes one request to its book.
    pub fn process_request(&mut self, request: &ClientRequest) {
        let request_type = request
            .request_type()
            .unwrap_or_else(|| panic!("unknown client request type {}", request.msg_type));

        let ticker_id = request.ticker_id;
        let book = self
            .books
            .get_mut(ticker_id as usize)
            .and_then(|b| b.as_mut())
            .unwrap_or_else(|| panic!("request for unconfigured ticker {}", ticker_id));

        let (client_id, order_id) = (request.client_id, request.order_id);
        match request_type {
            ClientRequestType::New => {
                let side = Side::from_i8(request.side)
                    .unwrap_or_else(|| panic!("new order with invalid side {}", request.side));
                book.add(client_id, order_id, side, request.price, request.qty);
            }
            ClientRequestType::Cancel => {
                book.cancel(client_id, order_id);
            }
            ClientRequestType::Invalid => unreachable!("decoded above"),
        }
    }

    /// Busy-polls the request ring until the running flag clears.
    pub fn run(&mut self) {
        log_info!(self.logger, "matching engine started");

        while self.running.load(Ordering::Relaxed) {
            while let Some(request) = self.incoming_requests.next_to_read() {
                let request = *request;
                self.incoming_requests.commit_read();
                self.process_request(&request);
            }
            std::hint::spin_loop();
        }

        log_info!(self.logger, LogText::WithU64("matching engine stopped, tickers", self.ticker_count() as u64));
    }
}
