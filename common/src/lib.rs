//! Building blocks shared by the exchange and the trading client: core id
//! types and limits, the SPSC ring used for every inter-thread hand-off, the
//! memory arena backing the order books, the background logger, monotonic
//! timestamps and the socket wrappers.

pub mod lf_queue;
pub mod logging;
pub mod mem_pool;
pub mod net;
pub mod time;
pub mod types;

pub use types::{
    ClientId, OrderId, Price, Priority, Qty, SeqNum, Side, TickerId, CLIENT_ID_INVALID,
    MAX_CLIENTS, MAX_ORDER_IDS, MAX_PENDING_REQUESTS, MAX_PRICE_LEVELS, MAX_QUEUE_SIZE,
    MAX_TICKERS, ORDER_ID_INVALID, PRICE_INVALID, PRIORITY_INVALID, QTY_INVALID,
    TICKER_ID_INVALID,
};
