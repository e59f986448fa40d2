//! The exchange side of the venue: wire protocol, price-time-priority order
//! books, the matching engine, the TCP order server with its FIFO sequencer,
//! the incremental market-data publisher and the snapshot synthesizer.

pub mod market_data;
pub mod matching_engine;
pub mod order_book;
pub mod order_server;
pub mod protocol;
pub mod snapshot;
