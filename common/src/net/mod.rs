//! Socket wrappers shared by the exchange and the trading client.
//!
//! - [`tcp`] - order-entry sockets with kernel receive timestamps
//! - [`multicast`] - market-data multicast send/receive

pub mod multicast;
pub mod tcp;

pub use multicast::MulticastSocket;
pub use tcp::{TcpListener, TcpSocket};
