// Core identifier types, sentinels and build-time capacity limits shared by
// the exchange and the trading client.

/// Venue-assigned order identifier.
pub type OrderId = u64;
/// Instrument identifier, also used as a direct index into per-ticker tables.
pub type TickerId = u32;
/// Trading account identifier.
pub type ClientId = u32;
/// Fixed-point price (smallest tick units).
pub type Price = i64;
/// Order quantity.
pub type Qty = u32;
/// Queue position within a price level (1 = front).
pub type Priority = u64;
/// Stream sequence number (order entry, incremental and snapshot streams).
pub type SeqNum = u64;

pub const ORDER_ID_INVALID: OrderId = OrderId::MAX;
pub const TICKER_ID_INVALID: TickerId = TickerId::MAX;
pub const CLIENT_ID_INVALID: ClientId = ClientId::MAX;
pub const PRICE_INVALID: Price = Price::MAX;
pub const QTY_INVALID: Qty = Qty::MAX;
pub const PRIORITY_INVALID: Priority = Priority::MAX;

/// Maximum number of instruments hosted by the venue.
pub const MAX_TICKERS: usize = 8;
/// Maximum number of trading clients.
pub const MAX_CLIENTS: usize = 256;
/// Maximum number of live orders per client per instrument.
pub const MAX_ORDER_IDS: usize = 1024 * 1024;
/// Maximum number of distinct price levels per book side; also the modulus of
/// the direct-mapped price lookup.
pub const MAX_PRICE_LEVELS: usize = 256;
/// Capacity of the request / response / market-update rings.
pub const MAX_QUEUE_SIZE: usize = 256 * 1024;
/// Maximum client requests accepted within a single order-server poll cycle.
pub const MAX_PENDING_REQUESTS: usize = 1024;

/// Order side. The numeric value doubles as the sign used in position math.
#[repr(i8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Side {
    #[default]
    Invalid = 0,
    Buy = 1,
    Sell = -1,
}

impl Side {
    /// Decode from the single-byte wire representation.
    #[inline]
    pub fn from_i8(value: i8) -> Option<Side> {
        match value {
            1 => Some(Side::Buy),
            -1 => Some(Side::Sell),
            _ => None,
        }
    }

    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
            Side::Invalid => Side::Invalid,
        }
    }

    /// Signed multiplier: +1 for buys, -1 for sells.
    #[inline]
    pub fn value(self) -> i64 {
        self as i64
    }

    /// Dense index for two-element per-side tables: Buy = 0, Sell = 1.
    ///
    /// # Panics
    /// Panics on `Side::Invalid` - per-side tables only hold tradable sides.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
            Side::Invalid => panic!("Side::Invalid has no table index"),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
            Side::Invalid => "INVALID",
        })
    }
}
