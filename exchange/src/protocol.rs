// Wire protocol shared by the exchange and its clients.
//
// Every record is `#[repr(C, packed)]`, little-endian, with zero-copy
// encode/decode through zerocopy. Three records cross process boundaries:
//
// - `ClientRequest`  (30 bytes) - client -> order server
// - `ClientResponse` (42 bytes) - order server -> client
// - `MarketUpdate`   (34 bytes) - publisher -> multicast subscribers
//
// On the sockets each record is framed with a leading sequence number
// (`Sequenced*`, 38/50/42 bytes). Inside the process the bare records ride
// the SPSC rings.

use common::lf_queue::LFQueue;
use common::{
    ClientId, OrderId, Price, Priority, Qty, SeqNum, Side, TickerId, MAX_QUEUE_SIZE,
    ORDER_ID_INVALID, PRICE_INVALID, PRIORITY_INVALID, QTY_INVALID, TICKER_ID_INVALID,
};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ============================================================================
// Message type enums (single wire byte each)
// ============================================================================

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequestType {
    Invalid = 0,
    New = 1,
    Cancel = 2,
}

impl ClientRequestType {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ClientRequestType::New),
            2 => Some(ClientRequestType::Cancel),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientResponseType {
    Invalid = 0,
    Accepted = 1,
    Canceled = 2,
    Filled = 3,
    CancelRejected = 4,
}

impl ClientResponseType {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ClientResponseType::Accepted),
            2 => Some(ClientResponseType::Canceled),
            3 => Some(ClientResponseType::Filled),
            4 => Some(ClientResponseType::CancelRejected),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketUpdateType {
    Invalid = 0,
    Clear = 1,
    Add = 2,
    Modify = 3,
    Cancel = 4,
    Trade = 5,
    SnapshotStart = 6,
    SnapshotEnd = 7,
}

impl MarketUpdateType {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MarketUpdateType::Clear),
            2 => Some(MarketUpdateType::Add),
            3 => Some(MarketUpdateType::Modify),
            4 => Some(MarketUpdateType::Cancel),
            5 => Some(MarketUpdateType::Trade),
            6 => Some(MarketUpdateType::SnapshotStart),
            7 => Some(MarketUpdateType::SnapshotEnd),
            _ => None,
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Order-entry request. `order_id` is the client-assigned id; on a cancel it
/// names the order to cancel.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes, FromZeroes)]
pub struct ClientRequest {
    pub msg_type: u8,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub order_id: OrderId,
    pub side: i8,
    pub price: Price,
    pub qty: Qty,
}

impl ClientRequest {
    pub fn new_order(
        client_id: ClientId,
        ticker_id: TickerId,
        order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) -> Self {
        Self {
            msg_type: ClientRequestType::New as u8,
            client_id,
            ticker_id,
            order_id,
            side: side as i8,
            price,
            qty,
        }
    }

    pub fn cancel_order(
        client_id: ClientId,
        ticker_id: TickerId,
        order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) -> Self {
        Self {
            msg_type: ClientRequestType::Cancel as u8,
            client_id,
            ticker_id,
            order_id,
            side: side as i8,
            price,
            qty,
        }
    }

    #[inline]
    pub fn request_type(&self) -> Option<ClientRequestType> {
        ClientRequestType::from_u8(self.msg_type)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        AsBytes::as_bytes(self)
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        FromBytes::ref_from(bytes)
    }
}

/// Order-entry response emitted by the matching engine.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes, FromZeroes)]
pub struct ClientResponse {
    pub msg_type: u8,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub client_order_id: OrderId,
    pub market_order_id: OrderId,
    pub side: i8,
    pub price: Price,
    pub exec_qty: Qty,
    pub leaves_qty: Qty,
}

impl ClientResponse {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        msg_type: ClientResponseType,
        client_id: ClientId,
        ticker_id: TickerId,
        client_order_id: OrderId,
        market_order_id: OrderId,
        side: Side,
        price: Price,
        exec_qty: Qty,
        leaves_qty: Qty,
    ) -> Self {
        Self {
            msg_type: msg_type as u8,
            client_id,
            ticker_id,
            client_order_id,
            market_order_id,
            side: side as i8,
            price,
            exec_qty,
            leaves_qty,
        }
    }

    #[inline]
    pub fn response_type(&self) -> Option<ClientResponseType> {
        ClientResponseType::from_u8(self.msg_type)
    }

    #[inline]
    pub fn side(&self) -> Option<Side> {
        Side::from_i8(self.side)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        AsBytes::as_bytes(self)
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        FromBytes::ref_from(bytes)
    }
}

/// One order-book event on the market-data stream.
///
/// On `SnapshotStart` / `SnapshotEnd` frames the `order_id` field is
/// repurposed to carry the incremental sequence number the snapshot is
/// anchored to; use [`snapshot_anchor_seq`](Self::snapshot_anchor_seq)
/// rather than reading `order_id` directly.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes, FromZeroes)]
pub struct MarketUpdate {
    pub msg_type: u8,
    pub order_id: OrderId,
    pub ticker_id: TickerId,
    pub side: i8,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
}

impl MarketUpdate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        msg_type: MarketUpdateType,
        order_id: OrderId,
        ticker_id: TickerId,
        side: Side,
        price: Price,
        qty: Qty,
        priority: Priority,
    ) -> Self {
        Self {
            msg_type: msg_type as u8,
            order_id,
            ticker_id,
            side: side as i8,
            price,
            qty,
            priority,
        }
    }

    /// Cycle opener, anchored to the incremental stream at `anchor_seq`.
    pub fn snapshot_start(anchor_seq: SeqNum) -> Self {
        Self {
            msg_type: MarketUpdateType::SnapshotStart as u8,
            order_id: anchor_seq,
            ticker_id: TICKER_ID_INVALID,
            side: Side::Invalid as i8,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
            priority: PRIORITY_INVALID,
        }
    }

    /// Cycle closer, carrying the same anchor as the matching opener.
    pub fn snapshot_end(anchor_seq: SeqNum) -> Self {
        Self { msg_type: MarketUpdateType::SnapshotEnd as u8, ..Self::snapshot_start(anchor_seq) }
    }

    /// Drops every order of `ticker_id` from a replica book.
    pub fn clear(ticker_id: TickerId) -> Self {
        Self {
            msg_type: MarketUpdateType::Clear as u8,
            order_id: ORDER_ID_INVALID,
            ticker_id,
            side: Side::Invalid as i8,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
            priority: PRIORITY_INVALID,
        }
    }

    /// The incremental sequence number a snapshot cycle is anchored to.
    /// Only meaningful on `SnapshotStart` / `SnapshotEnd` frames, where it
    /// rides in the `order_id` field.
    #[inline]
    pub fn snapshot_anchor_seq(&self) -> SeqNum {
        self.order_id
    }

    #[inline]
    pub fn update_type(&self) -> Option<MarketUpdateType> {
        MarketUpdateType::from_u8(self.msg_type)
    }

    #[inline]
    pub fn side(&self) -> Option<Side> {
        Side::from_i8(self.side)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        AsBytes::as_bytes(self)
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        FromBytes::ref_from(bytes)
    }
}

// ============================================================================
// Sequenced frames (socket framing)
// ============================================================================

/// `ClientRequest` framed with the client's per-connection sequence number.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes, FromZeroes)]
pub struct SequencedClientRequest {
    pub seq_num: SeqNum,
    pub request: ClientRequest,
}

impl SequencedClientRequest {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        AsBytes::as_bytes(self)
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        FromBytes::ref_from(bytes)
    }
}

/// `ClientResponse` framed with the server's per-client sequence number.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes, FromZeroes)]
pub struct SequencedClientResponse {
    pub seq_num: SeqNum,
    pub response: ClientResponse,
}

impl SequencedClientResponse {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        AsBytes::as_bytes(self)
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        FromBytes::ref_from(bytes)
    }
}

/// `MarketUpdate` framed with a stream sequence number - global on the
/// incremental group, per-cycle on the snapshot group.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes, FromZeroes)]
pub struct SequencedMarketUpdate {
    pub seq_num: SeqNum,
    pub update: MarketUpdate,
}

impl SequencedMarketUpdate {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        AsBytes::as_bytes(self)
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        FromBytes::ref_from(bytes)
    }
}

// ============================================================================
// Sizes and ring aliases
// ============================================================================

pub const CLIENT_REQUEST_SIZE: usize = std::mem::size_of::<ClientRequest>();
pub const CLIENT_RESPONSE_SIZE: usize = std::mem::size_of::<ClientResponse>();
pub const MARKET_UPDATE_SIZE: usize = std::mem::size_of::<MarketUpdate>();
pub const SEQUENCED_CLIENT_REQUEST_SIZE: usize = std::mem::size_of::<SequencedClientRequest>();
pub const SEQUENCED_CLIENT_RESPONSE_SIZE: usize = std::mem::size_of::<SequencedClientResponse>();
pub const SEQUENCED_MARKET_UPDATE_SIZE: usize = std::mem::size_of::<SequencedMarketUpdate>();

/// Order server -> matching engine.
pub type ClientRequestQueue = LFQueue<ClientRequest, MAX_QUEUE_SIZE>;
/// Matching engine -> order server.
pub type ClientResponseQueue = LFQueue<ClientResponse, MAX_QUEUE_SIZE>;
/// Matching engine -> market-data publisher, and consumer -> trade engine.
pub type MarketUpdateQueue = LFQueue<MarketUpdate, MAX_QUEUE_SIZE>;
/// Market-data publisher -> snapshot synthesizer.
pub type SequencedMarketUpdateQueue = LFQueue<SequencedMarketUpdate, MAX_QUEUE_SIZE>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_match_the_wire() {
        assert_eq!(CLIENT_REQUEST_SIZE, 30);
        assert_eq!(CLIENT_RESPONSE_SIZE, 42);
        assert_eq!(MARKET_UPDATE_SIZE, 34);
        assert_eq!(SEQUENCED_CLIENT_REQUEST_SIZE, 38);
        assert_eq!(SEQUENCED_CLIENT_RESPONSE_SIZE, 50);
        assert_eq!(SEQUENCED_MARKET_UPDATE_SIZE, 42);
    }

    #[test]
    fn client_request_round_trip() {
        let request = ClientRequest::new_order(7, 2, 1001, Side::Buy, 5000, 25);
        let bytes = request.as_bytes();
        assert_eq!(bytes.len(), CLIENT_REQUEST_SIZE);

        let parsed = ClientRequest::from_bytes(bytes).unwrap();
        let (client_id, ticker_id, order_id) = (parsed.client_id, parsed.ticker_id, parsed.order_id);
        let (side, price, qty) = (parsed.side, parsed.price, parsed.qty);
        assert_eq!(parsed.request_type(), Some(ClientRequestType::New));
        assert_eq!(client_id, 7);
        assert_eq!(ticker_id, 2);
        assert_eq!(order_id, 1001);
        assert_eq!(side, 1);
        assert_eq!(price, 5000);
        assert_eq!(qty, 25);
    }

    #[test]
    fn client_response_round_trip() {
        let response = ClientResponse::new(
            ClientResponseType::Filled,
            7,
            2,
            1001,
            55,
            Side::Sell,
            5000,
            10,
            15,
        );
        let bytes = response.as_bytes();
        assert_eq!(bytes.len(), CLIENT_RESPONSE_SIZE);

        let parsed = ClientResponse::from_bytes(bytes).unwrap();
        let (client_order_id, market_order_id) = (parsed.client_order_id, parsed.market_order_id);
        let (exec_qty, leaves_qty) = (parsed.exec_qty, parsed.leaves_qty);
        assert_eq!(parsed.response_type(), Some(ClientResponseType::Filled));
        assert_eq!(parsed.side(), Some(Side::Sell));
        assert_eq!(client_order_id, 1001);
        assert_eq!(market_order_id, 55);
        assert_eq!(exec_qty, 10);
        assert_eq!(leaves_qty, 15);
    }

    #[test]
    fn market_update_round_trip() {
        let update = MarketUpdate::new(MarketUpdateType::Add, 55, 2, Side::Buy, 5000, 25, 3);
        let bytes = update.as_bytes();
        assert_eq!(bytes.len(), MARKET_UPDATE_SIZE);

        let parsed = MarketUpdate::from_bytes(bytes).unwrap();
        let (order_id, ticker_id, price, qty, priority) =
            (parsed.order_id, parsed.ticker_id, parsed.price, parsed.qty, parsed.priority);
        assert_eq!(parsed.update_type(), Some(MarketUpdateType::Add));
        assert_eq!(parsed.side(), Some(Side::Buy));
        assert_eq!(order_id, 55);
        assert_eq!(ticker_id, 2);
        assert_eq!(price, 5000);
        assert_eq!(qty, 25);
        assert_eq!(priority, 3);
    }

    #[test]
    fn sequenced_frames_round_trip() {
        let frame = SequencedMarketUpdate {
            seq_num: 99,
            update: MarketUpdate::new(MarketUpdateType::Trade, 1, 0, Side::Sell, 100, 5, 0),
        };
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), SEQUENCED_MARKET_UPDATE_SIZE);

        let parsed = SequencedMarketUpdate::from_bytes(bytes).unwrap();
        let seq_num = parsed.seq_num;
        assert_eq!(seq_num, 99);
        assert_eq!(parsed.update.update_type(), Some(MarketUpdateType::Trade));
    }

    #[test]
    fn snapshot_markers_carry_the_anchor() {
        let start = MarketUpdate::snapshot_start(110);
        let end = MarketUpdate::snapshot_end(110);
        assert_eq!(start.update_type(), Some(MarketUpdateType::SnapshotStart));
        assert_eq!(end.update_type(), Some(MarketUpdateType::SnapshotEnd));
        assert_eq!(start.snapshot_anchor_seq(), 110);
        assert_eq!(end.snapshot_anchor_seq(), 110);
    }

    #[test]
    fn enum_decoding_rejects_unknown_bytes() {
        assert_eq!(ClientRequestType::from_u8(0), None);
        assert_eq!(ClientRequestType::from_u8(3), None);
        assert_eq!(ClientResponseType::from_u8(0), None);
        assert_eq!(ClientResponseType::from_u8(5), None);
        assert_eq!(MarketUpdateType::from_u8(0), None);
        assert_eq!(MarketUpdateType::from_u8(8), None);
    }

    #[test]
    fn from_bytes_rejects_wrong_sizes() {
        let short = [0u8; 10];
        assert!(ClientRequest::from_bytes(&short).is_none());
        assert!(ClientResponse::from_bytes(&short).is_none());
        assert!(MarketUpdate::from_bytes(&short).is_none());
    }

    #[test]
    fn default_records_decode_as_invalid() {
        let request = ClientRequest::default();
        assert_eq!(request.request_type(), None);
        let update = MarketUpdate::default();
        assert_eq!(update.update_type(), None);
    }
}
