//! The venue-polymorphic capability set — symbol translation, request
//! signing, order-update decoding, and enum translation to/from each
//! venue's wire vocabulary — expressed as one trait with an implementation
//! per venue, selected at connector construction time rather than matched
//! on a `Venue` tag at every call site.

use mmb_domain::events::{BookL1, Kline, Trade};
use mmb_domain::instrument::InstrumentId;
use mmb_domain::order::{OrderStatus, OrderType, Side, TimeInForce};
use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unrecognized enum value {value:?} for {field}")]
    UnknownEnumValue { field: &'static str, value: String },
}

/// A venue order-update frame, decoded into fields the EMS/cache/registry
/// already understand, but still venue-tagged by `venue_order_id` rather
/// than a local `uuid` (resolving that is the private connector's job via
/// the order registry).
#[derive(Debug, Clone)]
pub struct DecodedOrderUpdate {
    pub venue_order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub last_filled: Decimal,
    pub last_filled_price: Option<Decimal>,
    pub average: Option<Decimal>,
    pub cum_cost: Decimal,
    pub fee: Decimal,
    pub fee_currency: Option<String>,
}

/// One public market-data event decoded from a WS frame, tagged so the
/// shared frame handler (one per `WsClient`) can dispatch it to the
/// right bus topic without knowing the venue's wire format. `symbol` is
/// carried in whatever form the venue's wire frame uses it (Binance's
/// compound `"BTCUSDT"`, OKX/Bybit's hyphenated `"BTC-USDT"`), matching
/// `InstrumentId`'s documented compound-form allowance rather than
/// requiring a base/quote dictionary to re-normalize it.
#[derive(Debug, Clone)]
pub enum PublicEvent {
    BookL1(BookL1),
    Trade(Trade),
    Kline(Kline),
}

/// One implementation per venue. Stateless: everything it needs is
/// passed in per call, so a single instance can be shared across every
/// account type's connectors for that venue.
pub trait VenueCapability: Send + Sync {
    /// Normalized `InstrumentId` -> venue-native symbol string, e.g.
    /// `BTC/USDT.BINANCE` -> `"BTCUSDT"`.
    fn parse_symbol(&self, instrument: &InstrumentId) -> String;

    /// `hex(hmac_sha256(secret, query))`, or venue-equivalent.
    fn sign_request(&self, secret: &str, query: &[u8]) -> String;

    /// Decodes one order-update WS frame.
    fn decode_order_update(&self, payload: &[u8]) -> Result<DecodedOrderUpdate, DecodeError>;

    /// Decodes one public-channel WS frame (book ticker, trade or kline).
    /// Returns `Ok(None)` for frames this capability recognizes but that
    /// carry no event (subscription acks, pongs), so the caller can tell
    /// "ignore this" apart from "this was malformed".
    fn decode_public_frame(&self, payload: &[u8]) -> Result<Option<PublicEvent>, DecodeError>;

    fn to_venue_side(&self, side: Side) -> &'static str;
    fn from_venue_side(&self, raw: &str) -> Result<Side, DecodeError>;

    fn to_venue_order_type(&self, order_type: OrderType) -> &'static str;
    fn from_venue_order_type(&self, raw: &str) -> Result<OrderType, DecodeError>;

    fn to_venue_tif(&self, tif: TimeInForce) -> &'static str;
    fn from_venue_tif(&self, raw: &str) -> Result<TimeInForce, DecodeError>;
}
