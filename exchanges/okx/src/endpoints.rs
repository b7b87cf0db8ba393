//! OKX v5 REST paths. OKX has a single trading-account path per operation
//! regardless of `AccountType`, unlike Binance's per-market-type path table.

pub const ORDER_PATH: &str = "/api/v5/trade/order";
pub const CANCEL_ORDER_PATH: &str = "/api/v5/trade/cancel-order";
pub const BALANCE_PATH: &str = "/api/v5/account/balance";
pub const POSITIONS_PATH: &str = "/api/v5/account/positions";
pub const CANDLES_PATH: &str = "/api/v5/market/candles";
