//! Bybit v5 unified-trading-account REST paths: one path per operation, the
//! same for every `AccountType` under UTA.

pub const ORDER_PATH: &str = "/v5/order/create";
pub const CANCEL_ORDER_PATH: &str = "/v5/order/cancel";
pub const BALANCE_PATH: &str = "/v5/account/wallet-balance";
pub const POSITIONS_PATH: &str = "/v5/position/list";
pub const KLINE_PATH: &str = "/v5/market/kline";
