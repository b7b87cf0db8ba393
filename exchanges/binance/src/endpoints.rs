//! Binance's per-account-type REST path table: each of Binance's five
//! account families (spot, margin, isolated margin, USD-M futures, COIN-M
//! futures) exposes the same set of operations under a different path
//! prefix, so routing is a lookup rather than a branch per operation.
//!
//! `AccountType::Futures` is routed to `/fapi` (USD-M futures). Binance's
//! COIN-M futures (`/dapi`) is a distinct product with its own account type
//! that `mmb_domain::market::AccountType` does not model separately; the
//! `/dapi` paths are provided here for completeness but are not reachable
//! from any `AccountType` variant. Recorded as an open question in
//! DESIGN.md.

use mmb_domain::market::AccountType;

pub const DAPI_LISTEN_KEY_PATH: &str = "/dapi/v1/listenKey";
pub const DAPI_ORDER_PATH: &str = "/dapi/v1/order";

pub fn listen_key_path(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Demo | AccountType::Aws | AccountType::Live | AccountType::Spot => "/api/v3/userDataStream",
        AccountType::Futures => "/fapi/v1/listenKey",
        AccountType::Margin => "/sapi/v1/userDataStream",
        AccountType::IsolatedMargin => "/sapi/v1/userDataStream/isolated",
        AccountType::PortfolioMargin => "/papi/v1/listenKey",
    }
}

pub fn order_path(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Demo | AccountType::Aws | AccountType::Live | AccountType::Spot => "/api/v3/order",
        AccountType::Futures => "/fapi/v1/order",
        AccountType::Margin | AccountType::IsolatedMargin => "/sapi/v1/margin/order",
        AccountType::PortfolioMargin => "/papi/v1/um/order",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn futures_routes_to_fapi() {
        assert_eq!(listen_key_path(AccountType::Futures), "/fapi/v1/listenKey");
        assert_eq!(order_path(AccountType::Futures), "/fapi/v1/order");
    }

    #[test]
    fn live_routes_to_spot() {
        assert_eq!(listen_key_path(AccountType::Live), "/api/v3/userDataStream");
        assert_eq!(order_path(AccountType::Live), "/api/v3/order");
    }

    #[test]
    fn portfolio_margin_routes_to_papi() {
        assert_eq!(listen_key_path(AccountType::PortfolioMargin), "/papi/v1/listenKey");
    }
}
