//! `Balance`/`AccountBalance`. One `AccountBalance` per account type per
//! venue.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::{AccountType, Venue};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Balance {
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Mapping from asset code (`"BTC"`, `"USDT"`) to [`Balance`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountBalance {
    pub balances: HashMap<String, Balance>,
}

impl AccountBalance {
    /// Replaces balances for the reported assets; assets absent from
    /// `updates` are left untouched.
    pub fn apply(&mut self, updates: impl IntoIterator<Item = (String, Balance)>) {
        for (asset, balance) in updates {
            self.balances.insert(asset, balance);
        }
    }

    pub fn get(&self, asset: &str) -> Option<&Balance> {
        self.balances.get(asset)
    }
}

/// Published on the bus's `"balance"` topic whenever a private connector
/// refreshes or updates a venue/account's balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub venue: Venue,
    pub account_type: AccountType,
    pub balance: AccountBalance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_is_free_plus_locked() {
        let balance = Balance {
            free: dec!(1.5),
            locked: dec!(0.5),
        };
        assert_eq!(balance.total(), dec!(2.0));
    }

    #[test]
    fn apply_does_not_clear_unreported_assets() {
        let mut account = AccountBalance::default();
        account.apply([(
            "BTC".to_string(),
            Balance {
                free: dec!(1),
                locked: dec!(0),
            },
        )]);
        account.apply([(
            "USDT".to_string(),
            Balance {
                free: dec!(100),
                locked: dec!(0),
            },
        )]);
        assert!(account.get("BTC").is_some());
        assert!(account.get("USDT").is_some());
    }
}
