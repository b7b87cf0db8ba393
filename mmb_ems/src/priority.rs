//! Fixed per-venue account-type priority, used to pick a queue when a
//! submission doesn't name one explicitly. Binance/Bybit follow the same
//! demo-first, margin-last shape pending a venue owner confirming the
//! exact table (an open question, recorded in DESIGN.md).

use mmb_domain::market::{AccountType, Venue};

fn priority_table(venue: Venue) -> &'static [AccountType] {
    use AccountType::*;
    match venue {
        Venue::Okx => &[Demo, Aws, Live],
        Venue::Binance => &[Demo, Live, Futures, Margin, PortfolioMargin, IsolatedMargin],
        Venue::Bybit => &[Demo, Live, Futures, Margin],
    }
}

/// The highest-priority account type among `available`, or `None` if none
/// of the priority table's entries are present.
pub fn primary_account_type(venue: Venue, available: &[AccountType]) -> Option<AccountType> {
    priority_table(venue).iter().copied().find(|candidate| available.contains(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn okx_prefers_demo_over_aws_over_live() {
        let available = [AccountType::Live, AccountType::Aws, AccountType::Demo];
        assert_eq!(primary_account_type(Venue::Okx, &available), Some(AccountType::Demo));
    }

    #[test]
    fn falls_back_to_whatever_priority_entry_is_present() {
        let available = [AccountType::Live];
        assert_eq!(primary_account_type(Venue::Okx, &available), Some(AccountType::Live));
    }

    #[test]
    fn none_when_nothing_in_the_table_is_available() {
        let available = [AccountType::Spot];
        assert_eq!(primary_account_type(Venue::Okx, &available), None);
    }
}
