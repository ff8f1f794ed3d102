//! Ledger events
//!
//! Emitted after a commit and consumed by the push layer. Serialized as
//! `{"type": ..., "data": ...}`.

use std::fmt;

use bigdecimal::BigDecimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Ledger_Event {
    BalanceChanged {
        user_id: i64,
        balance: BigDecimal,
        rewards: BigDecimal,
        reason: String,
    },
    PriceChanged {
        crypto_name: String,
        buy_price: BigDecimal,
        sell_price: BigDecimal,
        market_cap: BigDecimal,
    },
    AccountSuspended {
        user_id: i64,
        sticks: i32,
    },
}

impl Ledger_Event {
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Ledger_Event::BalanceChanged { user_id, .. }
            | Ledger_Event::AccountSuspended { user_id, .. } => Some(*user_id),
            Ledger_Event::PriceChanged { .. } => None,
        }
    }
}

impl fmt::Display for Ledger_Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let body = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_event_envelope() {
        let event = Ledger_Event::AccountSuspended {
            user_id: 12,
            sticks: 3,
        };
        let value: Value = serde_json::from_str(&event.to_string()).unwrap();

        assert_eq!(value["type"], "account_suspended");
        assert_eq!(value["data"]["user_id"], 12);
        assert_eq!(value["data"]["sticks"], 3);
        assert_eq!(event.user_id(), Some(12));
    }

    #[test]
    fn test_price_event_has_no_user() {
        let event = Ledger_Event::PriceChanged {
            crypto_name: String::from("PDES"),
            buy_price: BigDecimal::from(2),
            sell_price: BigDecimal::from(2),
            market_cap: BigDecimal::from(50),
        };
        let value: Value = serde_json::from_str(&event.to_string()).unwrap();

        assert_eq!(value["type"], "price_changed");
        assert_eq!(value["data"]["crypto_name"], "PDES");
        assert_eq!(event.user_id(), None);
    }
}
