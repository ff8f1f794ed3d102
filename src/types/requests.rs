use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{error::Error, helpers::ensure_positive};

#[derive(Debug, Clone, Deserialize)]
pub struct Deposit_Request {
    pub user_id: i64,
    pub admin_id: i64,
    pub amount: BigDecimal,
    pub currency: String,
    pub transaction_id: String,
    pub deposit_method: String,
}

impl Deposit_Request {
    pub fn validate(&self) -> Result<(), Error> {
        ensure_positive(&self.amount, "amount")?;

        if self.transaction_id.trim().is_empty() {
            return Err(Error::Validation(String::from(
                "transaction_id is required",
            )));
        }

        if self.deposit_method.trim().is_empty() {
            return Err(Error::Validation(String::from(
                "deposit_method is required",
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Withdraw_Request {
    pub user_id: i64,
    pub amount: BigDecimal,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    pub crypto_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Withdraw_Destination {
    Bank {
        account_name: Option<String>,
        account_number: String,
    },
    Crypto {
        address: String,
    },
}

impl Withdraw_Destination {
    pub fn method(&self) -> &'static str {
        match self {
            Withdraw_Destination::Bank { .. } => "bank",
            Withdraw_Destination::Crypto { .. } => "crypto",
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

impl Withdraw_Request {
    /// Exactly one of a bank account number or a crypto address.
    pub fn destination(&self) -> Result<Withdraw_Destination, Error> {
        ensure_positive(&self.amount, "amount")?;

        match (non_empty(&self.account_number), non_empty(&self.crypto_address))
        {
            (Some(account_number), None) => Ok(Withdraw_Destination::Bank {
                account_name: non_empty(&self.account_name),
                account_number,
            }),
            (None, Some(address)) => {
                Ok(Withdraw_Destination::Crypto { address })
            },
            (Some(_), Some(_)) => Err(Error::Validation(String::from(
                "provide either an account number or a crypto address, not both",
            ))),
            (None, None) => Err(Error::Validation(String::from(
                "an account number or a crypto address is required",
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Oracle_Init {
    pub buy_price: BigDecimal,
    pub sell_price: BigDecimal,
    pub total_supply: BigDecimal,
    pub circulating_supply: BigDecimal,
    pub conversion_rate: BigDecimal,
    pub reward_percentage: BigDecimal,
    pub referral_percentage: BigDecimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Oracle_Update {
    pub buy_price: Option<BigDecimal>,
    pub sell_price: Option<BigDecimal>,
    pub conversion_rate: Option<BigDecimal>,
    pub reward_percentage: Option<BigDecimal>,
    pub referral_percentage: Option<BigDecimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reward_Setting_Request {
    pub weekly_percentage: BigDecimal,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deposit_Account_Request {
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
    pub account_type: String,
    pub max_deposit_amount: BigDecimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        account_number: Option<&str>,
        crypto_address: Option<&str>,
    ) -> Withdraw_Request {
        Withdraw_Request {
            user_id: 1,
            amount: BigDecimal::from(10),
            account_name: Some(String::from("Ada Obi")),
            account_number: account_number.map(str::to_owned),
            crypto_address: crypto_address.map(str::to_owned),
        }
    }

    #[test]
    fn test_destination_is_exclusive() {
        assert_eq!(
            request(Some("0123456789"), None).destination().unwrap().method(),
            "bank"
        );
        assert_eq!(
            request(None, Some("0xabc")).destination().unwrap(),
            Withdraw_Destination::Crypto {
                address: String::from("0xabc")
            }
        );
        assert!(matches!(
            request(Some("0123456789"), Some("0xabc")).destination(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            request(None, None).destination(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            request(Some("  "), None).destination(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_withdraw_amount_must_be_positive() {
        let mut withdraw = request(None, Some("0xabc"));
        withdraw.amount = BigDecimal::from(0);
        assert!(matches!(withdraw.destination(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_deposit_request_validation() {
        let deposit = Deposit_Request {
            user_id: 1,
            admin_id: 2,
            amount: BigDecimal::from(15),
            currency: String::from("naira"),
            transaction_id: String::from(" "),
            deposit_method: String::from("bank"),
        };
        assert!(matches!(deposit.validate(), Err(Error::Validation(_))));
    }
}
