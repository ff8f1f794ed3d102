use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::{
    configuration::{AppState, State},
    error::Error,
    helpers::{ensure_positive, retry_on_conflict, round_amount},
    model::{
        Balance, Capability, Ledger_Entry, Transaction_Type, User,
        Wallet_Transaction,
    },
    types::{Ledger_Event, Withdraw_Destination, Withdraw_Request},
};

#[derive(Debug, Clone, Serialize)]
pub struct Withdrawal {
    pub transaction_id: i64,
    pub user_id: i64,
    pub amount: BigDecimal,
    pub balance: BigDecimal,
    pub rewards: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct Withdrawal_Plan {
    pub balance: Balance,
    pub amount: BigDecimal,
    pub ledger: Ledger_Entry,
}

/// Debits the balance up front. The `withdraw+<method>` row stays open
/// until an admin settles or reverses it, and counts towards the balance
/// either way.
pub fn plan_withdrawal(
    user: &User,
    balance: &Balance,
    amount: &BigDecimal,
    method: &str,
) -> Result<Withdrawal_Plan, Error> {
    user.ensure_active()?;

    let amount = round_amount(amount);
    ensure_positive(&amount, "amount")?;

    if balance.balance < amount {
        return Err(Error::InsufficientBalance(format!(
            "balance {} is below {}",
            balance.balance, amount
        )));
    }

    let mut next = balance.clone();
    next.balance = round_amount(&(&balance.balance - &amount));

    Ok(Withdrawal_Plan {
        balance: next,
        ledger: Ledger_Entry::pending(
            Transaction_Type::Withdraw(method.to_owned()),
            -amount.clone(),
        ),
        amount,
    })
}

/// Credits back an open withdrawal of `amount`.
pub fn plan_reversal(balance: &Balance, amount: &BigDecimal) -> Withdrawal_Plan {
    let mut next = balance.clone();
    next.balance = round_amount(&(&balance.balance + amount));

    Withdrawal_Plan {
        balance: next,
        amount: amount.clone(),
        ledger: Ledger_Entry::completed(Transaction_Type::Refund, amount.clone()),
    }
}

/// A withdrawal can be settled or reversed once, and only while it is
/// still open. Returns the debited amount.
pub fn ensure_open_withdrawal(
    entry: &Wallet_Transaction,
) -> Result<BigDecimal, Error> {
    let id = entry.id.unwrap_or_default();

    if !matches!(entry.kind()?, Transaction_Type::Withdraw(_)) {
        return Err(Error::InvalidState(format!(
            "transaction {} is a {}, not a withdrawal",
            id, entry.transaction_type
        )));
    }

    if entry.transaction_completed {
        return Err(Error::AlreadyConfirmed(format!(
            "withdrawal {} is already settled",
            id
        )));
    }

    if entry.transaction_failed {
        return Err(Error::AlreadyConfirmed(format!(
            "withdrawal {} is already reversed",
            id
        )));
    }

    Ok(entry.amount.abs())
}

fn destination_columns(
    destination: Withdraw_Destination,
) -> (Option<String>, Option<String>, Option<String>) {
    match destination {
        Withdraw_Destination::Bank {
            account_name,
            account_number,
        } => (account_name, Some(account_number), None),
        Withdraw_Destination::Crypto { address } => (None, None, Some(address)),
    }
}

pub async fn withdraw(
    app_state: &AppState<State>,
    request: Withdraw_Request,
) -> Result<Withdrawal, Error> {
    let destination = request.destination()?;

    app_state
        .database
        .user
        .get(request.user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", request.user_id)))?;

    let request = &request;
    let destination = &destination;
    let withdrawal =
        retry_on_conflict(app_state.config.storage_retry_attempts, move || {
            execute_withdrawal(app_state, request, destination)
        })
        .await?;

    info!(
        "User {} withdrew {} via {}",
        withdrawal.user_id,
        withdrawal.amount,
        destination.method()
    );

    app_state.notifier.emit(Ledger_Event::BalanceChanged {
        user_id: withdrawal.user_id,
        balance: withdrawal.balance.clone(),
        rewards: withdrawal.rewards.clone(),
        reason: String::from("withdraw"),
    });

    Ok(withdrawal)
}

async fn execute_withdrawal(
    app_state: &AppState<State>,
    request: &Withdraw_Request,
    destination: &Withdraw_Destination,
) -> Result<Withdrawal, Error> {
    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    let balance = database
        .balance
        .get_or_create_for_update(request.user_id, &mut transaction)
        .await?;
    let user = database
        .user
        .get_for_update(request.user_id, &mut transaction)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", request.user_id)))?;
    let plan = plan_withdrawal(
        &user,
        &balance,
        &request.amount,
        destination.method(),
    )?;

    let mut row = plan.ledger.to_row(
        request.user_id,
        &app_state.config.default_currency,
        None,
        Utc::now(),
    );
    (row.account_name, row.account_number, row.crypto_address) =
        destination_columns(destination.clone());

    let transaction_id = database
        .wallet_transaction
        .insert(&row, &mut transaction)
        .await?;

    database.balance.update(&plan.balance, &mut transaction).await?;
    transaction.commit().await?;

    Ok(Withdrawal {
        transaction_id,
        user_id: request.user_id,
        amount: plan.amount,
        balance: plan.balance.balance,
        rewards: plan.balance.rewards,
    })
}

async fn ensure_admin(
    app_state: &AppState<State>,
    admin_id: i64,
) -> Result<(), Error> {
    app_state
        .database
        .user
        .get(admin_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("admin {}", admin_id)))?
        .ensure_capability(Capability::SettleWithdrawal)
}

/// Marks a pending withdrawal as paid out. The balance was already
/// debited at request time.
pub async fn settle_withdrawal(
    app_state: &AppState<State>,
    transaction_id: i64,
    admin_id: i64,
) -> Result<(), Error> {
    ensure_admin(app_state, admin_id).await?;

    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    let entry = database
        .wallet_transaction
        .get_for_update(transaction_id, &mut transaction)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!("transaction {}", transaction_id))
        })?;
    ensure_open_withdrawal(&entry)?;

    database
        .wallet_transaction
        .mark_completed(transaction_id, admin_id, &mut transaction)
        .await?;
    transaction.commit().await?;

    info!("Withdrawal {} settled by {}", transaction_id, admin_id);

    Ok(())
}

/// Fails a pending withdrawal and returns the funds through a `refund`
/// ledger entry.
pub async fn reverse_withdrawal(
    app_state: &AppState<State>,
    transaction_id: i64,
    admin_id: i64,
) -> Result<Withdrawal, Error> {
    ensure_admin(app_state, admin_id).await?;

    let withdrawal =
        retry_on_conflict(app_state.config.storage_retry_attempts, move || {
            execute_reversal(app_state, transaction_id, admin_id)
        })
        .await?;

    info!(
        "Withdrawal {} reversed by {}: user {} refunded {}",
        transaction_id, admin_id, withdrawal.user_id, withdrawal.amount
    );

    app_state.notifier.emit(Ledger_Event::BalanceChanged {
        user_id: withdrawal.user_id,
        balance: withdrawal.balance.clone(),
        rewards: withdrawal.rewards.clone(),
        reason: Transaction_Type::Refund.to_string(),
    });

    Ok(withdrawal)
}

async fn execute_reversal(
    app_state: &AppState<State>,
    transaction_id: i64,
    admin_id: i64,
) -> Result<Withdrawal, Error> {
    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    let entry = database
        .wallet_transaction
        .get_for_update(transaction_id, &mut transaction)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!("transaction {}", transaction_id))
        })?;
    let amount = ensure_open_withdrawal(&entry)?;

    let balance = database
        .balance
        .get_or_create_for_update(entry.user_id, &mut transaction)
        .await?;
    let plan = plan_reversal(&balance, &amount);

    database
        .wallet_transaction
        .mark_failed(transaction_id, admin_id, &mut transaction)
        .await?;

    let mut row = plan.ledger.to_row(
        entry.user_id,
        &entry.currency,
        Some(admin_id),
        Utc::now(),
    );
    row.account_name = entry.account_name.to_owned();
    row.account_number = entry.account_number.to_owned();
    row.crypto_address = entry.crypto_address.to_owned();

    let refund_id = database
        .wallet_transaction
        .insert(&row, &mut transaction)
        .await?;

    database.balance.update(&plan.balance, &mut transaction).await?;
    transaction.commit().await?;

    Ok(Withdrawal {
        transaction_id: refund_id,
        user_id: entry.user_id,
        amount: plan.amount,
        balance: plan.balance.balance,
        rewards: plan.balance.rewards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::trade::tests::{balance, dec, user};

    fn entry(kind: &str, completed: bool, failed: bool) -> Wallet_Transaction {
        Wallet_Transaction {
            id: Some(5),
            user_id: 1,
            confirm_by: None,
            amount: dec("-40"),
            currency: String::from("naira"),
            transaction_type: String::from(kind),
            transaction_completed: completed,
            transaction_failed: failed,
            account_name: None,
            account_number: None,
            crypto_address: Some(String::from("0xabc")),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_withdrawal_never_overdraws() {
        assert!(matches!(
            plan_withdrawal(&user(), &balance("39.99"), &dec("40"), "bank"),
            Err(Error::InsufficientBalance(_))
        ));

        let plan =
            plan_withdrawal(&user(), &balance("40"), &dec("40"), "bank")
                .unwrap();
        assert_eq!(plan.balance.balance, dec("0"));
        assert_eq!(
            plan.ledger,
            Ledger_Entry::pending(
                Transaction_Type::Withdraw(String::from("bank")),
                dec("-40")
            )
        );
    }

    #[test]
    fn test_blocked_user_cannot_withdraw() {
        let mut blocked = user();
        blocked.is_blocked = true;

        assert!(matches!(
            plan_withdrawal(&blocked, &balance("100"), &dec("40"), "crypto"),
            Err(Error::AccountBlocked(1))
        ));
    }

    #[test]
    fn test_withdrawal_amount_is_rounded_before_validation() {
        assert!(matches!(
            plan_withdrawal(
                &user(),
                &balance("100"),
                &dec("0.0000000000000000001"),
                "crypto"
            ),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_reversal_refunds_the_debit() {
        let debited =
            plan_withdrawal(&user(), &balance("100"), &dec("40"), "crypto")
                .unwrap();
        let reversed = plan_reversal(&debited.balance, &debited.amount);

        assert_eq!(reversed.balance.balance, dec("100"));
        assert!(reversed.ledger.reflected());
        assert_eq!(&debited.ledger.amount + &reversed.ledger.amount, dec("0"));
    }

    #[test]
    fn test_open_withdrawal_checks() {
        assert_eq!(
            ensure_open_withdrawal(&entry("withdraw+crypto", false, false))
                .unwrap(),
            dec("40")
        );
        assert!(matches!(
            ensure_open_withdrawal(&entry("withdraw+crypto", true, false)),
            Err(Error::AlreadyConfirmed(_))
        ));
        assert!(matches!(
            ensure_open_withdrawal(&entry("withdraw+crypto", false, true)),
            Err(Error::AlreadyConfirmed(_))
        ));
        assert!(matches!(
            ensure_open_withdrawal(&entry("deposit", false, false)),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_destination_columns() {
        let (name, number, address) = destination_columns(
            Withdraw_Destination::Bank {
                account_name: Some(String::from("Ada Obi")),
                account_number: String::from("0123456789"),
            },
        );
        assert_eq!(name.as_deref(), Some("Ada Obi"));
        assert_eq!(number.as_deref(), Some("0123456789"));
        assert!(address.is_none());
    }
}
