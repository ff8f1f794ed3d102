use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::{
    configuration::{AppState, State},
    error::Error,
    helpers::{day_bounds, ensure_positive, retry_on_conflict, round_amount},
    model::{
        Balance, Capability, Deposit, Deposit_Account, Deposit_Status,
        Ledger_Entry, Price_Oracle, Transaction_Type, User,
    },
    types::{Deposit_Account_Request, Deposit_Request, Ledger_Event},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Referral_Credit {
    pub referrer_id: i64,
    pub reward: BigDecimal,
    pub new_referral: bool,
}

#[derive(Debug, Clone)]
pub struct Deposit_Plan {
    pub fiat_equivalent: BigDecimal,
    pub balance: Balance,
    pub start_reward_clock: bool,
    pub referral: Option<Referral_Credit>,
    pub ledger: Ledger_Entry,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deposit_Confirmation {
    pub deposit_id: i64,
    pub user_id: i64,
    pub fiat_equivalent: BigDecimal,
    pub balance: BigDecimal,
    pub rewards: BigDecimal,
    pub referral_reward: Option<BigDecimal>,
}

pub fn check_deposit_cap(
    account: &Deposit_Account,
    today_total: &BigDecimal,
    amount: &BigDecimal,
) -> Result<(), Error> {
    let total = today_total + amount;
    if total > account.max_deposit_amount {
        return Err(Error::DepositCapExceeded(format!(
            "account {} would reach {} of {} today",
            account.id, total, account.max_deposit_amount
        )));
    }
    Ok(())
}

pub fn ensure_confirmable(deposit: &Deposit) -> Result<(), Error> {
    match deposit.status()? {
        Deposit_Status::Pending => Ok(()),
        Deposit_Status::Completed => Err(Error::AlreadyConfirmed(format!(
            "deposit {} is already completed",
            deposit.id
        ))),
        Deposit_Status::Failed => Err(Error::InvalidState(format!(
            "deposit {} has failed and cannot be confirmed",
            deposit.id
        ))),
    }
}

pub fn plan_confirmation(
    deposit: &Deposit,
    user: &User,
    balance: &Balance,
    oracle: &Price_Oracle,
) -> Result<Deposit_Plan, Error> {
    ensure_confirmable(deposit)?;

    if oracle.conversion_rate <= BigDecimal::zero() {
        return Err(Error::InvalidState(String::from(
            "conversion rate must be greater than zero",
        )));
    }

    let fiat_equivalent =
        round_amount(&(&deposit.amount / &oracle.conversion_rate));
    let start_reward_clock = user.last_reward_date.is_none();

    let mut next_balance = balance.clone();
    next_balance.balance = round_amount(&(&balance.balance + &fiat_equivalent));

    let referral = user.referrer_id.map(|referrer_id| Referral_Credit {
        referrer_id,
        reward: round_amount(&(&fiat_equivalent * &oracle.referral_percentage)),
        new_referral: start_reward_clock,
    });

    Ok(Deposit_Plan {
        ledger: Ledger_Entry::completed(
            Transaction_Type::Deposit,
            fiat_equivalent.clone(),
        ),
        fiat_equivalent,
        balance: next_balance,
        start_reward_clock,
        referral,
    })
}

async fn get_admin(
    app_state: &AppState<State>,
    admin_id: i64,
    capability: Capability,
) -> Result<User, Error> {
    let admin = app_state
        .database
        .user
        .get(admin_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("admin {}", admin_id)))?;
    admin.ensure_capability(capability)?;
    Ok(admin)
}

pub async fn request_deposit(
    app_state: &AppState<State>,
    request: Deposit_Request,
) -> Result<Deposit, Error> {
    request.validate()?;

    app_state
        .database
        .user
        .get(request.user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", request.user_id)))?;

    let request = &request;
    let deposit =
        retry_on_conflict(app_state.config.storage_retry_attempts, move || {
            insert_deposit(app_state, request)
        })
        .await?;

    info!(
        "Deposit {} of {} {} requested by user {} on account {}",
        deposit.transaction_id,
        deposit.amount,
        deposit.currency,
        deposit.user_id,
        deposit.admin_id
    );

    Ok(deposit)
}

async fn insert_deposit(
    app_state: &AppState<State>,
    request: &Deposit_Request,
) -> Result<Deposit, Error> {
    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    let account = database
        .deposit_account
        .get_for_update(request.admin_id, &mut transaction)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!("deposit account {}", request.admin_id))
        })?;

    let (from, to) = day_bounds(Utc::now());
    let today_total = database
        .deposit
        .get_account_total(account.id, from, to, &mut transaction)
        .await?;
    check_deposit_cap(&account, &today_total, &request.amount)?;

    let deposit = database
        .deposit
        .insert(
            request.user_id,
            account.id,
            &round_amount(&request.amount),
            &request.currency,
            &request.transaction_id,
            &request.deposit_method,
            &mut transaction,
        )
        .await
        .map_err(|error| {
            Error::from_unique_violation(error, &request.transaction_id)
        })?;

    transaction.commit().await?;

    Ok(deposit)
}

pub async fn confirm_deposit(
    app_state: &AppState<State>,
    deposit_id: i64,
    admin_id: i64,
) -> Result<Deposit_Confirmation, Error> {
    get_admin(app_state, admin_id, Capability::ConfirmDeposit).await?;

    let confirmation =
        retry_on_conflict(app_state.config.storage_retry_attempts, move || {
            execute_confirmation(app_state, deposit_id, admin_id)
        })
        .await?;

    info!(
        "Deposit {} confirmed by {}: user {} credited {}",
        deposit_id,
        admin_id,
        confirmation.user_id,
        confirmation.fiat_equivalent
    );

    app_state.notifier.emit(Ledger_Event::BalanceChanged {
        user_id: confirmation.user_id,
        balance: confirmation.balance.clone(),
        rewards: confirmation.rewards.clone(),
        reason: Transaction_Type::Deposit.to_string(),
    });

    Ok(confirmation)
}

async fn execute_confirmation(
    app_state: &AppState<State>,
    deposit_id: i64,
    admin_id: i64,
) -> Result<Deposit_Confirmation, Error> {
    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    let deposit = database
        .deposit
        .get_for_update(deposit_id, &mut transaction)
        .await?
        .ok_or_else(|| Error::NotFound(format!("deposit {}", deposit_id)))?;
    ensure_confirmable(&deposit)?;

    let balance = database
        .balance
        .get_or_create_for_update(deposit.user_id, &mut transaction)
        .await?;
    let user = database
        .user
        .get_for_update(deposit.user_id, &mut transaction)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", deposit.user_id)))?;
    let oracle = database
        .price_oracle
        .get_in(&mut transaction)
        .await?
        .ok_or_else(|| Error::NotFound(String::from("price oracle")))?;

    let plan = plan_confirmation(&deposit, &user, &balance, &oracle)?;
    let now = Utc::now();

    database
        .wallet_transaction
        .insert(
            &plan.ledger.to_row(
                deposit.user_id,
                &app_state.config.default_currency,
                Some(admin_id),
                now,
            ),
            &mut transaction,
        )
        .await?;

    database.balance.update(&plan.balance, &mut transaction).await?;

    if plan.start_reward_clock {
        database
            .user
            .set_last_reward_date(deposit.user_id, now, &mut transaction)
            .await?;
    }

    if let Some(referral) = &plan.referral {
        database
            .user
            .add_referral_reward(
                referral.referrer_id,
                &referral.reward,
                referral.new_referral,
                &mut transaction,
            )
            .await?;
    }

    let updated = database
        .deposit
        .set_status(deposit_id, Deposit_Status::Completed, admin_id, &mut transaction)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(Error::AlreadyConfirmed(format!(
            "deposit {} is already settled",
            deposit_id
        )));
    }

    transaction.commit().await?;

    Ok(Deposit_Confirmation {
        deposit_id,
        user_id: deposit.user_id,
        fiat_equivalent: plan.fiat_equivalent,
        balance: plan.balance.balance,
        rewards: plan.balance.rewards,
        referral_reward: plan.referral.map(|referral| referral.reward),
    })
}

/// Moves a pending deposit to `failed`; it stops counting against the
/// daily cap and can never be confirmed.
pub async fn fail_deposit(
    app_state: &AppState<State>,
    deposit_id: i64,
    admin_id: i64,
) -> Result<(), Error> {
    get_admin(app_state, admin_id, Capability::ConfirmDeposit).await?;

    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    let deposit = database
        .deposit
        .get_for_update(deposit_id, &mut transaction)
        .await?
        .ok_or_else(|| Error::NotFound(format!("deposit {}", deposit_id)))?;
    ensure_confirmable(&deposit)?;

    database
        .deposit
        .set_status(deposit_id, Deposit_Status::Failed, admin_id, &mut transaction)
        .await?;

    transaction.commit().await?;

    info!("Deposit {} marked failed by {}", deposit_id, admin_id);

    Ok(())
}

pub async fn add_deposit_account(
    app_state: &AppState<State>,
    admin_id: i64,
    request: Deposit_Account_Request,
) -> Result<Deposit_Account, Error> {
    get_admin(app_state, admin_id, Capability::ManageDepositAccounts).await?;
    ensure_positive(&request.max_deposit_amount, "max_deposit_amount")?;

    if request.account_number.trim().is_empty() {
        return Err(Error::Validation(String::from(
            "account_number is required",
        )));
    }

    let account = app_state
        .database
        .deposit_account
        .insert(
            admin_id,
            &request.bank_name,
            &request.account_name,
            request.account_number.trim(),
            &request.account_type,
            &round_amount(&request.max_deposit_amount),
        )
        .await?;

    info!(
        "Deposit account {} added with daily cap {}",
        account.id, account.max_deposit_amount
    );

    Ok(account)
}

/// Collection accounts that can still take deposits on the day of `at`.
pub async fn eligible_deposit_accounts(
    app_state: &AppState<State>,
    at: DateTime<Utc>,
) -> Result<Vec<Deposit_Account>, Error> {
    let (from, to) = day_bounds(at);
    let accounts = app_state
        .database
        .deposit_account
        .get_eligible(from, to)
        .await?;
    Ok(accounts)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::handler::trade::tests::{balance, dec, oracle};

    fn account(max: &str) -> Deposit_Account {
        Deposit_Account {
            id: 3,
            user_id: 2,
            bank_name: String::from("First Bank"),
            account_name: String::from("PDES Collections"),
            account_number: String::from("3012345678"),
            account_type: String::from("current"),
            max_deposit_amount: dec(max),
            created_at: Utc::now(),
        }
    }

    pub(crate) fn deposit(amount: &str, status: Deposit_Status) -> Deposit {
        Deposit {
            id: 11,
            user_id: 1,
            admin_id: 3,
            amount: dec(amount),
            currency: String::from("naira"),
            transaction_id: String::from("TX-11"),
            deposit_method: String::from("bank"),
            status: String::from(status),
            confirmed_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn user(referrer_id: Option<i64>) -> User {
        User {
            id: 1,
            username: String::from("bola"),
            email: String::from("bola@example.com"),
            role: String::from("USER"),
            sticks: 0,
            is_blocked: false,
            referrer_id,
            total_referrals: 0,
            referral_reward: BigDecimal::zero(),
            last_reward_date: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_daily_cap() {
        let account = account("100");
        let prior = dec("80");

        assert!(matches!(
            check_deposit_cap(&account, &prior, &dec("30")),
            Err(Error::DepositCapExceeded(_))
        ));
        assert!(check_deposit_cap(&account, &prior, &dec("15")).is_ok());
        assert!(check_deposit_cap(&account, &prior, &dec("20")).is_ok());
    }

    #[test]
    fn test_referral_cascade() {
        let plan = plan_confirmation(
            &deposit("1000", Deposit_Status::Pending),
            &user(Some(7)),
            &balance("0"),
            &oracle("2", "2"),
        )
        .unwrap();

        assert_eq!(plan.fiat_equivalent, dec("1000"));
        assert_eq!(plan.balance.balance, dec("1000"));
        assert_eq!(
            plan.ledger,
            Ledger_Entry::completed(Transaction_Type::Deposit, dec("1000"))
        );
        assert!(plan.start_reward_clock);
        assert_eq!(
            plan.referral,
            Some(Referral_Credit {
                referrer_id: 7,
                reward: dec("50"),
                new_referral: true,
            })
        );
    }

    #[test]
    fn test_confirmation_converts_raw_amount() {
        let mut rate = oracle("2", "2");
        rate.conversion_rate = dec("1500");
        let mut depositor = user(None);
        depositor.last_reward_date = Some(Utc::now());

        let plan = plan_confirmation(
            &deposit("30000", Deposit_Status::Pending),
            &depositor,
            &balance("5"),
            &rate,
        )
        .unwrap();

        assert_eq!(plan.fiat_equivalent, dec("20"));
        assert_eq!(plan.balance.balance, dec("25"));
        assert!(!plan.start_reward_clock);
        assert!(plan.referral.is_none());

        rate.conversion_rate = BigDecimal::zero();
        assert!(matches!(
            plan_confirmation(
                &deposit("30000", Deposit_Status::Pending),
                &depositor,
                &balance("5"),
                &rate,
            ),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_second_confirmation_is_rejected() {
        assert!(ensure_confirmable(&deposit("10", Deposit_Status::Pending)).is_ok());
        assert!(matches!(
            ensure_confirmable(&deposit("10", Deposit_Status::Completed)),
            Err(Error::AlreadyConfirmed(_))
        ));
        assert!(matches!(
            ensure_confirmable(&deposit("10", Deposit_Status::Failed)),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            plan_confirmation(
                &deposit("10", Deposit_Status::Completed),
                &user(None),
                &balance("0"),
                &oracle("2", "2"),
            ),
            Err(Error::AlreadyConfirmed(_))
        ));
    }
}
