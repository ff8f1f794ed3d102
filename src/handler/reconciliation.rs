use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    configuration::{AppState, Config, State},
    error::Error,
    helpers::{elapsed_days, retry_on_conflict},
    model::{Action_History, Actions, Balance, Capability, Reward_Setting, User},
    types::Ledger_Event,
};

use super::reward::accrued_reward;

#[derive(Debug, Clone)]
pub struct Drift_Policy {
    pub balance_tolerance: BigDecimal,
    pub token_tolerance: BigDecimal,
    pub max_sticks: i32,
}

impl From<&Config> for Drift_Policy {
    fn from(config: &Config) -> Self {
        Self {
            balance_tolerance: config.balance_tolerance.clone(),
            token_tolerance: config.token_tolerance.clone(),
            max_sticks: config.max_sticks,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Drift_Assessment {
    pub user_id: i64,
    pub stored_balance: BigDecimal,
    pub expected_balance: BigDecimal,
    pub pending_accrual: BigDecimal,
    pub stored_token_balance: BigDecimal,
    pub expected_token_balance: BigDecimal,
    pub balance_drift: bool,
    pub token_drift: bool,
    pub sticks: i32,
    pub is_blocked: bool,
    pub newly_blocked: bool,
}

impl Drift_Assessment {
    pub fn drifted(&self) -> bool {
        self.balance_drift || self.token_drift
    }

    /// The stored projection with every drifted figure replaced by its
    /// recomputed value.
    pub fn corrected(&self, balance: &Balance) -> Balance {
        let mut corrected = balance.clone();
        if self.balance_drift {
            corrected.balance = self.expected_balance.clone();
        }
        if self.token_drift {
            corrected.crypto_balance = self.expected_token_balance.clone();
        }
        corrected
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Reconciliation_Summary {
    pub audited: usize,
    pub drifted: usize,
    pub suspended: usize,
    pub failed: usize,
}

fn pending_accrual(
    user: &User,
    principal: &BigDecimal,
    setting: Option<&Reward_Setting>,
    now: DateTime<Utc>,
) -> BigDecimal {
    match (user.last_reward_date, setting) {
        (Some(last), Some(setting)) if !user.is_blocked && last < now => {
            accrued_reward(principal, setting, &elapsed_days(last, now))
        },
        _ => BigDecimal::zero(),
    }
}

/// Compares the cached balance against the ledger. Accrual owed since the
/// last reward tick is added to both sides, so an account between ticks
/// does not show as drifted.
pub fn assess_drift(
    user: &User,
    balance: &Balance,
    ledger_balance: &BigDecimal,
    holdings_total: &BigDecimal,
    setting: Option<&Reward_Setting>,
    now: DateTime<Utc>,
    policy: &Drift_Policy,
) -> Drift_Assessment {
    let expected_balance = if *ledger_balance < BigDecimal::zero() {
        BigDecimal::zero()
    } else {
        ledger_balance.clone()
    };

    let stored_pending = pending_accrual(user, &balance.balance, setting, now);
    let expected_pending = pending_accrual(user, &expected_balance, setting, now);

    let stored_total = &balance.balance + &stored_pending;
    let expected_total = &expected_balance + &expected_pending;

    let balance_drift =
        (&stored_total - &expected_total).abs() > policy.balance_tolerance;
    let token_drift = (&balance.crypto_balance - holdings_total).abs()
        > policy.token_tolerance;

    let sticks = if balance_drift || token_drift {
        user.sticks + 1
    } else {
        user.sticks
    };
    let is_blocked = user.is_blocked || sticks >= policy.max_sticks;

    Drift_Assessment {
        user_id: user.id,
        stored_balance: balance.balance.clone(),
        expected_balance,
        pending_accrual: expected_pending,
        stored_token_balance: balance.crypto_balance.clone(),
        expected_token_balance: holdings_total.clone(),
        balance_drift,
        token_drift,
        sticks,
        is_blocked,
        newly_blocked: is_blocked && !user.is_blocked,
    }
}

pub async fn run_reconciliation(
    app_state: &AppState<State>,
) -> Result<Option<Reconciliation_Summary>, Error> {
    let _guard = match app_state.jobs.reconciliation.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            info!("Reconciliation already running, skipping");
            return Ok(None);
        },
    };

    let now = Utc::now();
    let database = &app_state.database;

    let mut job_lock = match database
        .action_history
        .try_lock_job(Actions::ReconciliationAction)
        .await?
    {
        Some(job_lock) => job_lock,
        None => {
            info!("Reconciliation running in another process, skipping");
            return Ok(None);
        },
    };

    let policy = Drift_Policy::from(&app_state.config);
    let setting = database.reward_setting.get_active(now).await?;
    let user_ids = database.user.get_ids().await?;

    let policy = &policy;
    let setting = setting.as_ref();

    let results = stream::iter(user_ids)
        .map(move |user_id| async move {
            (user_id, audit_user(app_state, user_id, setting, now, policy).await)
        })
        .buffer_unordered(app_state.config.job_concurrency)
        .collect::<Vec<_>>()
        .await;

    let mut summary = Reconciliation_Summary::default();

    for (user_id, result) in results {
        match result {
            Ok(assessment) => {
                summary.audited += 1;
                if assessment.drifted() {
                    summary.drifted += 1;
                }
                if assessment.newly_blocked {
                    summary.suspended += 1;
                    app_state.notifier.emit(Ledger_Event::AccountSuspended {
                        user_id,
                        sticks: assessment.sticks,
                    });
                }
            },
            Err(e) => {
                summary.failed += 1;
                error!("Reconciliation failed for user {}: {}", user_id, e);
            },
        }
    }

    check_supply(app_state).await?;

    database
        .action_history
        .insert(
            Action_History {
                action_type: Actions::ReconciliationAction.to_string(),
                created_at: now,
            },
            &mut job_lock,
        )
        .await?;
    job_lock.commit().await?;

    info!(
        "Reconciliation at {}: {} audited, {} drifted, {} suspended, {} failed",
        now, summary.audited, summary.drifted, summary.suspended, summary.failed
    );

    Ok(Some(summary))
}

async fn audit_user(
    app_state: &AppState<State>,
    user_id: i64,
    setting: Option<&Reward_Setting>,
    now: DateTime<Utc>,
    policy: &Drift_Policy,
) -> Result<Drift_Assessment, Error> {
    retry_on_conflict(app_state.config.storage_retry_attempts, move || {
        execute_audit(app_state, user_id, setting, now, policy)
    })
    .await
}

async fn execute_audit(
    app_state: &AppState<State>,
    user_id: i64,
    setting: Option<&Reward_Setting>,
    now: DateTime<Utc>,
    policy: &Drift_Policy,
) -> Result<Drift_Assessment, Error> {
    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    let balance = database
        .balance
        .get_or_create_for_update(user_id, &mut transaction)
        .await?;
    let user = database
        .user
        .get_for_update(user_id, &mut transaction)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))?;
    let ledger_balance = database
        .wallet_transaction
        .get_ledger_balance(user_id, &mut transaction)
        .await?;
    let holdings_total = database
        .token_holding
        .get_user_total(user_id, &mut transaction)
        .await?;

    let assessment = assess_drift(
        &user,
        &balance,
        &ledger_balance,
        &holdings_total,
        setting,
        now,
        policy,
    );

    if !assessment.drifted() {
        transaction.commit().await?;
        return Ok(assessment);
    }

    warn!(
        "Drift for user {}: balance {} expected {}, tokens {} expected {}, sticks {}",
        user_id,
        assessment.stored_balance,
        assessment.expected_balance,
        assessment.stored_token_balance,
        assessment.expected_token_balance,
        assessment.sticks
    );

    database
        .balance
        .update(&assessment.corrected(&balance), &mut transaction)
        .await?;
    database
        .user
        .set_standing(
            user_id,
            assessment.sticks,
            assessment.is_blocked,
            &mut transaction,
        )
        .await?;
    transaction.commit().await?;

    if assessment.newly_blocked {
        warn!("User {} suspended after {} sticks", user_id, assessment.sticks);
    }

    Ok(assessment)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing_Change {
    pub user_id: i64,
    pub sticks: i32,
    pub is_blocked: bool,
    pub newly_blocked: bool,
    pub restart_reward_clock: bool,
}

/// Unblocking restarts the reward clock, so time spent suspended never
/// accrues.
pub fn plan_standing(
    user: &User,
    sticks: i32,
    is_blocked: bool,
) -> Result<Standing_Change, Error> {
    if sticks < 0 {
        return Err(Error::Validation(String::from(
            "sticks cannot be negative",
        )));
    }

    Ok(Standing_Change {
        user_id: user.id,
        sticks,
        is_blocked,
        newly_blocked: is_blocked && !user.is_blocked,
        restart_reward_clock: user.is_blocked
            && !is_blocked
            && user.last_reward_date.is_some(),
    })
}

/// Admin override of a user's sticks and block flag.
pub async fn set_user_standing(
    app_state: &AppState<State>,
    admin_id: i64,
    user_id: i64,
    sticks: i32,
    is_blocked: bool,
) -> Result<Standing_Change, Error> {
    app_state
        .database
        .user
        .get(admin_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("admin {}", admin_id)))?
        .ensure_capability(Capability::ManageUsers)?;

    let change =
        retry_on_conflict(app_state.config.storage_retry_attempts, move || {
            execute_standing(app_state, user_id, sticks, is_blocked)
        })
        .await?;

    info!(
        "User {} standing set by {}: {} sticks, blocked {}",
        user_id, admin_id, change.sticks, change.is_blocked
    );

    if change.newly_blocked {
        app_state.notifier.emit(Ledger_Event::AccountSuspended {
            user_id,
            sticks: change.sticks,
        });
    }

    Ok(change)
}

async fn execute_standing(
    app_state: &AppState<State>,
    user_id: i64,
    sticks: i32,
    is_blocked: bool,
) -> Result<Standing_Change, Error> {
    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    database
        .balance
        .get_or_create_for_update(user_id, &mut transaction)
        .await?;
    let user = database
        .user
        .get_for_update(user_id, &mut transaction)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))?;

    let change = plan_standing(&user, sticks, is_blocked)?;

    database
        .user
        .set_standing(user_id, change.sticks, change.is_blocked, &mut transaction)
        .await?;

    if change.restart_reward_clock {
        database
            .user
            .set_last_reward_date(user_id, Utc::now(), &mut transaction)
            .await?;
    }

    transaction.commit().await?;

    Ok(change)
}

/// Σ holdings of the token must match the oracle's circulating supply.
async fn check_supply(app_state: &AppState<State>) -> Result<(), Error> {
    let database = &app_state.database;
    let symbol = app_state.config.token_symbol.as_str();

    let oracle = match database.price_oracle.get().await? {
        Some(oracle) => oracle,
        None => return Ok(()),
    };
    let held = database.token_holding.get_token_total(symbol).await?;
    let circulating =
        &oracle.pdes_total_supply - &oracle.pdes_supply_left;

    if (&held - &circulating).abs() > app_state.config.token_tolerance {
        warn!(
            "{} held by users is {} but the oracle reports {} in circulation",
            symbol, held, circulating
        );
    }

    Ok(())
}
