use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::{
    configuration::{AppState, State},
    error::Error,
    helpers::{elapsed_days, ensure_positive, retry_on_conflict, round_amount},
    model::{
        Action_History, Actions, Balance, Capability, Ledger_Entry,
        Reward_Setting, Transaction_Type,
    },
    types::Reward_Setting_Request,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Accrual {
    /// Too little time since the last tick, nothing is written.
    Skip,
    /// Nothing to pay on; the clock still moves so idle time is never
    /// paid later.
    Advance,
    Credit(BigDecimal),
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Reward_Tick_Summary {
    pub credited: usize,
    pub advanced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_reward: BigDecimal,
}

/// `weekly_percentage` is a percent, e.g. 20 for 20 % a week.
pub fn daily_rate(weekly_percentage: &BigDecimal) -> BigDecimal {
    weekly_percentage / BigDecimal::from(7) / BigDecimal::from(100)
}

/// Time-proportional reward on `principal` for `elapsed` fractional days.
pub fn accrued_reward(
    principal: &BigDecimal,
    setting: &Reward_Setting,
    elapsed: &BigDecimal,
) -> BigDecimal {
    round_amount(&(principal * daily_rate(&setting.weekly_percentage) * elapsed))
}

pub fn plan_accrual(
    balance: &BigDecimal,
    last_reward_date: DateTime<Utc>,
    now: DateTime<Utc>,
    setting: &Reward_Setting,
    min_elapsed_days: &BigDecimal,
) -> Accrual {
    let elapsed = elapsed_days(last_reward_date, now);
    if elapsed < *min_elapsed_days {
        return Accrual::Skip;
    }

    if *balance <= BigDecimal::zero() {
        return Accrual::Advance;
    }

    Accrual::Credit(accrued_reward(balance, setting, &elapsed))
}

/// Applies a credited accrual to the balance and its reward total.
pub fn credit_reward(balance: &Balance, reward: &BigDecimal) -> (Balance, Ledger_Entry) {
    let mut next = balance.clone();
    next.balance = round_amount(&(&balance.balance + reward));
    next.rewards = round_amount(&(&balance.rewards + reward));

    (
        next,
        Ledger_Entry::completed(Transaction_Type::Reward, reward.clone()),
    )
}

pub fn build_reward_setting(
    request: &Reward_Setting_Request,
) -> Result<Reward_Setting, Error> {
    ensure_positive(&request.weekly_percentage, "weekly_percentage")?;

    if let Some(end_date) = request.end_date {
        if end_date <= request.start_date {
            return Err(Error::Validation(String::from(
                "end_date must be after start_date",
            )));
        }
    }

    Ok(Reward_Setting {
        id: None,
        weekly_percentage: round_amount(&request.weekly_percentage),
        start_date: request.start_date,
        end_date: request.end_date,
    })
}

/// Adds a window and ends any open-ended one at its start, so at most
/// one window is effective at a time.
pub async fn add_reward_setting(
    app_state: &AppState<State>,
    admin_id: i64,
    request: Reward_Setting_Request,
) -> Result<Reward_Setting, Error> {
    app_state
        .database
        .user
        .get(admin_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("admin {}", admin_id)))?
        .ensure_capability(Capability::ManageRewards)?;

    let mut setting = build_reward_setting(&request)?;
    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    let closed = database
        .reward_setting
        .close_open(setting.start_date, &mut transaction)
        .await?;
    let id = database
        .reward_setting
        .insert(&setting, &mut transaction)
        .await?;

    transaction.commit().await?;
    setting.id = Some(id);

    info!(
        "Reward setting {} added: {}% weekly from {}, {} open window(s) closed",
        id,
        setting.weekly_percentage,
        setting.start_date,
        closed.rows_affected()
    );

    Ok(setting)
}

pub async fn run_reward_tick(
    app_state: &AppState<State>,
) -> Result<Option<Reward_Tick_Summary>, Error> {
    let _guard = match app_state.jobs.reward.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            info!("Reward tick already running, skipping");
            return Ok(None);
        },
    };

    let now = Utc::now();
    let database = &app_state.database;

    let mut job_lock =
        match database.action_history.try_lock_job(Actions::RewardAction).await? {
            Some(job_lock) => job_lock,
            None => {
                info!("Reward tick running in another process, skipping");
                return Ok(None);
            },
        };

    let setting = match database.reward_setting.get_active(now).await? {
        Some(setting) => setting,
        None => {
            info!("No reward setting effective at {}, skipping tick", now);
            return Ok(None);
        },
    };

    let candidates = database.user.get_reward_candidates().await?;
    let setting = &setting;

    let results = stream::iter(candidates)
        .map(move |user_id| async move {
            (user_id, accrue_user(app_state, user_id, setting, now).await)
        })
        .buffer_unordered(app_state.config.job_concurrency)
        .collect::<Vec<_>>()
        .await;

    let mut summary = Reward_Tick_Summary::default();

    for (user_id, result) in results {
        match result {
            Ok(Accrual::Credit(reward)) => {
                summary.credited += 1;
                summary.total_reward += reward;
            },
            Ok(Accrual::Advance) => summary.advanced += 1,
            Ok(Accrual::Skip) => summary.skipped += 1,
            Err(e) => {
                summary.failed += 1;
                error!("Reward accrual failed for user {}: {}", user_id, e);
            },
        }
    }

    database
        .action_history
        .insert(
            Action_History {
                action_type: Actions::RewardAction.to_string(),
                created_at: now,
            },
            &mut job_lock,
        )
        .await?;
    job_lock.commit().await?;

    info!(
        "Reward tick at {} ({}% weekly): {} credited, {} advanced, {} skipped, {} failed, total {}",
        now,
        setting.weekly_percentage,
        summary.credited,
        summary.advanced,
        summary.skipped,
        summary.failed,
        summary.total_reward
    );

    Ok(Some(summary))
}

async fn accrue_user(
    app_state: &AppState<State>,
    user_id: i64,
    setting: &Reward_Setting,
    now: DateTime<Utc>,
) -> Result<Accrual, Error> {
    retry_on_conflict(app_state.config.storage_retry_attempts, move || {
        execute_accrual(app_state, user_id, setting, now)
    })
    .await
}

async fn execute_accrual(
    app_state: &AppState<State>,
    user_id: i64,
    setting: &Reward_Setting,
    now: DateTime<Utc>,
) -> Result<Accrual, Error> {
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

    let last_reward_date = match user.last_reward_date {
        Some(date) if !user.is_blocked => date,
        _ => {
            debug!("User {} is not accruing rewards", user_id);
            return Ok(Accrual::Skip);
        },
    };

    let accrual = plan_accrual(
        &balance.balance,
        last_reward_date,
        now,
        setting,
        &app_state.config.min_reward_elapsed_days,
    );

    match &accrual {
        Accrual::Skip => {
            debug!("User {} was rewarded too recently", user_id);
            return Ok(Accrual::Skip);
        },
        Accrual::Advance => {},
        Accrual::Credit(reward) => {
            let (next, ledger) = credit_reward(&balance, reward);

            database
                .wallet_transaction
                .insert(
                    &ledger.to_row(
                        user_id,
                        &app_state.config.default_currency,
                        None,
                        now,
                    ),
                    &mut transaction,
                )
                .await?;
            database.balance.update(&next, &mut transaction).await?;
        },
    }

    database
        .user
        .set_last_reward_date(user_id, now, &mut transaction)
        .await?;
    transaction.commit().await?;

    Ok(accrual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::trade::tests::{balance, dec};
    use chrono::{Duration, TimeZone};

    fn setting(weekly: &str) -> Reward_Setting {
        Reward_Setting {
            id: Some(1),
            weekly_percentage: dec(weekly),
            start_date: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            end_date: None,
        }
    }

    fn credit(accrual: Accrual) -> BigDecimal {
        match accrual {
            Accrual::Credit(reward) => reward,
            other => panic!("expected a credit, got {:?}", other),
        }
    }

    #[test]
    fn test_reward_setting_window_must_be_ordered() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();

        let setting = build_reward_setting(&Reward_Setting_Request {
            weekly_percentage: dec("20"),
            start_date: start,
            end_date: Some(start + Duration::days(7)),
        })
        .unwrap();
        assert!(setting.is_effective_at(start + Duration::days(1)));

        assert!(matches!(
            build_reward_setting(&Reward_Setting_Request {
                weekly_percentage: dec("20"),
                start_date: start,
                end_date: Some(start),
            }),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            build_reward_setting(&Reward_Setting_Request {
                weekly_percentage: dec("0"),
                start_date: start,
                end_date: None,
            }),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_credit_moves_balance_and_reward_total() {
        let mut stored = balance("100");
        stored.rewards = dec("3");

        let (next, ledger) = credit_reward(&stored, &dec("2.5"));

        assert_eq!(next.balance, dec("102.5"));
        assert_eq!(next.rewards, dec("5.5"));
        assert_eq!(
            ledger,
            Ledger_Entry::completed(Transaction_Type::Reward, dec("2.5"))
        );
    }

    #[test]
    fn test_daily_rate() {
        assert_eq!(round_amount(&daily_rate(&dec("7"))), dec("0.01"));
    }

    #[test]
    fn test_reward_is_time_proportional() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let setting = setting("7");
        let min = dec("0.01");

        let day = credit(plan_accrual(
            &dec("1000"),
            start,
            start + Duration::days(1),
            &setting,
            &min,
        ));
        let half_day = credit(plan_accrual(
            &dec("1000"),
            start,
            start + Duration::hours(12),
            &setting,
            &min,
        ));

        assert_eq!(day, dec("10"));
        assert_eq!(half_day, dec("5"));
    }

    #[test]
    fn test_short_gaps_and_empty_balances() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let setting = setting("20");
        let min = dec("0.01");

        assert_eq!(
            plan_accrual(
                &dec("1000"),
                start,
                start + Duration::minutes(7),
                &setting,
                &min
            ),
            Accrual::Skip
        );
        assert_eq!(
            plan_accrual(
                &BigDecimal::zero(),
                start,
                start + Duration::days(2),
                &setting,
                &min
            ),
            Accrual::Advance
        );
    }

    #[test]
    fn test_hourly_ticks_match_one_daily_tick_for_constant_balance() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let setting = setting("20");
        let min = dec("0.01");
        let principal = dec("1000");

        let mut hourly_total = BigDecimal::zero();
        let mut last = start;
        for hour in 1..=24 {
            let now = start + Duration::hours(hour);
            hourly_total += credit(plan_accrual(&principal, last, now, &setting, &min));
            last = now;
        }

        let daily = credit(plan_accrual(
            &principal,
            start,
            start + Duration::hours(24),
            &setting,
            &min,
        ));

        let drift = (&hourly_total - &daily).abs();
        assert!(drift < dec("0.000000000001"), "drift {}", drift);
    }

    #[test]
    fn test_compounding_hourly_stays_close_to_daily() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let setting = setting("20");
        let min = dec("0.01");

        let mut balance = dec("1000");
        let mut last = start;
        for hour in 1..=24 {
            let now = start + Duration::hours(hour);
            balance += credit(plan_accrual(&balance, last, now, &setting, &min));
            last = now;
        }
        let hourly_gain = &balance - dec("1000");

        let daily_gain = credit(plan_accrual(
            &dec("1000"),
            start,
            start + Duration::hours(24),
            &setting,
            &min,
        ));

        assert!(hourly_gain >= daily_gain);
        let relative = (&hourly_gain - &daily_gain) / &daily_gain;
        assert!(relative < dec("0.015"), "relative {}", relative);
    }
}
