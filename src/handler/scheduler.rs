use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use crate::{
    configuration::{AppState, State},
    error::Error,
    model::Actions,
};

use super::{reconciliation, reward};

fn period(app_state: &AppState<State>, action: Actions) -> Duration {
    let minutes = match action {
        Actions::RewardAction => app_state.config.reward_interval,
        Actions::ReconciliationAction => app_state.config.reconciliation_interval,
    };
    Duration::from_secs(minutes * 60)
}

/// Delay before the first run so a restart keeps the cadence of the
/// previous process instead of firing immediately.
pub fn initial_delay(
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    period: Duration,
) -> Duration {
    let last_run = match last_run {
        Some(last_run) => last_run,
        None => return Duration::ZERO,
    };

    let elapsed = (now - last_run).to_std().unwrap_or(Duration::ZERO);
    period.saturating_sub(elapsed)
}

pub async fn run_job(
    app_state: &AppState<State>,
    action: Actions,
) -> Result<(), Error> {
    match action {
        Actions::RewardAction => {
            reward::run_reward_tick(app_state).await?;
        },
        Actions::ReconciliationAction => {
            reconciliation::run_reconciliation(app_state).await?;
        },
    }
    Ok(())
}

pub async fn start_task(
    app_state: AppState<State>,
    action: Actions,
) -> Result<(), Error> {
    if !app_state.config.enable_scheduler {
        return Ok(());
    }

    let period = period(&app_state, action);
    let last_run = app_state
        .database
        .action_history
        .get_last_by_type(action.to_string())
        .await?
        .map(|item| item.created_at);
    let delay = initial_delay(last_run, Utc::now(), period);

    info!(
        "Scheduling job {} every {}s, first run in {}s",
        action,
        period.as_secs(),
        delay.as_secs()
    );

    tokio::spawn(async move {
        time::sleep(delay).await;

        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            if let Err(e) = run_job(&app_state, action).await {
                error!("Job {} failed: {}", action, e);
            }
        }
    })
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_initial_delay_resumes_cadence() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let hour = Duration::from_secs(3600);

        assert_eq!(initial_delay(None, now, hour), Duration::ZERO);
        assert_eq!(
            initial_delay(Some(now - chrono::Duration::minutes(20)), now, hour),
            Duration::from_secs(40 * 60)
        );
        assert_eq!(
            initial_delay(Some(now - chrono::Duration::hours(3)), now, hour),
            Duration::ZERO
        );
        assert_eq!(
            initial_delay(Some(now + chrono::Duration::minutes(5)), now, hour),
            hour
        );
    }
}
