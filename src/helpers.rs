use std::{future::Future, time::Duration};

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use tracing::warn;

use crate::error::Error;

/// Decimal places kept for every stored money and token quantity.
pub const AMOUNT_SCALE: i64 = 18;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
const RETRY_BACKOFF_MS: u64 = 25;

pub fn round_amount(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(AMOUNT_SCALE, RoundingMode::HalfEven)
}

/// Positive once rounded to the stored scale.
pub fn ensure_positive(value: &BigDecimal, field: &str) -> Result<(), Error> {
    if round_amount(value) <= BigDecimal::zero() {
        return Err(Error::Validation(format!(
            "{} must be greater than zero",
            field
        )));
    }
    Ok(())
}

/// Fractional days between two instants, millisecond precision.
pub fn elapsed_days(from: DateTime<Utc>, to: DateTime<Utc>) -> BigDecimal {
    let millis = (to - from).num_milliseconds();
    BigDecimal::from(millis) / BigDecimal::from(MILLIS_PER_DAY)
}

/// UTC calendar day containing `at`, as `[start, end)`.
pub fn day_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN));
    (start, start + chrono::Duration::days(1))
}

/// Runs `operation` again while it fails with a retryable storage
/// conflict, up to `attempts` runs in total.
pub async fn retry_on_conflict<T, F, Fut>(
    attempts: u8,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let attempts = attempts.max(1);
    let mut attempt: u8 = 1;

    loop {
        match operation().await {
            Err(error) if error.is_retryable() && attempt < attempts => {
                warn!(
                    "Storage conflict on attempt {}/{}: {}",
                    attempt, attempts, error
                );
                tokio::time::sleep(Duration::from_millis(
                    RETRY_BACKOFF_MS * u64::from(attempt),
                ))
                .await;
                attempt += 1;
            },
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicU8, Ordering};

    #[test]
    fn test_elapsed_days_keeps_sub_day_precision() {
        let from = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        assert_eq!(elapsed_days(from, to), BigDecimal::from_str("0.25").unwrap());

        let later = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        assert_eq!(elapsed_days(from, later), BigDecimal::from_str("2.5").unwrap());
    }

    #[test]
    fn test_day_bounds() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 17, 45, 12).unwrap();
        let (start, end) = day_bounds(at);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_round_amount() {
        let third = BigDecimal::from(1) / BigDecimal::from(3);
        let rounded = round_amount(&third);
        assert_eq!(rounded, BigDecimal::from_str("0.333333333333333333").unwrap());
        assert!(ensure_positive(&BigDecimal::zero(), "amount").is_err());
        assert!(ensure_positive(&rounded, "amount").is_ok());

        let dust = BigDecimal::from_str("0.0000000000000000004").unwrap();
        assert!(matches!(
            ensure_positive(&dust, "amount"),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_on_conflict_until_success() {
        let counter = AtomicU8::new(0);
        let calls = &counter;

        let result = retry_on_conflict(3, || async move {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < 3 {
                return Err(Error::StorageConflict(String::from("oracle")));
            }
            Ok(call)
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_bound() {
        let counter = AtomicU8::new(0);
        let calls = &counter;

        let result: Result<(), Error> = retry_on_conflict(2, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::StorageConflict(String::from("balance")))
        })
        .await;

        assert!(matches!(result, Err(Error::StorageConflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let counter = AtomicU8::new(0);
        let calls = &counter;

        let result: Result<(), Error> = retry_on_conflict(5, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::InsufficientBalance(String::from("short")))
        })
        .await;

        assert!(matches!(result, Err(Error::InsufficientBalance(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
