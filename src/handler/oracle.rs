use bigdecimal::{BigDecimal, One, Zero};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    configuration::{AppState, State},
    dao::PRICE_ORACLE_ID,
    error::Error,
    helpers::{ensure_positive, retry_on_conflict, round_amount},
    model::{Capability, Price_History, Price_Oracle},
    types::{Ledger_Event, Oracle_Init, Oracle_Update},
};

fn ensure_fraction(value: &BigDecimal, field: &str) -> Result<(), Error> {
    if *value < BigDecimal::zero() || *value > BigDecimal::one() {
        return Err(Error::Validation(format!(
            "{} must be a fraction between 0 and 1",
            field
        )));
    }
    Ok(())
}

fn market_cap(oracle: &Price_Oracle) -> BigDecimal {
    round_amount(&(&oracle.pdes_buy_price * &oracle.pdes_circulating_supply))
}

pub fn build_oracle(init: &Oracle_Init) -> Result<Price_Oracle, Error> {
    ensure_positive(&init.buy_price, "buy_price")?;
    ensure_positive(&init.sell_price, "sell_price")?;
    ensure_positive(&init.total_supply, "total_supply")?;
    ensure_positive(&init.conversion_rate, "conversion_rate")?;
    ensure_fraction(&init.reward_percentage, "reward_percentage")?;
    ensure_fraction(&init.referral_percentage, "referral_percentage")?;

    if init.circulating_supply < BigDecimal::zero()
        || init.circulating_supply > init.total_supply
    {
        return Err(Error::Validation(String::from(
            "circulating_supply must be between 0 and total_supply",
        )));
    }

    let mut oracle = Price_Oracle {
        id: PRICE_ORACLE_ID,
        pdes_buy_price: round_amount(&init.buy_price),
        pdes_sell_price: round_amount(&init.sell_price),
        pdes_circulating_supply: round_amount(&init.circulating_supply),
        pdes_supply_left: round_amount(
            &(&init.total_supply - &init.circulating_supply),
        ),
        pdes_total_supply: round_amount(&init.total_supply),
        pdes_market_cap: BigDecimal::zero(),
        conversion_rate: round_amount(&init.conversion_rate),
        reward_percentage: round_amount(&init.reward_percentage),
        referral_percentage: round_amount(&init.referral_percentage),
        version: 0,
        updated_at: Utc::now(),
    };
    oracle.pdes_market_cap = market_cap(&oracle);

    Ok(oracle)
}

pub fn apply_update(
    oracle: &Price_Oracle,
    update: &Oracle_Update,
) -> Result<Price_Oracle, Error> {
    let mut next = oracle.clone();

    if let Some(price) = &update.buy_price {
        ensure_positive(price, "buy_price")?;
        next.pdes_buy_price = round_amount(price);
    }
    if let Some(price) = &update.sell_price {
        ensure_positive(price, "sell_price")?;
        next.pdes_sell_price = round_amount(price);
    }
    if let Some(rate) = &update.conversion_rate {
        ensure_positive(rate, "conversion_rate")?;
        next.conversion_rate = round_amount(rate);
    }
    if let Some(percentage) = &update.reward_percentage {
        ensure_fraction(percentage, "reward_percentage")?;
        next.reward_percentage = round_amount(percentage);
    }
    if let Some(percentage) = &update.referral_percentage {
        ensure_fraction(percentage, "referral_percentage")?;
        next.referral_percentage = round_amount(percentage);
    }

    next.pdes_market_cap = market_cap(&next);
    Ok(next)
}

async fn ensure_oracle_admin(
    app_state: &AppState<State>,
    admin_id: i64,
) -> Result<(), Error> {
    app_state
        .database
        .user
        .get(admin_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("admin {}", admin_id)))?
        .ensure_capability(Capability::ManageOracle)
}

pub async fn initialize_oracle(
    app_state: &AppState<State>,
    admin_id: i64,
    init: Oracle_Init,
) -> Result<Price_Oracle, Error> {
    ensure_oracle_admin(app_state, admin_id).await?;
    let oracle = build_oracle(&init)?;

    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    let inserted = database
        .price_oracle
        .insert_if_not_exists(&oracle, &mut transaction)
        .await?;
    if inserted.rows_affected() == 0 {
        return Err(Error::InvalidState(String::from(
            "price oracle is already initialized",
        )));
    }

    transaction.commit().await?;

    info!(
        "Price oracle initialized: buy {}, sell {}, supply {}/{}",
        oracle.pdes_buy_price,
        oracle.pdes_sell_price,
        oracle.pdes_circulating_supply,
        oracle.pdes_total_supply
    );

    Ok(oracle)
}

pub async fn update_oracle(
    app_state: &AppState<State>,
    admin_id: i64,
    update: Oracle_Update,
) -> Result<Price_Oracle, Error> {
    ensure_oracle_admin(app_state, admin_id).await?;

    let update = &update;
    let oracle =
        retry_on_conflict(app_state.config.storage_retry_attempts, move || {
            execute_update(app_state, update)
        })
        .await?;

    info!(
        "Price oracle updated to version {}: buy {}, sell {}, rate {}",
        oracle.version,
        oracle.pdes_buy_price,
        oracle.pdes_sell_price,
        oracle.conversion_rate
    );

    app_state.notifier.emit(Ledger_Event::PriceChanged {
        crypto_name: app_state.config.token_symbol.to_owned(),
        buy_price: oracle.pdes_buy_price.clone(),
        sell_price: oracle.pdes_sell_price.clone(),
        market_cap: oracle.pdes_market_cap.clone(),
    });

    Ok(oracle)
}

async fn execute_update(
    app_state: &AppState<State>,
    update: &Oracle_Update,
) -> Result<Price_Oracle, Error> {
    let database = &app_state.database;
    let mut transaction = database.pool.begin().await?;

    let oracle = database
        .price_oracle
        .get_for_update(&mut transaction)
        .await?
        .ok_or_else(|| Error::NotFound(String::from("price oracle")))?;
    let mut next = apply_update(&oracle, update)?;

    let updated = database
        .price_oracle
        .update_versioned(&next, &mut transaction)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(Error::StorageConflict(format!(
            "price oracle moved past version {}",
            next.version
        )));
    }

    transaction.commit().await?;
    next.version += 1;

    Ok(next)
}

/// Candles of the configured token since `since`, oldest first.
pub async fn price_history(
    app_state: &AppState<State>,
    since: DateTime<Utc>,
) -> Result<Vec<Price_History>, Error> {
    let candles = app_state
        .database
        .price_history
        .get_since(&app_state.config.token_symbol, since)
        .await?;
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::trade::tests::{dec, oracle};

    fn init() -> Oracle_Init {
        Oracle_Init {
            buy_price: dec("2"),
            sell_price: dec("1.9"),
            total_supply: dec("1000000"),
            circulating_supply: dec("250000"),
            conversion_rate: dec("1500"),
            reward_percentage: dec("0.01"),
            referral_percentage: dec("0.05"),
        }
    }

    #[test]
    fn test_build_oracle_derives_supply_and_cap() {
        let oracle = build_oracle(&init()).unwrap();

        assert_eq!(oracle.id, 1);
        assert_eq!(oracle.pdes_supply_left, dec("750000"));
        assert_eq!(oracle.pdes_market_cap, dec("500000"));
        assert_eq!(oracle.version, 0);
    }

    #[test]
    fn test_build_oracle_rejects_bad_input() {
        let mut bad = init();
        bad.circulating_supply = dec("2000000");
        assert!(matches!(build_oracle(&bad), Err(Error::Validation(_))));

        let mut bad = init();
        bad.referral_percentage = dec("5");
        assert!(matches!(build_oracle(&bad), Err(Error::Validation(_))));

        let mut bad = init();
        bad.conversion_rate = dec("0");
        assert!(matches!(build_oracle(&bad), Err(Error::Validation(_))));
    }

    #[test]
    fn test_update_recomputes_market_cap() {
        let current = oracle("2", "2");
        let next = apply_update(
            &current,
            &Oracle_Update {
                buy_price: Some(dec("3")),
                ..Oracle_Update::default()
            },
        )
        .unwrap();

        assert_eq!(next.pdes_buy_price, dec("3"));
        assert_eq!(next.pdes_sell_price, dec("2"));
        assert_eq!(next.pdes_market_cap, dec("3000"));
        assert_eq!(next.version, current.version);

        assert!(matches!(
            apply_update(
                &current,
                &Oracle_Update {
                    sell_price: Some(dec("-1")),
                    ..Oracle_Update::default()
                }
            ),
            Err(Error::Validation(_))
        ));
    }
}
