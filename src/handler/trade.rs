use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    configuration::{AppState, State},
    error::Error,
    helpers::{ensure_positive, retry_on_conflict, round_amount},
    model::{
        Balance, Ledger_Entry, Pdes_Transaction, Price_History, Price_Oracle,
        Trade_Action, Transaction_Type, User,
    },
    types::Ledger_Event,
};

/// Everything one trade writes, computed from the locked rows.
#[derive(Debug, Clone)]
pub struct Trade_Plan {
    pub action: Trade_Action,
    pub balance: Balance,
    pub holding: BigDecimal,
    pub oracle: Price_Oracle,
    pub fiat_amount: BigDecimal,
    pub token_amount: BigDecimal,
    pub price: BigDecimal,
    pub reward_earned: BigDecimal,
    pub candle: Price_History,
    pub ledger: Ledger_Entry,
    pub liquidated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trade_Outcome {
    pub user_id: i64,
    pub balance: BigDecimal,
    pub rewards: BigDecimal,
    pub holding: BigDecimal,
    pub token_amount: BigDecimal,
    pub price: BigDecimal,
    pub reward_earned: BigDecimal,
}

fn candle(
    crypto_name: &str,
    action: Trade_Action,
    before: &BigDecimal,
    after: &BigDecimal,
    volume: &BigDecimal,
    at: DateTime<Utc>,
) -> Price_History {
    let (low, high) = if before <= after {
        (before.clone(), after.clone())
    } else {
        (after.clone(), before.clone())
    };

    Price_History {
        id: None,
        crypto_name: crypto_name.to_owned(),
        action: String::from(action),
        open_price: before.clone(),
        high_price: high,
        low_price: low,
        close_price: after.clone(),
        volume: volume.clone(),
        timestamp: at,
    }
}

pub fn plan_buy(
    user: &User,
    balance: &Balance,
    holding: &BigDecimal,
    oracle: &Price_Oracle,
    fiat_amount: &BigDecimal,
    buy_pressure: &BigDecimal,
    crypto_name: &str,
    at: DateTime<Utc>,
) -> Result<Trade_Plan, Error> {
    user.ensure_active()?;
    let fiat_amount = &round_amount(fiat_amount);
    ensure_positive(fiat_amount, "amount")?;

    let price = oracle.pdes_buy_price.clone();
    if price <= BigDecimal::zero() {
        return Err(Error::Validation(String::from("buy price is not set")));
    }

    if balance.balance < *fiat_amount {
        return Err(Error::InsufficientBalance(format!(
            "balance {} is below {}",
            balance.balance, fiat_amount
        )));
    }

    let token_amount = round_amount(&(fiat_amount / &price));
    ensure_positive(&token_amount, "token amount")?;
    if token_amount > oracle.pdes_supply_left {
        return Err(Error::InsufficientSupply(format!(
            "{} {} requested, {} left",
            token_amount, crypto_name, oracle.pdes_supply_left
        )));
    }

    let mut next_balance = balance.clone();
    next_balance.balance = round_amount(&(&balance.balance - fiat_amount));
    next_balance.crypto_balance =
        round_amount(&(&balance.crypto_balance + &token_amount));

    let mut next_oracle = oracle.clone();
    next_oracle.pdes_circulating_supply =
        round_amount(&(&oracle.pdes_circulating_supply + &token_amount));
    next_oracle.pdes_supply_left =
        round_amount(&(&oracle.pdes_supply_left - &token_amount));
    next_oracle.pdes_buy_price = round_amount(&(&price * buy_pressure));
    next_oracle.pdes_market_cap = round_amount(
        &(&next_oracle.pdes_buy_price * &next_oracle.pdes_circulating_supply),
    );

    let candle = candle(
        crypto_name,
        Trade_Action::Buy,
        &price,
        &next_oracle.pdes_buy_price,
        &token_amount,
        at,
    );

    Ok(Trade_Plan {
        action: Trade_Action::Buy,
        balance: next_balance,
        holding: round_amount(&(holding + &token_amount)),
        oracle: next_oracle,
        fiat_amount: fiat_amount.clone(),
        token_amount,
        price,
        reward_earned: BigDecimal::zero(),
        candle,
        ledger: Ledger_Entry::completed(
            Transaction_Type::Transfer,
            -fiat_amount.clone(),
        ),
        liquidated: false,
    })
}

pub fn plan_sell(
    user: &User,
    balance: &Balance,
    holding: &BigDecimal,
    oracle: &Price_Oracle,
    fiat_value: &BigDecimal,
    sell_pressure: &BigDecimal,
    crypto_name: &str,
    at: DateTime<Utc>,
) -> Result<Trade_Plan, Error> {
    user.ensure_active()?;
    let fiat_value = &round_amount(fiat_value);
    ensure_positive(fiat_value, "amount")?;

    let price = oracle.pdes_sell_price.clone();
    if price <= BigDecimal::zero() {
        return Err(Error::Validation(String::from("sell price is not set")));
    }

    let token_amount = round_amount(&(fiat_value / &price));
    ensure_positive(&token_amount, "token amount")?;
    if *holding < token_amount {
        return Err(Error::InsufficientTokenBalance(format!(
            "holding {} {} is below {}",
            holding, crypto_name, token_amount
        )));
    }

    let circulating =
        round_amount(&(&oracle.pdes_circulating_supply - &token_amount));
    if circulating < BigDecimal::zero() {
        return Err(Error::InvalidState(format!(
            "circulating supply {} is below the sold amount {}",
            oracle.pdes_circulating_supply, token_amount
        )));
    }

    let reward_earned = round_amount(&(fiat_value * &oracle.reward_percentage));
    let next_holding = round_amount(&(holding - &token_amount));

    let mut next_balance = balance.clone();
    next_balance.balance = round_amount(&(&balance.balance + fiat_value));
    next_balance.rewards = round_amount(&(&balance.rewards + &reward_earned));
    next_balance.crypto_balance =
        round_amount(&(&balance.crypto_balance - &token_amount));

    let mut next_oracle = oracle.clone();
    next_oracle.pdes_circulating_supply = circulating;
    next_oracle.pdes_supply_left =
        round_amount(&(&oracle.pdes_supply_left + &token_amount));
    next_oracle.pdes_sell_price = round_amount(&(&price * sell_pressure));
    next_oracle.pdes_market_cap = round_amount(
        &(&next_oracle.pdes_buy_price * &next_oracle.pdes_circulating_supply),
    );

    let candle = candle(
        crypto_name,
        Trade_Action::Sell,
        &price,
        &next_oracle.pdes_sell_price,
        &token_amount,
        at,
    );

    Ok(Trade_Plan {
        action: Trade_Action::Sell,
        balance: next_balance,
        liquidated: next_holding.is_zero(),
        holding: next_holding,
        oracle: next_oracle,
        fiat_amount: fiat_value.clone(),
        token_amount,
        price,
        reward_earned,
        candle,
        ledger: Ledger_Entry::completed(
            Transaction_Type::Transfer,
            fiat_value.clone(),
        ),
    })
}

pub async fn buy(
    app_state: &AppState<State>,
    user_id: i64,
    fiat_amount: BigDecimal,
) -> Result<Trade_Outcome, Error> {
    trade(app_state, user_id, fiat_amount, Trade_Action::Buy).await
}

pub async fn sell(
    app_state: &AppState<State>,
    user_id: i64,
    fiat_value: BigDecimal,
) -> Result<Trade_Outcome, Error> {
    trade(app_state, user_id, fiat_value, Trade_Action::Sell).await
}

async fn trade(
    app_state: &AppState<State>,
    user_id: i64,
    amount: BigDecimal,
    action: Trade_Action,
) -> Result<Trade_Outcome, Error> {
    let amount = &amount;
    let (outcome, oracle) =
        retry_on_conflict(app_state.config.storage_retry_attempts, move || {
            execute_trade(app_state, user_id, amount, action)
        })
        .await?;

    info!(
        "User {} {} {} {} for {}",
        user_id,
        action,
        outcome.token_amount,
        app_state.config.token_symbol,
        amount
    );

    app_state.notifier.emit(Ledger_Event::BalanceChanged {
        user_id,
        balance: outcome.balance.clone(),
        rewards: outcome.rewards.clone(),
        reason: action.to_string(),
    });
    app_state.notifier.emit(Ledger_Event::PriceChanged {
        crypto_name: app_state.config.token_symbol.to_owned(),
        buy_price: oracle.pdes_buy_price,
        sell_price: oracle.pdes_sell_price,
        market_cap: oracle.pdes_market_cap,
    });

    Ok(outcome)
}

async fn execute_trade(
    app_state: &AppState<State>,
    user_id: i64,
    amount: &BigDecimal,
    action: Trade_Action,
) -> Result<(Trade_Outcome, Price_Oracle), Error> {
    let config = &app_state.config;
    let database = &app_state.database;
    let symbol = config.token_symbol.as_str();

    // Standing is checked under the row lock below.
    database
        .user
        .get(user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))?;

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
    let holding = database
        .token_holding
        .get_for_update(user_id, symbol, &mut transaction)
        .await?
        .map(|item| item.amount)
        .unwrap_or_else(BigDecimal::zero);
    let oracle = database
        .price_oracle
        .get_for_update(&mut transaction)
        .await?
        .ok_or_else(|| Error::NotFound(String::from("price oracle")))?;

    let now = Utc::now();
    let plan = match action {
        Trade_Action::Buy => plan_buy(
            &user,
            &balance,
            &holding,
            &oracle,
            amount,
            &config.buy_price_pressure,
            symbol,
            now,
        )?,
        Trade_Action::Sell => plan_sell(
            &user,
            &balance,
            &holding,
            &oracle,
            amount,
            &config.sell_price_pressure,
            symbol,
            now,
        )?,
    };

    database.balance.update(&plan.balance, &mut transaction).await?;
    database
        .token_holding
        .upsert(user_id, symbol, &plan.holding, &mut transaction)
        .await?;

    let updated = database
        .price_oracle
        .update_versioned(&plan.oracle, &mut transaction)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(Error::StorageConflict(format!(
            "price oracle moved past version {}",
            plan.oracle.version
        )));
    }

    database
        .price_history
        .insert(&plan.candle, &mut transaction)
        .await?;

    database
        .pdes_transaction
        .insert(
            &Pdes_Transaction {
                id: None,
                user_id,
                action: String::from(action),
                amount: plan.token_amount.clone(),
                price: plan.price.clone(),
                total: plan.fiat_amount.clone(),
                reward_earned: plan.reward_earned.clone(),
                created_at: now,
            },
            &mut transaction,
        )
        .await?;

    database
        .wallet_transaction
        .insert(
            &plan
                .ledger
                .to_row(user_id, &config.default_currency, None, now),
            &mut transaction,
        )
        .await?;

    if plan.liquidated && config.reset_referrer_reward_on_liquidation {
        if let Some(referrer_id) = user.referrer_id {
            warn!(
                "User {} liquidated all {}, resetting referral reward of referrer {}",
                user_id, symbol, referrer_id
            );
            database
                .user
                .reset_referral_reward(referrer_id, &mut transaction)
                .await?;
        }
    }

    transaction.commit().await?;

    let mut oracle = plan.oracle;
    oracle.version += 1;

    Ok((
        Trade_Outcome {
            user_id,
            balance: plan.balance.balance,
            rewards: plan.balance.rewards,
            holding: plan.holding,
            token_amount: plan.token_amount,
            price: plan.price,
            reward_earned: plan.reward_earned,
        },
        oracle,
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;

    pub(crate) fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    pub(crate) fn balance(amount: &str) -> Balance {
        Balance {
            user_id: 1,
            balance: dec(amount),
            crypto_balance: BigDecimal::zero(),
            rewards: BigDecimal::zero(),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn user() -> User {
        User {
            id: 1,
            username: String::from("ada"),
            email: String::from("ada@example.com"),
            role: String::from("USER"),
            sticks: 0,
            is_blocked: false,
            referrer_id: None,
            total_referrals: 0,
            referral_reward: BigDecimal::zero(),
            last_reward_date: None,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn oracle(buy: &str, sell: &str) -> Price_Oracle {
        Price_Oracle {
            id: 1,
            pdes_buy_price: dec(buy),
            pdes_sell_price: dec(sell),
            pdes_circulating_supply: dec("1000"),
            pdes_supply_left: dec("9000"),
            pdes_total_supply: dec("10000"),
            pdes_market_cap: dec("2000"),
            conversion_rate: dec("1"),
            reward_percentage: dec("0.01"),
            referral_percentage: dec("0.05"),
            version: 4,
            updated_at: Utc::now(),
        }
    }

    fn assert_supply_conserved(oracle: &Price_Oracle) {
        assert_eq!(
            &oracle.pdes_circulating_supply + &oracle.pdes_supply_left,
            oracle.pdes_total_supply
        );
    }

    #[test]
    fn test_buy_then_sell_round_trip() {
        let now = Utc::now();
        let start = oracle("2.0", "2.0");

        let bought = plan_buy(
            &user(),
            &balance("100.0"),
            &BigDecimal::zero(),
            &start,
            &dec("50.0"),
            &dec("1.01"),
            "PDES",
            now,
        )
        .unwrap();

        assert_eq!(bought.balance.balance, dec("50"));
        assert_eq!(bought.holding, dec("25"));
        assert_eq!(bought.balance.crypto_balance, dec("25"));
        assert_eq!(bought.oracle.pdes_circulating_supply, dec("1025"));
        assert_eq!(bought.oracle.pdes_supply_left, dec("8975"));
        assert_eq!(bought.oracle.pdes_buy_price, dec("2.02"));
        assert_eq!(bought.oracle.pdes_sell_price, dec("2.0"));
        assert_supply_conserved(&bought.oracle);

        let sold = plan_sell(
            &user(),
            &bought.balance,
            &bought.holding,
            &bought.oracle,
            &dec("50.0"),
            &dec("0.99"),
            "PDES",
            now,
        )
        .unwrap();

        assert_eq!(sold.balance.balance, dec("100"));
        assert_eq!(sold.holding, dec("0"));
        assert_eq!(sold.balance.crypto_balance, dec("0"));
        assert!(sold.liquidated);
        assert_eq!(sold.oracle.pdes_sell_price, dec("1.98"));
        assert_eq!(sold.oracle.pdes_circulating_supply, dec("1000"));
        assert_supply_conserved(&sold.oracle);
    }

    #[test]
    fn test_buy_candle_bounds_price_move() {
        let plan = plan_buy(
            &user(),
            &balance("10"),
            &BigDecimal::zero(),
            &oracle("2", "2"),
            &dec("10"),
            &dec("1.01"),
            "PDES",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.candle.open_price, dec("2"));
        assert_eq!(plan.candle.low_price, dec("2"));
        assert_eq!(plan.candle.high_price, dec("2.02"));
        assert_eq!(plan.candle.close_price, dec("2.02"));
        assert_eq!(plan.candle.volume, dec("5"));
        assert_eq!(plan.oracle.pdes_market_cap, dec("2.02") * dec("1005"));
    }

    #[test]
    fn test_buy_rejections() {
        let now = Utc::now();

        assert!(matches!(
            plan_buy(
                &user(),
                &balance("49.99"),
                &BigDecimal::zero(),
                &oracle("2", "2"),
                &dec("50"),
                &dec("1.01"),
                "PDES",
                now
            ),
            Err(Error::InsufficientBalance(_))
        ));
        assert!(matches!(
            plan_buy(
                &user(),
                &balance("50"),
                &BigDecimal::zero(),
                &oracle("0", "2"),
                &dec("50"),
                &dec("1.01"),
                "PDES",
                now
            ),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            plan_buy(
                &user(),
                &balance("50"),
                &BigDecimal::zero(),
                &oracle("2", "2"),
                &dec("-1"),
                &dec("1.01"),
                "PDES",
                now
            ),
            Err(Error::Validation(_))
        ));

        let mut scarce = oracle("2", "2");
        scarce.pdes_supply_left = dec("10");
        assert!(matches!(
            plan_buy(
                &user(),
                &balance("50"),
                &BigDecimal::zero(),
                &scarce,
                &dec("50"),
                &dec("1.01"),
                "PDES",
                now
            ),
            Err(Error::InsufficientSupply(_))
        ));
    }

    #[test]
    fn test_sell_needs_enough_tokens() {
        let result = plan_sell(
            &user(),
            &balance("0"),
            &dec("24.99"),
            &oracle("2", "2"),
            &dec("50"),
            &dec("0.99"),
            "PDES",
            Utc::now(),
        );

        assert!(matches!(result, Err(Error::InsufficientTokenBalance(_))));
    }

    #[test]
    fn test_partial_sell_credits_reward() {
        let plan = plan_sell(
            &user(),
            &balance("0"),
            &dec("30"),
            &oracle("2", "2"),
            &dec("20"),
            &dec("0.99"),
            "PDES",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.holding, dec("20"));
        assert!(!plan.liquidated);
        assert_eq!(plan.reward_earned, dec("0.2"));
        assert_eq!(plan.balance.rewards, dec("0.2"));
        assert_eq!(plan.balance.balance, dec("20"));
        assert_eq!(plan.candle.high_price, dec("2"));
        assert_eq!(plan.candle.low_price, dec("1.98"));
    }

    #[test]
    fn test_blocked_user_cannot_trade() {
        let mut blocked = user();
        blocked.is_blocked = true;

        assert!(matches!(
            plan_buy(
                &blocked,
                &balance("100"),
                &BigDecimal::zero(),
                &oracle("2", "2"),
                &dec("10"),
                &dec("1.01"),
                "PDES",
                Utc::now()
            ),
            Err(Error::AccountBlocked(1))
        ));
        assert!(matches!(
            plan_sell(
                &blocked,
                &balance("0"),
                &dec("25"),
                &oracle("2", "2"),
                &dec("10"),
                &dec("0.99"),
                "PDES",
                Utc::now()
            ),
            Err(Error::AccountBlocked(1))
        ));
    }

    #[test]
    fn test_amounts_below_storage_precision_are_rejected() {
        let dust = dec("0.0000000000000000001");

        assert!(matches!(
            plan_buy(
                &user(),
                &balance("100"),
                &BigDecimal::zero(),
                &oracle("2", "2"),
                &dust,
                &dec("1.01"),
                "PDES",
                Utc::now()
            ),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            plan_buy(
                &user(),
                &balance("100"),
                &BigDecimal::zero(),
                &oracle("4", "4"),
                &dec("0.000000000000000001"),
                &dec("1.01"),
                "PDES",
                Utc::now()
            ),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            plan_sell(
                &user(),
                &balance("0"),
                &dec("25"),
                &oracle("2", "2"),
                &dust,
                &dec("0.99"),
                "PDES",
                Utc::now()
            ),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_trades_imply_transfer_entries() {
        let bought = plan_buy(
            &user(),
            &balance("100"),
            &BigDecimal::zero(),
            &oracle("2", "2"),
            &dec("40"),
            &dec("1.01"),
            "PDES",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            bought.ledger,
            Ledger_Entry::completed(Transaction_Type::Transfer, dec("-40"))
        );
        assert_eq!(
            &balance("100").balance + &bought.ledger.amount,
            bought.balance.balance
        );

        let sold = plan_sell(
            &user(),
            &bought.balance,
            &bought.holding,
            &bought.oracle,
            &dec("10"),
            &dec("0.99"),
            "PDES",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(sold.ledger.amount, dec("10"));
        assert!(sold.ledger.reflected());
    }
}
