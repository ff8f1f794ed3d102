//! Command-line surface for the wallet service.
//!
//! `serve` runs the background jobs; the remaining commands drive single
//! engine operations for admin tooling and manual job runs.

use anyhow::Context;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use crate::{
    configuration::{
        get_configuration, set_configuration, AppState, Config, State,
    },
    error::Error,
    handler::{deposit, oracle, reconciliation, reward, trade, withdrawal},
    provider::DatabasePool,
    types::{
        Deposit_Account_Request, Deposit_Request, Oracle_Init, Oracle_Update,
        Reward_Setting_Request, Withdraw_Request,
    },
};

/// PDES custodial wallet ledger
#[derive(Parser)]
#[command(name = "wallet")]
#[command(about = "PDES wallet ledger and rewards engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler and notification consumer (default)
    Serve,

    /// Apply database migrations and exit
    Migrate,

    /// Run one reward accrual pass
    RewardTick,

    /// Run one reconciliation pass
    Reconcile,

    /// Buy PDES for a fiat amount
    Buy {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        amount: BigDecimal,
    },

    /// Sell PDES worth a fiat value
    Sell {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        amount: BigDecimal,
    },

    /// Register a pending deposit against an admin collection account
    RequestDeposit {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        admin_id: i64,
        #[arg(long)]
        amount: BigDecimal,
        #[arg(long)]
        transaction_id: String,
        #[arg(long, default_value = "bank")]
        method: String,
        #[arg(long)]
        currency: Option<String>,
    },

    ConfirmDeposit {
        #[arg(long)]
        deposit_id: i64,
        #[arg(long)]
        admin_id: i64,
    },

    FailDeposit {
        #[arg(long)]
        deposit_id: i64,
        #[arg(long)]
        admin_id: i64,
    },

    /// Request a withdrawal to a bank account or a crypto address
    Withdraw {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        amount: BigDecimal,
        #[arg(long)]
        account_name: Option<String>,
        #[arg(long)]
        account_number: Option<String>,
        #[arg(long)]
        crypto_address: Option<String>,
    },

    SettleWithdrawal {
        #[arg(long)]
        transaction_id: i64,
        #[arg(long)]
        admin_id: i64,
    },

    /// Fail a pending withdrawal and refund the user
    ReverseWithdrawal {
        #[arg(long)]
        transaction_id: i64,
        #[arg(long)]
        admin_id: i64,
    },

    /// Create the price oracle row
    OracleInit {
        #[arg(long)]
        admin_id: i64,
        #[arg(long)]
        buy_price: BigDecimal,
        #[arg(long)]
        sell_price: BigDecimal,
        #[arg(long)]
        total_supply: BigDecimal,
        #[arg(long)]
        circulating_supply: BigDecimal,
        #[arg(long)]
        conversion_rate: BigDecimal,
        #[arg(long)]
        reward_percentage: BigDecimal,
        #[arg(long)]
        referral_percentage: BigDecimal,
    },

    /// Change oracle prices, conversion rate or percentages
    OracleSet {
        #[arg(long)]
        admin_id: i64,
        #[arg(long)]
        buy_price: Option<BigDecimal>,
        #[arg(long)]
        sell_price: Option<BigDecimal>,
        #[arg(long)]
        conversion_rate: Option<BigDecimal>,
        #[arg(long)]
        reward_percentage: Option<BigDecimal>,
        #[arg(long)]
        referral_percentage: Option<BigDecimal>,
    },

    /// Price candles of the last N hours
    PriceHistory {
        #[arg(long, default_value = "24")]
        hours: i64,
    },

    AddRewardSetting {
        #[arg(long)]
        admin_id: i64,
        /// Percent per week, 20 = 20%
        #[arg(long)]
        weekly_percentage: BigDecimal,
        /// RFC 3339 timestamp
        #[arg(long)]
        start_date: String,
        #[arg(long)]
        end_date: Option<String>,
    },

    AddDepositAccount {
        #[arg(long)]
        admin_id: i64,
        #[arg(long)]
        bank_name: String,
        #[arg(long)]
        account_name: String,
        #[arg(long)]
        account_number: String,
        #[arg(long, default_value = "savings")]
        account_type: String,
        #[arg(long)]
        max_deposit_amount: BigDecimal,
    },

    /// Collection accounts still under today's cap
    DepositAccounts,

    /// Override a user's sticks and block flag
    SetStanding {
        #[arg(long)]
        admin_id: i64,
        #[arg(long)]
        user_id: i64,
        #[arg(long, default_value = "0")]
        sticks: i32,
        #[arg(long)]
        blocked: bool,
    },
}

/// Initialize configuration and return Config
pub fn init_config() -> Result<Config, Error> {
    set_configuration()?;
    get_configuration()
}

/// Connects, runs migrations and builds the shared state.
pub async fn init_state() -> Result<AppState<State>, Error> {
    let config = init_config()?;
    let database = DatabasePool::new(&config)
        .await
        .context("could not connect to the database")?;
    let state = State::new(config, database).await?;
    Ok(AppState::new(state))
}

fn parse_date(value: &str, field: &str) -> Result<DateTime<Utc>, Error> {
    let date = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("{} must be an RFC 3339 timestamp", field))?;
    Ok(date.with_timezone(&Utc))
}

fn report<T: Serialize>(name: &str, value: &T) -> Result<(), Error> {
    info!("{}: {}", name, serde_json::to_string(value)?);
    Ok(())
}

/// Runs every command except `serve`.
pub async fn run_command(
    app_state: &AppState<State>,
    command: Commands,
) -> Result<(), Error> {
    match command {
        Commands::Serve | Commands::Migrate => Ok(()),
        Commands::RewardTick => {
            match reward::run_reward_tick(app_state).await? {
                Some(summary) => report("reward tick", &summary),
                None => {
                    info!("Reward tick skipped, a run is already in progress");
                    Ok(())
                },
            }
        },
        Commands::Reconcile => {
            match reconciliation::run_reconciliation(app_state).await? {
                Some(summary) => report("reconciliation", &summary),
                None => {
                    info!(
                        "Reconciliation skipped, a run is already in progress"
                    );
                    Ok(())
                },
            }
        },
        Commands::Buy { user_id, amount } => {
            let outcome = trade::buy(app_state, user_id, amount).await?;
            report("buy", &outcome)
        },
        Commands::Sell { user_id, amount } => {
            let outcome = trade::sell(app_state, user_id, amount).await?;
            report("sell", &outcome)
        },
        Commands::RequestDeposit {
            user_id,
            admin_id,
            amount,
            transaction_id,
            method,
            currency,
        } => {
            let request = Deposit_Request {
                user_id,
                admin_id,
                amount,
                currency: currency.unwrap_or_else(|| {
                    app_state.config.default_currency.to_owned()
                }),
                transaction_id,
                deposit_method: method,
            };
            let deposit = deposit::request_deposit(app_state, request).await?;
            report("deposit", &deposit)
        },
        Commands::ConfirmDeposit {
            deposit_id,
            admin_id,
        } => {
            let confirmation =
                deposit::confirm_deposit(app_state, deposit_id, admin_id)
                    .await?;
            report("confirmed deposit", &confirmation)
        },
        Commands::FailDeposit {
            deposit_id,
            admin_id,
        } => deposit::fail_deposit(app_state, deposit_id, admin_id).await,
        Commands::Withdraw {
            user_id,
            amount,
            account_name,
            account_number,
            crypto_address,
        } => {
            let request = Withdraw_Request {
                user_id,
                amount,
                account_name,
                account_number,
                crypto_address,
            };
            let withdrawal = withdrawal::withdraw(app_state, request).await?;
            report("withdrawal", &withdrawal)
        },
        Commands::SettleWithdrawal {
            transaction_id,
            admin_id,
        } => {
            withdrawal::settle_withdrawal(app_state, transaction_id, admin_id)
                .await
        },
        Commands::ReverseWithdrawal {
            transaction_id,
            admin_id,
        } => {
            let refund = withdrawal::reverse_withdrawal(
                app_state,
                transaction_id,
                admin_id,
            )
            .await?;
            report("refund", &refund)
        },
        Commands::OracleInit {
            admin_id,
            buy_price,
            sell_price,
            total_supply,
            circulating_supply,
            conversion_rate,
            reward_percentage,
            referral_percentage,
        } => {
            let init = Oracle_Init {
                buy_price,
                sell_price,
                total_supply,
                circulating_supply,
                conversion_rate,
                reward_percentage,
                referral_percentage,
            };
            let oracle =
                oracle::initialize_oracle(app_state, admin_id, init).await?;
            report("price oracle", &oracle)
        },
        Commands::OracleSet {
            admin_id,
            buy_price,
            sell_price,
            conversion_rate,
            reward_percentage,
            referral_percentage,
        } => {
            let update = Oracle_Update {
                buy_price,
                sell_price,
                conversion_rate,
                reward_percentage,
                referral_percentage,
            };
            let oracle =
                oracle::update_oracle(app_state, admin_id, update).await?;
            report("price oracle", &oracle)
        },
        Commands::PriceHistory { hours } => {
            let since = Utc::now() - Duration::hours(hours);
            let candles = oracle::price_history(app_state, since).await?;
            report("price history", &candles)
        },
        Commands::AddRewardSetting {
            admin_id,
            weekly_percentage,
            start_date,
            end_date,
        } => {
            let request = Reward_Setting_Request {
                weekly_percentage,
                start_date: parse_date(&start_date, "start_date")?,
                end_date: end_date
                    .as_deref()
                    .map(|value| parse_date(value, "end_date"))
                    .transpose()?,
            };
            let setting =
                reward::add_reward_setting(app_state, admin_id, request)
                    .await?;
            report("reward setting", &setting)
        },
        Commands::AddDepositAccount {
            admin_id,
            bank_name,
            account_name,
            account_number,
            account_type,
            max_deposit_amount,
        } => {
            let request = Deposit_Account_Request {
                bank_name,
                account_name,
                account_number,
                account_type,
                max_deposit_amount,
            };
            let account =
                deposit::add_deposit_account(app_state, admin_id, request)
                    .await?;
            report("deposit account", &account)
        },
        Commands::SetStanding {
            admin_id,
            user_id,
            sticks,
            blocked,
        } => {
            let change = reconciliation::set_user_standing(
                app_state, admin_id, user_id, sticks, blocked,
            )
            .await?;
            report("standing", &change)
        },
        Commands::DepositAccounts => {
            let accounts =
                deposit::eligible_deposit_accounts(app_state, Utc::now())
                    .await?;
            report("eligible deposit accounts", &accounts)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from([
            "wallet",
            "buy",
            "--user-id",
            "7",
            "--amount",
            "50.25",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Buy { user_id, amount }) => {
                assert_eq!(user_id, 7);
                assert_eq!(amount, "50.25".parse::<BigDecimal>().unwrap());
            },
            _ => panic!("expected buy"),
        }

        let cli = Cli::try_parse_from(["wallet"]).unwrap();
        assert!(cli.command.is_none());

        assert!(Cli::try_parse_from([
            "wallet", "sell", "--user-id", "7", "--amount", "abc"
        ])
        .is_err());
    }

    #[test]
    fn test_parse_set_standing() {
        let cli = Cli::try_parse_from([
            "wallet",
            "set-standing",
            "--admin-id",
            "2",
            "--user-id",
            "9",
            "--blocked",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::SetStanding {
                admin_id,
                user_id,
                sticks,
                blocked,
            }) => {
                assert_eq!((admin_id, user_id, sticks), (2, 9, 0));
                assert!(blocked);
            },
            _ => panic!("expected set-standing"),
        }
    }

    #[test]
    fn test_parse_date() {
        let date = parse_date("2025-03-01T00:00:00+01:00", "start_date").unwrap();
        assert_eq!(date.to_rfc3339(), "2025-02-28T23:00:00+00:00");
        assert!(matches!(
            parse_date("yesterday", "start_date"),
            Err(Error::AnyHowError(_))
        ));
    }
}
