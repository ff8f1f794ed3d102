use std::{env, fs, ops::Deref, str::FromStr, sync::Arc};

use bigdecimal::BigDecimal;
use tokio::sync::Mutex;

use crate::{
    dao::read_migration,
    error::Error,
    provider::{DatabasePool, Notifier},
};

#[derive(Debug)]
pub struct AppState<T>(Arc<T>);

impl<T> AppState<T> {
    pub fn new(state: T) -> AppState<T> {
        AppState(Arc::new(state))
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> AppState<T> {
        AppState(Arc::clone(&self.0))
    }
}

impl<T> Deref for AppState<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.0
    }
}

/// Held for the whole of a job run; a second run of the same job is
/// skipped rather than queued.
#[derive(Debug, Default)]
pub struct JobLocks {
    pub reward: Mutex<()>,
    pub reconciliation: Mutex<()>,
}

#[derive(Debug)]
pub struct State {
    pub config: Config,
    pub database: DatabasePool,
    pub notifier: Notifier,
    pub jobs: JobLocks,
}

impl State {
    pub async fn new(
        config: Config,
        database: DatabasePool,
    ) -> Result<State, Error> {
        Self::init_migrations(&database).await?;
        let notifier = Notifier::new(config.event_channel_capacity);

        Ok(Self {
            config,
            database,
            notifier,
            jobs: JobLocks::default(),
        })
    }

    pub async fn init_migrations(database: &DatabasePool) -> Result<(), Error> {
        let files = vec![
            "user.sql",
            "balance.sql",
            "crypto.sql",
            "transaction.sql",
            "deposit_account.sql",
            "deposit.sql",
            "utility.sql",
            "coin_price_history.sql",
            "reward_setting.sql",
            "pdes_transaction.sql",
            "action_history.sql",
        ];

        let dir = env!("CARGO_MANIFEST_DIR");

        for file in files {
            let ddl = read_migration(dir, file)?;
            sqlx::raw_sql(ddl.as_str()).execute(&database.pool).await?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub statement_timeout: u64,
    pub enable_scheduler: bool,
    pub reward_interval: u64,
    pub reconciliation_interval: u64,
    pub job_concurrency: usize,
    pub storage_retry_attempts: u8,
    pub token_symbol: String,
    pub default_currency: String,
    pub buy_price_pressure: BigDecimal,
    pub sell_price_pressure: BigDecimal,
    pub balance_tolerance: BigDecimal,
    pub token_tolerance: BigDecimal,
    pub max_sticks: i32,
    pub min_reward_elapsed_days: BigDecimal,
    pub reset_referrer_reward_on_liquidation: bool,
    pub event_channel_capacity: usize,
}

pub fn get_configuration() -> Result<Config, Error> {
    let database_url = env::var("DATABASE_URL")?;
    let max_connections = env::var("MAX_CONNECTIONS")?.parse()?;
    let statement_timeout = env::var("STATEMENT_TIMEOUT_IN_SEC")?.parse()?;
    let enable_scheduler = env::var("ENABLE_SCHEDULER")?.parse()?;
    let reward_interval = env::var("REWARD_INTERVAL_IN_MINUTES")?.parse()?;
    let reconciliation_interval =
        env::var("RECONCILIATION_INTERVAL_IN_MINUTES")?.parse()?;
    let job_concurrency = env::var("JOB_CONCURRENCY")?.parse()?;
    let storage_retry_attempts = env::var("STORAGE_RETRY_ATTEMPTS")?.parse()?;
    let token_symbol = env::var("TOKEN_SYMBOL")?;
    let default_currency = env::var("DEFAULT_CURRENCY")?;
    let buy_price_pressure =
        BigDecimal::from_str(&env::var("BUY_PRICE_PRESSURE")?)?;
    let sell_price_pressure =
        BigDecimal::from_str(&env::var("SELL_PRICE_PRESSURE")?)?;
    let balance_tolerance =
        BigDecimal::from_str(&env::var("BALANCE_TOLERANCE")?)?;
    let token_tolerance = BigDecimal::from_str(&env::var("TOKEN_TOLERANCE")?)?;
    let max_sticks = env::var("MAX_STICKS")?.parse()?;
    let min_reward_elapsed_days =
        BigDecimal::from_str(&env::var("MIN_REWARD_ELAPSED_DAYS")?)?;
    let reset_referrer_reward_on_liquidation =
        env::var("RESET_REFERRER_REWARD_ON_LIQUIDATION")?.parse()?;
    let event_channel_capacity = env::var("EVENT_CHANNEL_CAPACITY")?.parse()?;

    let config = Config {
        database_url,
        max_connections,
        statement_timeout,
        enable_scheduler,
        reward_interval,
        reconciliation_interval,
        job_concurrency,
        storage_retry_attempts,
        token_symbol,
        default_currency,
        buy_price_pressure,
        sell_price_pressure,
        balance_tolerance,
        token_tolerance,
        max_sticks,
        min_reward_elapsed_days,
        reset_referrer_reward_on_liquidation,
        event_channel_capacity,
    };

    config.validate()?;

    Ok(config)
}

impl Config {
    fn validate(&self) -> Result<(), Error> {
        if self.job_concurrency == 0 {
            return Err(Error::ConfigurationError(String::from(
                "JOB_CONCURRENCY must be at least 1",
            )));
        }

        if self.job_concurrency >= self.max_connections as usize {
            return Err(Error::ConfigurationError(String::from(
                "JOB_CONCURRENCY must leave one connection for the job lock",
            )));
        }

        if self.event_channel_capacity == 0 {
            return Err(Error::ConfigurationError(String::from(
                "EVENT_CHANNEL_CAPACITY must be at least 1",
            )));
        }

        if self.reward_interval == 0 || self.reconciliation_interval == 0 {
            return Err(Error::ConfigurationError(String::from(
                "job intervals must be at least one minute",
            )));
        }

        Ok(())
    }
}

pub fn set_configuration() -> Result<(), Error> {
    let config_file: &str = ".env";
    let wallet_config_file: &str = "wallet.conf";

    let directory = env!("CARGO_MANIFEST_DIR");
    let path = format!("{}/{}", directory, config_file);
    let wallet_config_path = format!("{}/{}", directory, wallet_config_file);

    let config_string = fs::read_to_string(path)?;
    let wallet_config_string = fs::read_to_string(wallet_config_path)?;

    parse_config_string(config_string);
    parse_config_string(wallet_config_string);

    Ok(())
}

fn parse_config_pairs(config: &str) -> Vec<(&str, &str)> {
    config
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

fn parse_config_string(config: String) {
    for (key, value) in parse_config_pairs(&config) {
        env::set_var(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: String::from("postgres://u:p@localhost/wallet"),
            max_connections: 10,
            statement_timeout: 30,
            enable_scheduler: true,
            reward_interval: 60,
            reconciliation_interval: 1440,
            job_concurrency: 8,
            storage_retry_attempts: 3,
            token_symbol: String::from("PDES"),
            default_currency: String::from("naira"),
            buy_price_pressure: BigDecimal::from_str("1.01").unwrap(),
            sell_price_pressure: BigDecimal::from_str("0.99").unwrap(),
            balance_tolerance: BigDecimal::from_str("0.01").unwrap(),
            token_tolerance: BigDecimal::from_str("0.01").unwrap(),
            max_sticks: 3,
            min_reward_elapsed_days: BigDecimal::from_str("0.01").unwrap(),
            reset_referrer_reward_on_liquidation: false,
            event_channel_capacity: 256,
        }
    }

    #[test]
    fn test_job_concurrency_leaves_a_connection_for_the_job_lock() {
        assert!(config().validate().is_ok());

        let mut config = config();
        config.job_concurrency = 10;
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigurationError(_))
        ));

        config.job_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_parse_config_pairs_skips_comments() {
        let content = "# reward job\nREWARD_INTERVAL_IN_MINUTES=60\n\nDATABASE_URL=postgres://u:p@localhost/db?sslmode=disable\nBROKEN LINE\n";
        let pairs = parse_config_pairs(content);

        assert_eq!(
            pairs,
            vec![
                ("REWARD_INTERVAL_IN_MINUTES", "60"),
                (
                    "DATABASE_URL",
                    "postgres://u:p@localhost/db?sslmode=disable"
                ),
            ]
        );
    }
}
