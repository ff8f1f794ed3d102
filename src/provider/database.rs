use sqlx::Executor;

use crate::{
    configuration::Config,
    dao::{PoolOption, PoolType},
    error::Error,
    model::{
        Action_History, Balance, Deposit, Deposit_Account, Pdes_Transaction,
        Price_History, Price_Oracle, Reward_Setting, Table, Token_Holding,
        User, Wallet_Transaction,
    },
};

#[derive(Debug)]
pub struct DatabasePool {
    pub user: Table<User>,
    pub balance: Table<Balance>,
    pub token_holding: Table<Token_Holding>,
    pub wallet_transaction: Table<Wallet_Transaction>,
    pub deposit: Table<Deposit>,
    pub deposit_account: Table<Deposit_Account>,
    pub price_oracle: Table<Price_Oracle>,
    pub price_history: Table<Price_History>,
    pub pdes_transaction: Table<Pdes_Transaction>,
    pub reward_setting: Table<Reward_Setting>,
    pub action_history: Table<Action_History>,
    pub pool: PoolType,
}

impl DatabasePool {
    pub async fn new(config: &Config) -> Result<DatabasePool, Error> {
        let statement_timeout =
            format!("SET statement_timeout = '{}s'", config.statement_timeout);

        let pool = PoolOption::new()
            .after_connect(move |conn, _meta| {
                let statement_timeout = statement_timeout.clone();
                Box::pin(async move {
                    conn.execute(statement_timeout.as_str()).await?;
                    Ok(())
                })
            })
            .max_connections(config.max_connections)
            .connect(config.database_url.as_str())
            .await?;

        Ok(DatabasePool {
            pool: pool.clone(),
            user: Table::new(pool.clone()),
            balance: Table::new(pool.clone()),
            token_holding: Table::new(pool.clone()),
            wallet_transaction: Table::new(pool.clone()),
            deposit: Table::new(pool.clone()),
            deposit_account: Table::new(pool.clone()),
            price_oracle: Table::new(pool.clone()),
            price_history: Table::new(pool.clone()),
            pdes_transaction: Table::new(pool.clone()),
            reward_setting: Table::new(pool.clone()),
            action_history: Table::new(pool),
        })
    }
}
