pub use self::{
    path::read_migration,
    price_oracle::PRICE_ORACLE_ID,
    types::{
        DataBase, PoolOption, PoolType, QueryResult, DEADLOCK_ERROR,
        DUPLICATE_ERROR, SERIALIZATION_ERROR,
    },
};
mod action_history;
mod balance;
mod deposit;
mod deposit_account;
mod path;
mod pdes_transaction;
mod price_history;
mod price_oracle;
mod reward_setting;
mod token_holding;
mod types;
mod user;
mod wallet_transaction;
