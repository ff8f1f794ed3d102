#[cfg(feature = "postgres")]
mod postgre;

#[cfg(feature = "postgres")]
pub use postgre::{
    read_migration, DataBase, PoolOption, PoolType, QueryResult,
    DEADLOCK_ERROR, DUPLICATE_ERROR, PRICE_ORACLE_ID, SERIALIZATION_ERROR,
};
