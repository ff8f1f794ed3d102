use sqlx::{
    postgres::{PgPoolOptions, PgQueryResult},
    PgPool, Postgres,
};

pub type PoolType = PgPool;
pub type PoolOption = PgPoolOptions;
pub type QueryResult = PgQueryResult;
pub type DataBase = Postgres;

pub const DUPLICATE_ERROR: &str = "23505";
pub const SERIALIZATION_ERROR: &str = "40001";
pub const DEADLOCK_ERROR: &str = "40P01";
