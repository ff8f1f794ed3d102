use sqlx::{Error, Transaction};

use crate::model::{Pdes_Transaction, Table};

use super::{DataBase, QueryResult};

impl Table<Pdes_Transaction> {
    pub async fn insert(
        &self,
        data: &Pdes_Transaction,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        INSERT INTO "pdes_transaction" (
            "user_id",
            "action",
            "amount",
            "price",
            "total",
            "reward_earned",
            "created_at"
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#;

        sqlx::query(SQL)
            .bind(data.user_id)
            .bind(&data.action)
            .bind(&data.amount)
            .bind(&data.price)
            .bind(&data.total)
            .bind(&data.reward_earned)
            .bind(data.created_at)
            .execute(&mut **transaction)
            .await
    }
}
