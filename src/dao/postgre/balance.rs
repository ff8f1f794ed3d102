use sqlx::{Error, Transaction};

use crate::model::{Balance, Table};

use super::{DataBase, QueryResult};

impl Table<Balance> {
    /// Creates the zeroed row on first touch, then locks it for the rest
    /// of the transaction.
    pub async fn get_or_create_for_update(
        &self,
        user_id: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<Balance, Error> {
        const INSERT: &str = r#"
        INSERT INTO "balance" ("user_id")
        VALUES ($1)
        ON CONFLICT ("user_id") DO NOTHING
        "#;

        const SELECT: &str = r#"
        SELECT
            "user_id",
            "balance",
            "crypto_balance",
            "rewards",
            "updated_at"
        FROM "balance"
        WHERE "user_id" = $1
        FOR UPDATE
        "#;

        sqlx::query(INSERT)
            .bind(user_id)
            .execute(&mut **transaction)
            .await?;

        sqlx::query_as(SELECT)
            .bind(user_id)
            .fetch_one(&mut **transaction)
            .await
    }

    pub async fn update(
        &self,
        data: &Balance,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        UPDATE "balance"
        SET
            "balance" = $2,
            "crypto_balance" = $3,
            "rewards" = $4,
            "updated_at" = NOW()
        WHERE "user_id" = $1
        "#;

        sqlx::query(SQL)
            .bind(data.user_id)
            .bind(&data.balance)
            .bind(&data.crypto_balance)
            .bind(&data.rewards)
            .execute(&mut **transaction)
            .await
    }
}
