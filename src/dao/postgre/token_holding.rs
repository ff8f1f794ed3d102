use bigdecimal::BigDecimal;
use sqlx::{Error, Transaction};

use crate::model::{Table, Token_Holding};

use super::{DataBase, QueryResult};

impl Table<Token_Holding> {
    pub async fn get_for_update(
        &self,
        user_id: i64,
        crypto_name: &str,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<Option<Token_Holding>, Error> {
        const SQL: &str = r#"
        SELECT
            "id",
            "user_id",
            "crypto_name",
            "amount",
            "updated_at"
        FROM "crypto"
        WHERE
            "user_id" = $1 AND
            "crypto_name" = $2
        FOR UPDATE
        "#;

        sqlx::query_as(SQL)
            .bind(user_id)
            .bind(crypto_name)
            .fetch_optional(&mut **transaction)
            .await
    }

    pub async fn upsert(
        &self,
        user_id: i64,
        crypto_name: &str,
        amount: &BigDecimal,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        INSERT INTO "crypto" (
            "user_id",
            "crypto_name",
            "amount"
        )
        VALUES ($1, $2, $3)
        ON CONFLICT ("user_id", "crypto_name")
        DO UPDATE SET
            "amount" = EXCLUDED."amount",
            "updated_at" = NOW()
        "#;

        sqlx::query(SQL)
            .bind(user_id)
            .bind(crypto_name)
            .bind(amount)
            .execute(&mut **transaction)
            .await
    }

    pub async fn get_user_total(
        &self,
        user_id: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<BigDecimal, Error> {
        const SQL: &str = r#"
        SELECT COALESCE(SUM("amount"), 0)
        FROM "crypto"
        WHERE "user_id" = $1
        "#;

        let (total,): (BigDecimal,) = sqlx::query_as(SQL)
            .bind(user_id)
            .fetch_one(&mut **transaction)
            .await?;

        Ok(total)
    }

    /// Everything held of one token across all users.
    pub async fn get_token_total(
        &self,
        crypto_name: &str,
    ) -> Result<BigDecimal, Error> {
        const SQL: &str = r#"
        SELECT COALESCE(SUM("amount"), 0)
        FROM "crypto"
        WHERE "crypto_name" = $1
        "#;

        let (total,): (BigDecimal,) = sqlx::query_as(SQL)
            .bind(crypto_name)
            .fetch_one(&self.pool)
            .await?;

        Ok(total)
    }
}
