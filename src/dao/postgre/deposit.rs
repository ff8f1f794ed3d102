use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{Error, Transaction};

use crate::model::{Deposit, Deposit_Status, Table};

use super::{DataBase, QueryResult};

impl Table<Deposit> {
    /// Fails with a unique violation when `transaction_id` was used before.
    pub async fn insert(
        &self,
        user_id: i64,
        admin_id: i64,
        amount: &BigDecimal,
        currency: &str,
        transaction_id: &str,
        deposit_method: &str,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<Deposit, Error> {
        const SQL: &str = r#"
        INSERT INTO "deposit" (
            "user_id",
            "admin_id",
            "amount",
            "currency",
            "transaction_id",
            "deposit_method",
            "status"
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#;

        sqlx::query_as(SQL)
            .bind(user_id)
            .bind(admin_id)
            .bind(amount)
            .bind(currency)
            .bind(transaction_id)
            .bind(deposit_method)
            .bind(String::from(Deposit_Status::Pending))
            .fetch_one(&mut **transaction)
            .await
    }

    pub async fn get_for_update(
        &self,
        id: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<Option<Deposit>, Error> {
        const SQL: &str = r#"
        SELECT *
        FROM "deposit"
        WHERE "id" = $1
        FOR UPDATE
        "#;

        sqlx::query_as(SQL)
            .bind(id)
            .fetch_optional(&mut **transaction)
            .await
    }

    /// Pending plus completed deposits against one collection account
    /// inside `[from, to)`.
    pub async fn get_account_total(
        &self,
        admin_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<BigDecimal, Error> {
        const SQL: &str = r#"
        SELECT COALESCE(SUM("amount"), 0)
        FROM "deposit"
        WHERE
            "admin_id" = $1 AND
            "status" IN ('pending', 'completed') AND
            "created_at" >= $2 AND
            "created_at" < $3
        "#;

        let (total,): (BigDecimal,) = sqlx::query_as(SQL)
            .bind(admin_id)
            .bind(from)
            .bind(to)
            .fetch_one(&mut **transaction)
            .await?;

        Ok(total)
    }

    /// Only moves a pending deposit; zero rows affected means it was
    /// already settled.
    pub async fn set_status(
        &self,
        id: i64,
        status: Deposit_Status,
        confirmed_by: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        UPDATE "deposit"
        SET
            "status" = $2,
            "confirmed_by" = $3,
            "updated_at" = NOW()
        WHERE
            "id" = $1 AND
            "status" = 'pending'
        "#;

        sqlx::query(SQL)
            .bind(id)
            .bind(String::from(status))
            .bind(confirmed_by)
            .execute(&mut **transaction)
            .await
    }
}
