use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{Error, Transaction};

use crate::model::{Deposit_Account, Table};

use super::DataBase;

impl Table<Deposit_Account> {
    pub async fn insert(
        &self,
        user_id: i64,
        bank_name: &str,
        account_name: &str,
        account_number: &str,
        account_type: &str,
        max_deposit_amount: &BigDecimal,
    ) -> Result<Deposit_Account, Error> {
        const SQL: &str = r#"
        INSERT INTO "deposit_account" (
            "user_id",
            "bank_name",
            "account_name",
            "account_number",
            "account_type",
            "max_deposit_amount"
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#;

        sqlx::query_as(SQL)
            .bind(user_id)
            .bind(bank_name)
            .bind(account_name)
            .bind(account_number)
            .bind(account_type)
            .bind(max_deposit_amount)
            .fetch_one(&self.pool)
            .await
    }

    /// Serializes cap checks against the same collection account.
    pub async fn get_for_update(
        &self,
        id: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<Option<Deposit_Account>, Error> {
        const SQL: &str = r#"
        SELECT *
        FROM "deposit_account"
        WHERE "id" = $1
        FOR UPDATE
        "#;

        sqlx::query_as(SQL)
            .bind(id)
            .fetch_optional(&mut **transaction)
            .await
    }

    pub async fn get_eligible(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Deposit_Account>, Error> {
        const SQL: &str = r#"
        SELECT a.*
        FROM "deposit_account" a
        LEFT JOIN (
            SELECT
                "admin_id",
                SUM("amount") AS "total"
            FROM "deposit"
            WHERE
                "status" IN ('pending', 'completed') AND
                "created_at" >= $1 AND
                "created_at" < $2
            GROUP BY "admin_id"
        ) d ON d."admin_id" = a."id"
        WHERE COALESCE(d."total", 0) < a."max_deposit_amount"
        ORDER BY a."id"
        "#;

        sqlx::query_as(SQL)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
    }
}
