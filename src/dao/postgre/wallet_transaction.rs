use bigdecimal::BigDecimal;
use sqlx::{Error, Transaction};

use crate::model::{Table, Wallet_Transaction, WITHDRAW_TYPE};

use super::{DataBase, QueryResult};

impl Table<Wallet_Transaction> {
    pub async fn insert(
        &self,
        data: &Wallet_Transaction,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<i64, Error> {
        const SQL: &str = r#"
        INSERT INTO "transaction" (
            "user_id",
            "confirm_by",
            "amount",
            "currency",
            "transaction_type",
            "transaction_completed",
            "transaction_failed",
            "account_name",
            "account_number",
            "crypto_address",
            "created_at"
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING "id"
        "#;

        let (id,): (i64,) = sqlx::query_as(SQL)
            .bind(data.user_id)
            .bind(data.confirm_by)
            .bind(&data.amount)
            .bind(&data.currency)
            .bind(&data.transaction_type)
            .bind(data.transaction_completed)
            .bind(data.transaction_failed)
            .bind(&data.account_name)
            .bind(&data.account_number)
            .bind(&data.crypto_address)
            .bind(data.created_at)
            .fetch_one(&mut **transaction)
            .await?;

        Ok(id)
    }

    pub async fn get_for_update(
        &self,
        id: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<Option<Wallet_Transaction>, Error> {
        const SQL: &str = r#"
        SELECT
            "id",
            "user_id",
            "confirm_by",
            "amount",
            "currency",
            "transaction_type",
            "transaction_completed",
            "transaction_failed",
            "account_name",
            "account_number",
            "crypto_address",
            "created_at"
        FROM "transaction"
        WHERE "id" = $1
        FOR UPDATE
        "#;

        sqlx::query_as(SQL)
            .bind(id)
            .fetch_optional(&mut **transaction)
            .await
    }

    pub async fn mark_completed(
        &self,
        id: i64,
        confirm_by: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        UPDATE "transaction"
        SET
            "transaction_completed" = TRUE,
            "confirm_by" = $2,
            "updated_at" = NOW()
        WHERE
            "id" = $1 AND
            "transaction_completed" = FALSE AND
            "transaction_failed" = FALSE
        "#;

        sqlx::query(SQL)
            .bind(id)
            .bind(confirm_by)
            .execute(&mut **transaction)
            .await
    }

    pub async fn mark_failed(
        &self,
        id: i64,
        confirm_by: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        UPDATE "transaction"
        SET
            "transaction_failed" = TRUE,
            "confirm_by" = $2,
            "updated_at" = NOW()
        WHERE
            "id" = $1 AND
            "transaction_completed" = FALSE AND
            "transaction_failed" = FALSE
        "#;

        sqlx::query(SQL)
            .bind(id)
            .bind(confirm_by)
            .execute(&mut **transaction)
            .await
    }

    /// Signed sum of every entry already applied to the cached balance:
    /// completed rows plus withdrawals, which debit at request time. Same
    /// rule as `Transaction_Type::reflected_in_balance`.
    pub async fn get_ledger_balance(
        &self,
        user_id: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<BigDecimal, Error> {
        const SQL: &str = r#"
        SELECT COALESCE(SUM("amount"), 0)
        FROM "transaction"
        WHERE
            "user_id" = $1 AND
            (
                "transaction_completed" = TRUE OR
                "transaction_type" LIKE $2
            )
        "#;

        let (total,): (BigDecimal,) = sqlx::query_as(SQL)
            .bind(user_id)
            .bind(format!("{}%", WITHDRAW_TYPE))
            .fetch_one(&mut **transaction)
            .await?;

        Ok(total)
    }
}
