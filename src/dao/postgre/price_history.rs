use chrono::{DateTime, Utc};
use sqlx::{Error, Transaction};

use crate::model::{Price_History, Table};

use super::{DataBase, QueryResult};

impl Table<Price_History> {
    pub async fn insert(
        &self,
        data: &Price_History,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        INSERT INTO "coin_price_history" (
            "crypto_name",
            "action",
            "open_price",
            "high_price",
            "low_price",
            "close_price",
            "volume",
            "timestamp"
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;

        sqlx::query(SQL)
            .bind(&data.crypto_name)
            .bind(&data.action)
            .bind(&data.open_price)
            .bind(&data.high_price)
            .bind(&data.low_price)
            .bind(&data.close_price)
            .bind(&data.volume)
            .bind(data.timestamp)
            .execute(&mut **transaction)
            .await
    }

    pub async fn get_since(
        &self,
        crypto_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Price_History>, Error> {
        const SQL: &str = r#"
        SELECT *
        FROM "coin_price_history"
        WHERE
            "crypto_name" = $1 AND
            "timestamp" >= $2
        ORDER BY "timestamp" ASC, "id" ASC
        "#;

        sqlx::query_as(SQL)
            .bind(crypto_name)
            .bind(since)
            .fetch_all(&self.pool)
            .await
    }
}
