use chrono::{DateTime, Utc};
use sqlx::{Error, Transaction};

use crate::model::{Reward_Setting, Table};

use super::{DataBase, QueryResult};

impl Table<Reward_Setting> {
    /// The window containing `at`; the latest start wins if windows
    /// were ever left overlapping.
    pub async fn get_active(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Option<Reward_Setting>, Error> {
        const SQL: &str = r#"
        SELECT *
        FROM "reward_setting"
        WHERE
            "start_date" <= $1 AND
            ("end_date" IS NULL OR "end_date" > $1)
        ORDER BY "start_date" DESC, "id" DESC
        LIMIT 1
        "#;

        sqlx::query_as(SQL)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
    }

    /// Ends every open window that started before `at`.
    pub async fn close_open(
        &self,
        at: DateTime<Utc>,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        UPDATE "reward_setting"
        SET "end_date" = $1
        WHERE
            "end_date" IS NULL AND
            "start_date" < $1
        "#;

        sqlx::query(SQL)
            .bind(at)
            .execute(&mut **transaction)
            .await
    }

    pub async fn insert(
        &self,
        data: &Reward_Setting,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<i64, Error> {
        const SQL: &str = r#"
        INSERT INTO "reward_setting" (
            "weekly_percentage",
            "start_date",
            "end_date"
        )
        VALUES ($1, $2, $3)
        RETURNING "id"
        "#;

        let (id,): (i64,) = sqlx::query_as(SQL)
            .bind(&data.weekly_percentage)
            .bind(data.start_date)
            .bind(data.end_date)
            .fetch_one(&mut **transaction)
            .await?;

        Ok(id)
    }
}
