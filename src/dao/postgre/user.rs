use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{Error, Transaction};

use crate::model::{Table, User};

use super::{DataBase, QueryResult};

const USER_COLUMNS: &str = r#"
    "id",
    "username",
    "email",
    "role",
    "sticks",
    "is_blocked",
    "referrer_id",
    "total_referrals",
    "referral_reward",
    "last_reward_date",
    "created_at"
"#;

impl Table<User> {
    pub async fn get(&self, id: i64) -> Result<Option<User>, Error> {
        let sql = format!(r#"SELECT {} FROM "user" WHERE "id" = $1"#, USER_COLUMNS);

        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_for_update(
        &self,
        id: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<Option<User>, Error> {
        let sql = format!(
            r#"SELECT {} FROM "user" WHERE "id" = $1 FOR UPDATE"#,
            USER_COLUMNS
        );

        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut **transaction)
            .await
    }

    /// Users whose reward clock has started, i.e. with at least one
    /// confirmed deposit.
    pub async fn get_reward_candidates(&self) -> Result<Vec<i64>, Error> {
        const SQL: &str = r#"
        SELECT "id"
        FROM "user"
        WHERE
            "last_reward_date" IS NOT NULL AND
            "is_blocked" = FALSE
        ORDER BY "id"
        "#;

        let rows: Vec<(i64,)> =
            sqlx::query_as(SQL).fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn get_ids(&self) -> Result<Vec<i64>, Error> {
        const SQL: &str = r#"
        SELECT "id"
        FROM "user"
        ORDER BY "id"
        "#;

        let rows: Vec<(i64,)> =
            sqlx::query_as(SQL).fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn set_last_reward_date(
        &self,
        id: i64,
        last_reward_date: DateTime<Utc>,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        UPDATE "user"
        SET "last_reward_date" = $2
        WHERE "id" = $1
        "#;

        sqlx::query(SQL)
            .bind(id)
            .bind(last_reward_date)
            .execute(&mut **transaction)
            .await
    }

    /// `new_referral` counts the referred user once, on their first
    /// confirmed deposit.
    pub async fn add_referral_reward(
        &self,
        id: i64,
        reward: &BigDecimal,
        new_referral: bool,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        UPDATE "user"
        SET
            "referral_reward" = "referral_reward" + $2,
            "total_referrals" = "total_referrals" + $3
        WHERE "id" = $1
        "#;

        sqlx::query(SQL)
            .bind(id)
            .bind(reward)
            .bind(i32::from(new_referral))
            .execute(&mut **transaction)
            .await
    }

    pub async fn reset_referral_reward(
        &self,
        id: i64,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        UPDATE "user"
        SET "referral_reward" = 0
        WHERE "id" = $1
        "#;

        sqlx::query(SQL)
            .bind(id)
            .execute(&mut **transaction)
            .await
    }

    pub async fn set_standing(
        &self,
        id: i64,
        sticks: i32,
        is_blocked: bool,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        UPDATE "user"
        SET
            "sticks" = $2,
            "is_blocked" = $3
        WHERE "id" = $1
        "#;

        sqlx::query(SQL)
            .bind(id)
            .bind(sticks)
            .bind(is_blocked)
            .execute(&mut **transaction)
            .await
    }
}
