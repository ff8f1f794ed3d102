use sqlx::{Error, Transaction};

use crate::model::{Action_History, Actions, Table};

use super::DataBase;

/// First key of every job advisory lock, the second is `Actions::lock_key`.
const JOB_LOCK_NAMESPACE: i32 = 7_201;

impl Table<Action_History> {
    /// Opens the transaction a job run keeps until it records itself.
    /// Returns `None` while another process holds the same job; the
    /// advisory lock ends with the transaction.
    pub async fn try_lock_job(
        &self,
        action: Actions,
    ) -> Result<Option<Transaction<'static, DataBase>>, Error> {
        const SQL: &str = r#"
        SELECT pg_try_advisory_xact_lock($1, $2)
        "#;

        let mut transaction = self.pool.begin().await?;
        let (locked,): (bool,) = sqlx::query_as(SQL)
            .bind(JOB_LOCK_NAMESPACE)
            .bind(action.lock_key())
            .fetch_one(&mut *transaction)
            .await?;

        if !locked {
            transaction.rollback().await?;
            return Ok(None);
        }

        Ok(Some(transaction))
    }

    pub async fn insert(
        &self,
        data: Action_History,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<(), Error> {
        const SQL: &str = r#"
        INSERT INTO "action_history" (
            "action_type",
            "created_at"
        )
        VALUES ($1, $2)
        "#;

        sqlx::query(SQL)
            .bind(data.action_type)
            .bind(data.created_at)
            .execute(&mut **transaction)
            .await
            .map(drop)
    }

    /// Most recent run of a scheduled job, used to resume its cadence.
    pub async fn get_last_by_type(
        &self,
        action_type: String,
    ) -> Result<Option<Action_History>, Error> {
        const SQL: &str = r#"
        SELECT "action_type", "created_at"
        FROM "action_history"
        WHERE "action_type" = $1
        ORDER BY "created_at" DESC
        LIMIT 1
        "#;

        sqlx::query_as(SQL)
            .bind(action_type)
            .fetch_optional(&self.pool)
            .await
    }
}
