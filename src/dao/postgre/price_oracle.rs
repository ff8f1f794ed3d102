use sqlx::{Error, Transaction};

use crate::model::{Price_Oracle, Table};

use super::{DataBase, QueryResult};

pub const PRICE_ORACLE_ID: i32 = 1;

impl Table<Price_Oracle> {
    pub async fn get(&self) -> Result<Option<Price_Oracle>, Error> {
        const SQL: &str = r#"
        SELECT *
        FROM "utility"
        WHERE "id" = $1
        "#;

        sqlx::query_as(SQL)
            .bind(PRICE_ORACLE_ID)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_in(
        &self,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<Option<Price_Oracle>, Error> {
        const SQL: &str = r#"
        SELECT *
        FROM "utility"
        WHERE "id" = $1
        "#;

        sqlx::query_as(SQL)
            .bind(PRICE_ORACLE_ID)
            .fetch_optional(&mut **transaction)
            .await
    }

    /// Global serialization point for trades.
    pub async fn get_for_update(
        &self,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<Option<Price_Oracle>, Error> {
        const SQL: &str = r#"
        SELECT *
        FROM "utility"
        WHERE "id" = $1
        FOR UPDATE
        "#;

        sqlx::query_as(SQL)
            .bind(PRICE_ORACLE_ID)
            .fetch_optional(&mut **transaction)
            .await
    }

    pub async fn insert_if_not_exists(
        &self,
        data: &Price_Oracle,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        INSERT INTO "utility" (
            "id",
            "pdes_buy_price",
            "pdes_sell_price",
            "pdes_circulating_supply",
            "pdes_supply_left",
            "pdes_total_supply",
            "pdes_market_cap",
            "conversion_rate",
            "reward_percentage",
            "referral_percentage",
            "version"
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0)
        ON CONFLICT ("id") DO NOTHING
        "#;

        sqlx::query(SQL)
            .bind(PRICE_ORACLE_ID)
            .bind(&data.pdes_buy_price)
            .bind(&data.pdes_sell_price)
            .bind(&data.pdes_circulating_supply)
            .bind(&data.pdes_supply_left)
            .bind(&data.pdes_total_supply)
            .bind(&data.pdes_market_cap)
            .bind(&data.conversion_rate)
            .bind(&data.reward_percentage)
            .bind(&data.referral_percentage)
            .execute(&mut **transaction)
            .await
    }

    /// Compare-and-swap on `version`: writes only if the row still carries
    /// the version `data` was read at. Zero rows affected means a lost race.
    pub async fn update_versioned(
        &self,
        data: &Price_Oracle,
        transaction: &mut Transaction<'_, DataBase>,
    ) -> Result<QueryResult, Error> {
        const SQL: &str = r#"
        UPDATE "utility"
        SET
            "pdes_buy_price" = $3,
            "pdes_sell_price" = $4,
            "pdes_circulating_supply" = $5,
            "pdes_supply_left" = $6,
            "pdes_total_supply" = $7,
            "pdes_market_cap" = $8,
            "conversion_rate" = $9,
            "reward_percentage" = $10,
            "referral_percentage" = $11,
            "version" = "version" + 1,
            "updated_at" = NOW()
        WHERE
            "id" = $1 AND
            "version" = $2
        "#;

        sqlx::query(SQL)
            .bind(PRICE_ORACLE_ID)
            .bind(data.version)
            .bind(&data.pdes_buy_price)
            .bind(&data.pdes_sell_price)
            .bind(&data.pdes_circulating_supply)
            .bind(&data.pdes_supply_left)
            .bind(&data.pdes_total_supply)
            .bind(&data.pdes_market_cap)
            .bind(&data.conversion_rate)
            .bind(&data.reward_percentage)
            .bind(&data.referral_percentage)
            .execute(&mut **transaction)
            .await
    }
}
