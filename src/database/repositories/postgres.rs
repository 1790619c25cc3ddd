use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;

use crate::database::models::{DriverEligibility, MatchAttempt, OverdueDriver, RideStatus};
use crate::database::repositories::BusinessStore;
use crate::error::AppResult;

/// 基于 Postgres 的业务存储
#[derive(Clone)]
pub struct PgBusinessStore {
    pool: PgPool,
}

impl PgBusinessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BusinessStore for PgBusinessStore {
    async fn increment_missed_requests(&self, driver_id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE drivers
            SET missed_requests = missed_requests + 1
            WHERE id = $1
            "#,
        )
        .bind(driver_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn driver_eligibility(&self, driver_ids: &[String]) -> AppResult<Vec<DriverEligibility>> {
        if driver_ids.is_empty() {
            return Ok(Vec::new());
        }

        let drivers = sqlx::query_as::<_, DriverEligibility>(
            r#"
            SELECT
                id,
                is_online,
                is_suspended,
                availability_status,
                decline_count,
                missed_requests,
                push_token
            FROM drivers
            WHERE id = ANY($1)
            "#,
        )
        .bind(driver_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(drivers)
    }

    async fn suspend_drivers(&self, driver_ids: &[String]) -> AppResult<u64> {
        if driver_ids.is_empty() {
            return Ok(0);
        }

        // 重复停用是空操作，巡检和派单两条路径可以并发执行
        let result = sqlx::query(
            r#"
            UPDATE drivers
            SET is_online = false, is_suspended = true
            WHERE id = ANY($1)
              AND (is_suspended = false OR is_online = true)
            "#,
        )
        .bind(driver_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn overdue_drivers(&self, threshold: i32) -> AppResult<Vec<OverdueDriver>> {
        let drivers = sqlx::query_as::<_, OverdueDriver>(
            r#"
            SELECT id, push_token, vehicle_type
            FROM drivers
            WHERE is_online = true
              AND (decline_count > $1 OR missed_requests > $1)
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;

        Ok(drivers)
    }

    async fn record_match_attempt(
        &self,
        ride_id: &str,
        driver_id: &str,
        attempt: &MatchAttempt,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE rides
            SET status = $2, driver_id = $3, match_attempt = $4
            WHERE id = $1
            "#,
        )
        .bind(ride_id)
        .bind(RideStatus::RequestingDriver.as_str())
        .bind(driver_id)
        .bind(Json(attempt))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cancel_ride(&self, ride_id: &str, reason: &str) -> AppResult<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            UPDATE rides
            SET status = $2, status_reason = $3, driver_id = NULL
            WHERE id = $1
            RETURNING rider_id
            "#,
        )
        .bind(ride_id)
        .bind(RideStatus::Cancelled.as_str())
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(rider_id,)| rider_id))
    }

    async fn rider_push_token(&self, rider_id: &str) -> AppResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT push_token FROM riders WHERE id = $1")
                .bind(rider_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(token,)| token))
    }
}
