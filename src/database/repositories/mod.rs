use async_trait::async_trait;

use crate::database::models::{DriverEligibility, MatchAttempt, OverdueDriver};
use crate::error::AppResult;

pub mod postgres;

pub use postgres::PgBusinessStore;

/// 持久化业务存储（外部协作方）
#[async_trait]
pub trait BusinessStore: Send + Sync {
    /// 司机漏单计数加一
    async fn increment_missed_requests(&self, driver_id: &str) -> AppResult<()>;

    /// 批量读取候选司机的资格字段
    async fn driver_eligibility(&self, driver_ids: &[String]) -> AppResult<Vec<DriverEligibility>>;

    /// 停用司机并下线。已停用且离线的行不受影响，返回实际变更的行数
    async fn suspend_drivers(&self, driver_ids: &[String]) -> AppResult<u64>;

    /// 在线且拒单/漏单超过阈值的司机
    async fn overdue_drivers(&self, threshold: i32) -> AppResult<Vec<OverdueDriver>>;

    /// 记录派单尝试，行程进入 requesting_driver
    async fn record_match_attempt(
        &self,
        ride_id: &str,
        driver_id: &str,
        attempt: &MatchAttempt,
    ) -> AppResult<()>;

    /// 取消行程，返回乘客 ID
    async fn cancel_ride(&self, ride_id: &str, reason: &str) -> AppResult<Option<String>>;

    async fn rider_push_token(&self, rider_id: &str) -> AppResult<Option<String>>;
}
