use serde::{Deserialize, Serialize};

/// 派单时用到的司机业务字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DriverEligibility {
    pub id: String,
    pub is_online: bool,
    pub is_suspended: bool,
    pub availability_status: Option<String>,
    pub decline_count: i32,
    pub missed_requests: i32,
    pub push_token: Option<String>,
}

impl DriverEligibility {
    /// 拒单或漏单次数超过阈值
    pub fn exceeds_failures(&self, threshold: i32) -> bool {
        self.decline_count > threshold || self.missed_requests > threshold
    }

    pub fn is_busy(&self) -> bool {
        self.availability_status.as_deref() == Some("busy")
    }

    pub fn is_dispatchable(&self) -> bool {
        self.is_online && !self.is_suspended
    }
}

/// 巡检任务查出的待停用司机
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OverdueDriver {
    pub id: String,
    pub push_token: Option<String>,
    pub vehicle_type: Option<String>,
}
