use serde::{Deserialize, Serialize};

/// 行程状态（派单子系统只写入这两种）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideStatus {
    RequestingDriver,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::RequestingDriver => "requesting_driver",
            RideStatus::Cancelled => "cancelled",
        }
    }
}

/// 保存在行程 `match_attempt` 列中的一次派单尝试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchAttempt {
    pub message_data: serde_json::Value,
    #[serde(rename = "attemptedDrivers")]
    pub attempted_drivers: Vec<String>,
    pub retry_count: u32,
    pub attempted_at: i64,
}
