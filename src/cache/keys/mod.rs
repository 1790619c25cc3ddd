/// 缓存键模块
/// 提供在线状态、地理索引、审核锁以及任务队列的键生成函数

// 在线状态相关键
pub mod presence_keys;

// 任务队列相关键
pub mod queue_keys;

pub use presence_keys::{
    DRIVER_CHANNEL_PATTERN, RIDER_CHANNEL_PATTERN, driver_geo_key, entity_key, reviewing_key,
};
pub use queue_keys::{ride_match_job_key, QueueKeys};
