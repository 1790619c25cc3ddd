/// 生成匹配任务的稳定键，同一行程始终相同，用于取代旧任务
pub fn ride_match_job_key(ride_id: &str) -> String {
    format!("ride_match_{}", ride_id)
}

/// 某个队列在 Redis 中使用的全部键
#[derive(Debug, Clone)]
pub struct QueueKeys {
    /// 延时任务有序集合，分数为到期毫秒时间戳
    pub delayed: String,
    /// 延时任务负载
    pub payloads: String,
    /// 已领取任务有序集合，分数为租约到期毫秒时间戳
    pub processing: String,
    /// 已领取任务负载
    pub processing_payloads: String,
}

impl QueueKeys {
    pub fn new(queue: &str) -> Self {
        Self {
            delayed: format!("queue:{}:delayed", queue),
            payloads: format!("queue:{}:payloads", queue),
            processing: format!("queue:{}:processing", queue),
            processing_payloads: format!("queue:{}:processing-payloads", queue),
        }
    }
}
