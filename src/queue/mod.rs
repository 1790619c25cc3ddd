// 任务队列模块
// 按行程稳定键去重的延时任务：新任务总是取代同键的待执行任务

use std::time::Duration;

use async_trait::async_trait;

use crate::dispatch::job::RideMatchJob;
use crate::error::AppResult;

pub mod memory;
pub mod redis_queue;

pub use memory::MemoryJobQueue;
pub use redis_queue::{RIDE_MATCH_QUEUE, RedisJobQueue};

/// 已领取的任务
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub key: String,
    pub job: RideMatchJob,
}

/// 匹配任务队列
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// 立即执行的任务
    async fn enqueue(&self, job: &RideMatchJob) -> AppResult<()> {
        self.schedule(job, Duration::ZERO).await.map(|_| ())
    }

    /// 延时任务，原子地取代同键的待执行任务；返回是否取代了旧任务
    async fn schedule(&self, job: &RideMatchJob, delay: Duration) -> AppResult<bool>;

    /// 取消待执行任务，返回是否存在
    async fn cancel(&self, key: &str) -> AppResult<bool>;

    /// 领取一个到期任务
    async fn pop_due(&self) -> AppResult<Option<ClaimedJob>>;

    /// 确认任务已处理（无论成功失败），释放租约
    async fn ack(&self, key: &str) -> AppResult<()>;

    async fn is_pending(&self, key: &str) -> AppResult<bool>;
}
