use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::dispatch::job::RideMatchJob;
use crate::error::AppResult;
use crate::queue::{ClaimedJob, JobQueue};

/// 未确认任务的默认租约，与 `JOB_LEASE` 默认值一致
pub const DEFAULT_LEASE: Duration = Duration::from_secs(120);

#[derive(Default)]
struct QueueState {
    /// 待执行任务：到期时间与负载
    delayed: HashMap<String, (Instant, RideMatchJob)>,
    /// 已领取未确认的任务：租约截止时间与负载
    processing: HashMap<String, (Instant, RideMatchJob)>,
}

impl QueueState {
    /// 租约过期的任务放回待执行集合，已有同键新任务时丢弃
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .processing
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            let Some((_, job)) = self.processing.remove(&key) else {
                continue;
            };
            if self.delayed.contains_key(&key) {
                tracing::debug!(job_key = %key, "dropping expired lease, newer job pending");
                continue;
            }
            tracing::warn!(job_key = %key, "lease expired without ack, redelivering");
            self.delayed.insert(key, (now, job));
        }
    }
}

/// 进程内任务队列，使用 tokio 时钟
///
/// 与 Redis 实现相同：同键任务相互取代，领取后带租约，
/// 租约内未确认的任务会重新投递。
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    lease: Duration,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            lease,
        }
    }

    /// 待执行任务数
    pub async fn len(&self) -> usize {
        self.state.lock().await.delayed.len()
    }

    /// 已领取未确认的任务数
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.processing.len()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn schedule(&self, job: &RideMatchJob, delay: Duration) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let key = job.job_key();
        let previous = state
            .delayed
            .insert(key.clone(), (Instant::now() + delay, job.clone()));
        if previous.is_some() {
            tracing::debug!(job_key = %key, "superseded pending job");
        }
        Ok(previous.is_some())
    }

    async fn cancel(&self, key: &str) -> AppResult<bool> {
        Ok(self.state.lock().await.delayed.remove(key).is_some())
    }

    async fn pop_due(&self) -> AppResult<Option<ClaimedJob>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.requeue_expired(now);

        let due = state
            .delayed
            .iter()
            .filter(|(_, (at, _))| *at <= now)
            .min_by_key(|(_, (at, _))| *at)
            .map(|(key, _)| key.clone());
        let Some(key) = due else {
            return Ok(None);
        };
        let Some((_, job)) = state.delayed.remove(&key) else {
            return Ok(None);
        };

        state
            .processing
            .insert(key.clone(), (now + self.lease, job.clone()));
        Ok(Some(ClaimedJob { key, job }))
    }

    async fn ack(&self, key: &str) -> AppResult<()> {
        self.state.lock().await.processing.remove(key);
        Ok(())
    }

    async fn is_pending(&self, key: &str) -> AppResult<bool> {
        Ok(self.state.lock().await.delayed.contains_key(key))
    }
}
