use std::time::Duration;

use crate::dispatch::matcher::{MatchOutcome, RideMatcher};
use crate::dispatch::DispatchContext;
use crate::error::AppResult;

/// 消费一次队列的结果
#[derive(Debug, Clone, PartialEq)]
pub enum JobRun {
    /// 没有到期任务
    Idle,
    Finished {
        ride_id: String,
        outcome: MatchOutcome,
    },
    /// 派单尝试失败，任务已确认，不做队列级重试
    Failed { ride_id: String, error: String },
}

/// 匹配任务消费者
pub struct MatchWorker {
    ctx: DispatchContext,
    matcher: RideMatcher,
    poll_interval: Duration,
}

impl MatchWorker {
    pub fn new(ctx: DispatchContext, poll_interval: Duration) -> Self {
        let matcher = RideMatcher::new(ctx.clone());
        Self {
            ctx,
            matcher,
            poll_interval,
        }
    }

    pub async fn process_next(&self) -> AppResult<JobRun> {
        let Some(claimed) = self.ctx.queue.pop_due().await? else {
            return Ok(JobRun::Idle);
        };
        let ride_id = claimed.job.ride_id.clone();

        let result = self.matcher.run_attempt(&claimed.job).await;
        self.ctx.queue.ack(&claimed.key).await?;

        match result {
            Ok(outcome) => Ok(JobRun::Finished { ride_id, outcome }),
            Err(e) => {
                tracing::error!(ride_id = %ride_id, job_key = %claimed.key, "Ride match attempt failed: {}", e);
                Ok(JobRun::Failed {
                    ride_id,
                    error: e.to_string(),
                })
            }
        }
    }

    pub async fn run(self) {
        tracing::info!("Ride match worker started");
        loop {
            match self.process_next().await {
                Ok(JobRun::Idle) => tokio::time::sleep(self.poll_interval).await,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Failed to consume ride match queue: {}", e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}
