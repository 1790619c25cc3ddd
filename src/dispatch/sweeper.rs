use futures_util::future::join_all;
use tokio::time::MissedTickBehavior;

use crate::dispatch::suspension::notify_suspended;
use crate::dispatch::{DispatchContext, MAX_ALLOWED_REQUEST_FAILURES, SWEEP_INTERVAL};
use crate::error::AppResult;

/// 一轮巡检的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 查出的超限在线司机数
    pub found: usize,
    /// 实际被停用的行数（已停用的不计）
    pub suspended: u64,
}

/// 周期性停用拒单/漏单过多的在线司机
///
/// 与派单路径并发执行时依赖持久层停用的幂等性，不做互斥。
pub struct InactivitySweeper {
    ctx: DispatchContext,
}

impl InactivitySweeper {
    pub fn new(ctx: DispatchContext) -> Self {
        Self { ctx }
    }

    pub async fn sweep_once(&self) -> AppResult<SweepReport> {
        let drivers = self
            .ctx
            .store
            .overdue_drivers(MAX_ALLOWED_REQUEST_FAILURES)
            .await?;
        if drivers.is_empty() {
            return Ok(SweepReport::default());
        }

        let ids: Vec<String> = drivers.iter().map(|d| d.id.clone()).collect();
        let suspended = self.ctx.store.suspend_drivers(&ids).await?;
        self.ctx.presence.purge_drivers(&ids).await?;

        join_all(drivers.iter().map(|driver| {
            tracing::info!(driver_id = %driver.id, "Suspended and cleaned up driver");
            notify_suspended(&self.ctx, &driver.id, driver.push_token.as_deref())
        }))
        .await;

        Ok(SweepReport {
            found: drivers.len(),
            suspended,
        })
    }

    /// 按固定周期执行，单轮失败只记录日志
    pub async fn run(self) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.sweep_once().await {
                Ok(report) if report.found > 0 => {
                    tracing::info!(
                        found = report.found,
                        suspended = report.suspended,
                        "Inactive driver sweep finished"
                    );
                }
                Ok(_) => tracing::debug!("No inactive drivers to suspend"),
                Err(e) => tracing::error!("Inactive driver sweep failed: {}", e),
            }
        }
    }
}
