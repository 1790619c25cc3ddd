// 派单模块
// 候选司机筛选、派单状态机、重试调度、停用巡检

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{EntityKey, MessageBus, PresenceStore};
use crate::database::BusinessStore;
use crate::queue::JobQueue;
use crate::services::PushGateway;

pub mod job;
pub mod matcher;
pub mod messages;
pub mod selector;
pub mod suspension;
pub mod sweeper;
pub mod worker;

pub use job::{Pickup, RideMatchJob};
pub use matcher::{CancelReason, MatchOutcome, RideMatcher};
pub use messages::{DispatchMessage, RideOffer};
pub use selector::CandidateSelector;
pub use sweeper::{InactivitySweeper, SweepReport};
pub use worker::{JobRun, MatchWorker};

/// 单次派单尝试次数上限
pub const MAX_RETRIES: u32 = 10;
/// 候选司机搜索半径（公里）
pub const MAX_RADIUS_KM: f64 = 10.0;
/// 司机响应窗口
pub const OFFER_WINDOW: Duration = Duration::from_secs(60);
/// 审核锁比响应窗口多出的余量
pub const REVIEWING_MARGIN: Duration = Duration::from_secs(5);
/// 拒单/漏单次数阈值，超过即停用
pub const MAX_ALLOWED_REQUEST_FAILURES: i32 = 3;
/// 停用巡检周期
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// 派单各组件共享的外部依赖句柄，启动时构造一次
#[derive(Clone)]
pub struct DispatchContext {
    pub presence: Arc<dyn PresenceStore>,
    pub bus: Arc<dyn MessageBus>,
    pub store: Arc<dyn BusinessStore>,
    pub push: Arc<dyn PushGateway>,
    pub queue: Arc<dyn JobQueue>,
}

impl DispatchContext {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn BusinessStore>,
        push: Arc<dyn PushGateway>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            presence,
            bus,
            store,
            push,
            queue,
        }
    }

    /// 发布到实体频道，失败只记录日志
    pub async fn publish_quietly(&self, target: &EntityKey, message: &DispatchMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(channel = %target, "Failed to encode dispatch message: {}", e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(&target.to_string(), &payload).await {
            tracing::warn!(channel = %target, "Failed to publish dispatch message: {}", e);
        }
    }
}
