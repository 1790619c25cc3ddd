use std::collections::HashMap;

use crate::cache::EntityKey;
use crate::database::{DriverEligibility, MatchAttempt};
use crate::dispatch::job::RideMatchJob;
use crate::dispatch::messages::{DispatchMessage, RideOffer};
use crate::dispatch::selector::CandidateSelector;
use crate::dispatch::suspension::suspend_driver;
use crate::dispatch::{
    DispatchContext, MAX_ALLOWED_REQUEST_FAILURES, MAX_RADIUS_KM, MAX_RETRIES, OFFER_WINDOW,
    REVIEWING_MARGIN,
};
use crate::error::AppResult;
use crate::services::{PushNotification, notify_quietly};
use crate::utils::now_millis;

const OFFER_TITLE: &str = "Ada penumpang baru!";
const CANCELLED_TITLE: &str = "Maaf, tidak ada driver tersedia 😞";
const CANCELLED_BODY: &str = "Kami tidak menemukan driver untuk perjalanan Anda.";

/// 行程被取消的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    RetriesExhausted,
    NoDriversNearby,
}

impl CancelReason {
    pub fn message(&self) -> String {
        match self {
            CancelReason::RetriesExhausted => {
                format!("Ride cancelled: no drivers accepted after {MAX_RETRIES} attempts.")
            }
            CancelReason::NoDriversNearby => "Ride cancelled: no available drivers nearby.".into(),
        }
    }
}

/// 一次派单尝试的结果
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Offered {
        driver_id: String,
        distance_km: f64,
        /// 是否取代了同一行程的待执行重试任务
        superseded: bool,
    },
    Cancelled {
        reason: CancelReason,
    },
}

/// 派单状态机：每次任务执行即一次尝试
///
/// Searching -> Offered(driver) -> 响应窗口过期后回到 Searching，
/// 重试耗尽或无候选司机时进入 Cancelled。
#[derive(Clone)]
pub struct RideMatcher {
    ctx: DispatchContext,
    selector: CandidateSelector,
}

impl RideMatcher {
    pub fn new(ctx: DispatchContext) -> Self {
        let selector = CandidateSelector::new(ctx.presence.clone());
        Self { ctx, selector }
    }

    pub async fn run_attempt(&self, job: &RideMatchJob) -> AppResult<MatchOutcome> {
        let ride_id = job.ride_id.as_str();

        // 上一轮的司机没有响应，记一次漏单
        if let Some(previous) = job.previous_driver() {
            if let Err(e) = self.ctx.store.increment_missed_requests(previous).await {
                tracing::warn!(ride_id, driver_id = previous, "Failed to record missed request: {}", e);
            }
        }

        if job.retry_count >= MAX_RETRIES {
            return self.cancel(job, CancelReason::RetriesExhausted).await;
        }

        let candidates = self
            .selector
            .find_candidates(
                job.vehicle_class,
                job.pickup.point(),
                &job.attempted_drivers,
                MAX_RADIUS_KM,
            )
            .await?;
        if candidates.is_empty() {
            return self.cancel(job, CancelReason::NoDriversNearby).await;
        }

        let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let eligibility: HashMap<String, DriverEligibility> = self
            .ctx
            .store
            .driver_eligibility(&ids)
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        for candidate in &candidates {
            let driver_id = candidate.id.as_str();
            let Some(driver) = eligibility.get(driver_id) else {
                tracing::debug!(ride_id, driver_id, "Skipping candidate without business record");
                continue;
            };

            if !driver.is_dispatchable() {
                tracing::debug!(ride_id, driver_id, "Skipping offline or suspended driver");
                if let Err(e) = self.ctx.presence.purge_drivers(&[driver.id.clone()]).await {
                    tracing::warn!(driver_id, "Failed to purge stale presence: {}", e);
                }
                continue;
            }

            if driver.exceeds_failures(MAX_ALLOWED_REQUEST_FAILURES) {
                if let Err(e) = suspend_driver(&self.ctx, driver_id, driver.push_token.as_deref()).await {
                    tracing::error!(ride_id, driver_id, "Failed to suspend driver: {}", e);
                }
                continue;
            }

            if driver.is_busy() {
                tracing::debug!(ride_id, driver_id, "Skipping busy driver");
                continue;
            }

            // 检查并设置审核锁是一步原子操作
            let acquired = self
                .ctx
                .presence
                .try_acquire_reviewing(driver_id, OFFER_WINDOW + REVIEWING_MARGIN)
                .await?;
            if !acquired {
                tracing::debug!(ride_id, driver_id, "Skipping driver reviewing another offer");
                continue;
            }

            return self.offer(job, driver, candidate.distance_km).await;
        }

        self.cancel(job, CancelReason::NoDriversNearby).await
    }

    async fn offer(
        &self,
        job: &RideMatchJob,
        driver: &DriverEligibility,
        distance_km: f64,
    ) -> AppResult<MatchOutcome> {
        let ride_id = job.ride_id.as_str();
        let driver_id = driver.id.as_str();
        let attempted_at = now_millis();
        let expires_at = attempted_at + OFFER_WINDOW.as_millis() as i64;

        let message =
            DispatchMessage::NewRideRequest(RideOffer::from_job(job, distance_km, expires_at));
        let message_data = serde_json::to_value(&message)?;
        let next = job.next_attempt(driver_id);

        let attempt = MatchAttempt {
            message_data: message_data.clone(),
            attempted_drivers: next.attempted_drivers.clone(),
            retry_count: job.retry_count,
            attempted_at,
        };
        // 持久化失败时司机没有收到派单，释放审核锁
        let persisted = match self
            .ctx
            .store
            .record_match_attempt(ride_id, driver_id, &attempt)
            .await
        {
            Ok(()) => self.ctx.queue.schedule(&next, OFFER_WINDOW).await,
            Err(e) => Err(e),
        };
        let superseded = match persisted {
            Ok(superseded) => superseded,
            Err(e) => {
                if let Err(release) = self.ctx.presence.release_reviewing(driver_id).await {
                    tracing::warn!(ride_id, driver_id, "Failed to release reviewing lock: {}", release);
                }
                return Err(e);
            }
        };

        let notification = PushNotification::new(
            OFFER_TITLE,
            format!("Jemput di {} ({:.2} km)", job.pickup.address, distance_km),
            message_data,
        );
        notify_quietly(self.ctx.push.as_ref(), driver.push_token.as_deref(), &notification).await;
        self.ctx
            .publish_quietly(&EntityKey::driver(driver_id), &message)
            .await;

        tracing::info!(
            ride_id,
            driver_id,
            distance_km,
            retry_count = job.retry_count,
            "Offered ride to driver"
        );

        Ok(MatchOutcome::Offered {
            driver_id: driver_id.to_string(),
            distance_km,
            superseded,
        })
    }

    async fn cancel(&self, job: &RideMatchJob, reason: CancelReason) -> AppResult<MatchOutcome> {
        let ride_id = job.ride_id.as_str();
        let text = reason.message();

        let rider_id = self.ctx.store.cancel_ride(ride_id, &text).await?;
        // 至少一次投递下可能仍有同键任务待执行
        self.ctx.queue.cancel(&job.job_key()).await?;

        if let Some(rider_id) = rider_id {
            let message = DispatchMessage::RideCancelled {
                ride_id: ride_id.to_string(),
                reason: text.clone(),
            };

            let token = match self.ctx.store.rider_push_token(&rider_id).await {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(ride_id, rider_id = %rider_id, "Failed to read rider push token: {}", e);
                    None
                }
            };
            let notification =
                PushNotification::new(CANCELLED_TITLE, CANCELLED_BODY, serde_json::to_value(&message)?);
            notify_quietly(self.ctx.push.as_ref(), token.as_deref(), &notification).await;

            self.ctx
                .publish_quietly(&EntityKey::rider(rider_id.as_str()), &message)
                .await;
        }

        tracing::info!(ride_id, reason = %text, "Ride cancelled");
        Ok(MatchOutcome::Cancelled { reason })
    }
}
