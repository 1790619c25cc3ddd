#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use mockall::mock;

use ride_dispatch::cache::models::{AvailabilityStatus, GeoPoint, LocationFix};
use ride_dispatch::cache::operations::BusMessage;
use ride_dispatch::cache::{MemoryPresenceStore, PresenceStore, VehicleClass};
use ride_dispatch::database::{
    BusinessStore, DriverEligibility, MatchAttempt, OverdueDriver,
};
use ride_dispatch::dispatch::{DispatchContext, Pickup, RideMatchJob};
use ride_dispatch::error::{AppError, AppResult};
use ride_dispatch::queue::MemoryJobQueue;
use ride_dispatch::services::{PushGateway, PushNotification};

pub const TTL: Duration = Duration::from_secs(120);

mock! {
    pub Push {}
    #[async_trait]
    impl PushGateway for Push {
        async fn send(&self, token: &str, notification: &PushNotification) -> AppResult<()>;
    }
}

/// 记录每次推送的 (token, title)
pub type PushLog = Arc<Mutex<Vec<(String, String)>>>;

pub fn recording_push() -> (MockPush, PushLog) {
    let log: PushLog = Arc::default();
    let mut push = MockPush::new();
    let sink = log.clone();
    push.expect_send().returning(move |token, notification| {
        sink.lock()
            .expect("push log")
            .push((token.to_string(), notification.title.clone()));
        Ok(())
    });
    (push, log)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeRide {
    pub rider_id: Option<String>,
    pub status: String,
    pub status_reason: Option<String>,
    pub driver_id: Option<String>,
    pub match_attempt: Option<MatchAttempt>,
}

#[derive(Default)]
struct FakeState {
    drivers: HashMap<String, DriverEligibility>,
    rides: HashMap<String, FakeRide>,
    rider_tokens: HashMap<String, String>,
}

/// 内存中的业务存储，语义与 Postgres 实现一致
#[derive(Default)]
pub struct FakeBusinessStore {
    state: Mutex<FakeState>,
    fail_match_attempts: AtomicBool,
}

impl FakeBusinessStore {
    pub fn add_driver(&self, driver: DriverEligibility) {
        self.state
            .lock()
            .expect("state")
            .drivers
            .insert(driver.id.clone(), driver);
    }

    pub fn update_driver(&self, id: &str, f: impl FnOnce(&mut DriverEligibility)) {
        if let Some(driver) = self.state.lock().expect("state").drivers.get_mut(id) {
            f(driver);
        }
    }

    pub fn driver(&self, id: &str) -> DriverEligibility {
        self.state.lock().expect("state").drivers[id].clone()
    }

    pub fn add_ride(&self, ride_id: &str, rider_id: &str, rider_token: Option<&str>) {
        let mut state = self.state.lock().expect("state");
        state.rides.insert(
            ride_id.to_string(),
            FakeRide {
                rider_id: Some(rider_id.to_string()),
                status: "searching".into(),
                ..Default::default()
            },
        );
        if let Some(token) = rider_token {
            state
                .rider_tokens
                .insert(rider_id.to_string(), token.to_string());
        }
    }

    /// 模拟数据库不可用：之后的派单尝试写入失败
    pub fn fail_match_attempts(&self, fail: bool) {
        self.fail_match_attempts.store(fail, Ordering::SeqCst);
    }

    pub fn ride(&self, ride_id: &str) -> FakeRide {
        self.state.lock().expect("state").rides[ride_id].clone()
    }
}

#[async_trait]
impl BusinessStore for FakeBusinessStore {
    async fn increment_missed_requests(&self, driver_id: &str) -> AppResult<()> {
        self.update_driver(driver_id, |d| d.missed_requests += 1);
        Ok(())
    }

    async fn driver_eligibility(&self, driver_ids: &[String]) -> AppResult<Vec<DriverEligibility>> {
        let state = self.state.lock().expect("state");
        Ok(driver_ids
            .iter()
            .filter_map(|id| state.drivers.get(id).cloned())
            .collect())
    }

    async fn suspend_drivers(&self, driver_ids: &[String]) -> AppResult<u64> {
        let mut state = self.state.lock().expect("state");
        let mut changed = 0;
        for id in driver_ids {
            if let Some(d) = state.drivers.get_mut(id) {
                if !d.is_suspended || d.is_online {
                    d.is_suspended = true;
                    d.is_online = false;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn overdue_drivers(&self, threshold: i32) -> AppResult<Vec<OverdueDriver>> {
        let state = self.state.lock().expect("state");
        let mut overdue: Vec<OverdueDriver> = state
            .drivers
            .values()
            .filter(|d| d.is_online && d.exceeds_failures(threshold))
            .map(|d| OverdueDriver {
                id: d.id.clone(),
                push_token: d.push_token.clone(),
                vehicle_type: None,
            })
            .collect();
        overdue.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(overdue)
    }

    async fn record_match_attempt(
        &self,
        ride_id: &str,
        driver_id: &str,
        attempt: &MatchAttempt,
    ) -> AppResult<()> {
        if self.fail_match_attempts.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut state = self.state.lock().expect("state");
        let ride = state.rides.entry(ride_id.to_string()).or_default();
        ride.status = "requesting_driver".into();
        ride.driver_id = Some(driver_id.to_string());
        ride.match_attempt = Some(attempt.clone());
        Ok(())
    }

    async fn cancel_ride(&self, ride_id: &str, reason: &str) -> AppResult<Option<String>> {
        let mut state = self.state.lock().expect("state");
        Ok(state.rides.get_mut(ride_id).and_then(|ride| {
            ride.status = "cancelled".into();
            ride.status_reason = Some(reason.to_string());
            ride.driver_id = None;
            ride.rider_id.clone()
        }))
    }

    async fn rider_push_token(&self, rider_id: &str) -> AppResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .expect("state")
            .rider_tokens
            .get(rider_id)
            .cloned())
    }
}

pub fn eligible_driver(id: &str) -> DriverEligibility {
    DriverEligibility {
        id: id.to_string(),
        is_online: true,
        is_suspended: false,
        availability_status: Some("available".into()),
        decline_count: 0,
        missed_requests: 0,
        push_token: Some(format!("ExponentPushToken[{id}]")),
    }
}

pub fn ride_job(ride_id: &str, pickup: GeoPoint) -> RideMatchJob {
    RideMatchJob {
        ride_id: ride_id.to_string(),
        vehicle_class: VehicleClass::Car,
        distance_m: 5200.0,
        duration_s: 840.0,
        fare: 32000.0,
        platform_fee: 2000.0,
        driver_earning: 26000.0,
        app_commission: 4000.0,
        fare_breakdown: serde_json::json!({ "base": 10000 }),
        pickup: Pickup {
            coords: [pickup.longitude, pickup.latitude],
            address: "Jl. Merdeka 10".into(),
        },
        dropoff: serde_json::json!({ "coords": [1.05, 1.05], "address": "Jl. Asia Afrika 5" }),
        attempted_drivers: Vec::new(),
        retry_count: 0,
    }
}

/// 派单测试环境：内存在线状态、内存队列、假业务存储、记录型推送
pub struct Harness {
    pub presence: Arc<MemoryPresenceStore>,
    pub store: Arc<FakeBusinessStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub pushes: PushLog,
    pub ctx: DispatchContext,
}

impl Harness {
    pub fn new() -> Self {
        let presence = Arc::new(MemoryPresenceStore::new(TTL));
        let store = Arc::new(FakeBusinessStore::default());
        let queue = Arc::new(MemoryJobQueue::new());
        let (push, pushes) = recording_push();
        let ctx = DispatchContext::new(
            presence.clone(),
            presence.clone(),
            store.clone(),
            Arc::new(push),
            queue.clone(),
        );
        Self {
            presence,
            store,
            queue,
            pushes,
            ctx,
        }
    }

    /// 司机上线：在线状态 + 地理索引 + 业务记录
    pub async fn place_driver(&self, id: &str, at: GeoPoint) {
        let fix = LocationFix::new(VehicleClass::Car, at, AvailabilityStatus::Available);
        self.presence
            .set_location(id, &fix)
            .await
            .expect("set location");
        self.store.add_driver(eligible_driver(id));
    }

    pub fn pushed_titles(&self) -> Vec<(String, String)> {
        self.pushes.lock().expect("push log").clone()
    }
}

/// 读取已发布的消息，直到短暂空闲
pub async fn drain(stream: &mut BoxStream<'static, BusMessage>) -> Vec<BusMessage> {
    let mut messages = Vec::new();
    while let Ok(Some(message)) =
        tokio::time::timeout(Duration::from_millis(20), stream.next()).await
    {
        messages.push(message);
    }
    messages
}
