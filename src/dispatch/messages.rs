use serde::{Deserialize, Serialize};

use crate::dispatch::job::{Pickup, RideMatchJob};

/// 派单给司机的订单详情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideOffer {
    pub ride_id: String,
    pub distance_to_pickup_km: f64,
    pub distance_m: f64,
    pub duration_s: f64,
    pub fare: f64,
    pub platform_fee: f64,
    pub driver_earning: f64,
    pub app_commission: f64,
    pub fare_breakdown: serde_json::Value,
    pub pickup: Pickup,
    pub dropoff: serde_json::Value,
    /// 毫秒时间戳
    pub request_expired_at: i64,
}

impl RideOffer {
    pub fn from_job(job: &RideMatchJob, distance_to_pickup_km: f64, request_expired_at: i64) -> Self {
        Self {
            ride_id: job.ride_id.clone(),
            distance_to_pickup_km,
            distance_m: job.distance_m,
            duration_s: job.duration_s,
            fare: job.fare,
            platform_fee: job.platform_fee,
            driver_earning: job.driver_earning,
            app_commission: job.app_commission,
            fare_breakdown: job.fare_breakdown.clone(),
            pickup: job.pickup.clone(),
            dropoff: job.dropoff.clone(),
            request_expired_at,
        }
    }
}

/// 经由发布订阅中继给连接的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchMessage {
    NewRideRequest(RideOffer),
    RideCancelled { ride_id: String, reason: String },
    AccountDeactivatedTemporarily { reason: String },
}
