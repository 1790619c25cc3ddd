use serde::{Deserialize, Serialize};

use crate::cache::keys::ride_match_job_key;
use crate::cache::models::{GeoPoint, VehicleClass};

/// 上车点，坐标顺序为 [经度, 纬度]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pickup {
    pub coords: [f64; 2],
    pub address: String,
}

impl Pickup {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.coords[1], self.coords[0])
    }
}

/// 一次匹配任务的负载，每次执行即一次派单尝试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideMatchJob {
    pub ride_id: String,
    #[serde(alias = "vehicle_type")]
    pub vehicle_class: VehicleClass,
    pub distance_m: f64,
    pub duration_s: f64,
    pub fare: f64,
    pub platform_fee: f64,
    pub driver_earning: f64,
    pub app_commission: f64,
    #[serde(default)]
    pub fare_breakdown: serde_json::Value,
    pub pickup: Pickup,
    #[serde(default)]
    pub dropoff: serde_json::Value,
    #[serde(default, rename = "attemptedDrivers")]
    pub attempted_drivers: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl RideMatchJob {
    pub fn job_key(&self) -> String {
        ride_match_job_key(&self.ride_id)
    }

    /// 上一轮被派单的司机
    pub fn previous_driver(&self) -> Option<&str> {
        self.attempted_drivers.last().map(String::as_str)
    }

    /// 下一轮重试任务：追加本轮司机，重试计数加一
    pub fn next_attempt(&self, driver_id: &str) -> RideMatchJob {
        let mut next = self.clone();
        if !next.attempted_drivers.iter().any(|d| d == driver_id) {
            next.attempted_drivers.push(driver_id.to_string());
        }
        next.retry_count = self.retry_count + 1;
        next
    }
}
