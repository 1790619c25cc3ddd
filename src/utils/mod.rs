use chrono::Utc;

use crate::cache::models::GeoPoint;

/// 地球平均半径（公里）
const EARTH_RADIUS_KM: f64 = 6371.0;

/// 计算球面距离（Haversine 公式），单位公里
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let delta_phi = (to.latitude - from.latitude).to_radians();
    let delta_lambda = (to.longitude - from.longitude).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// 当前毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
