/// 缓存数据模型

// 在线状态记录及相关枚举
pub mod presence;

pub use presence::{
    AvailabilityStatus, EntityKey, GeoPoint, LocationFix, NearbyEntity, PresenceFields,
    PresenceRecord, Role, Telemetry, VehicleClass,
};
