use crate::cache::models::presence::{Role, VehicleClass};

/// 司机地理索引键前缀，每种车型一个集合
const DRIVER_GEO_PREFIX: &str = "drivers:locations:";

/// 司机审核锁键前缀
const REVIEWING_PREFIX: &str = "driver:is_reviewing:";

/// 中继订阅的司机频道模式
pub const DRIVER_CHANNEL_PATTERN: &str = "driver:*";

/// 中继订阅的乘客频道模式
pub const RIDER_CHANNEL_PATTERN: &str = "rider:*";

/// 生成实体键，同时也是该实体的发布订阅频道名
pub fn entity_key(role: Role, id: &str) -> String {
    format!("{}:{}", role.as_str(), id)
}

/// 生成某车型的司机地理索引键
pub fn driver_geo_key(class: VehicleClass) -> String {
    format!("{}{}", DRIVER_GEO_PREFIX, class.as_str())
}

/// 生成司机审核锁键
pub fn reviewing_key(driver_id: &str) -> String {
    format!("{}{}", REVIEWING_PREFIX, driver_id)
}
