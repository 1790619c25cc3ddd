use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::keys::entity_key;
use crate::error::{AppError, AppResult};

/// 连接角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Rider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Driver => "driver",
            Role::Rider => "rider",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "driver" => Ok(Role::Driver),
            "rider" => Ok(Role::Rider),
            other => Err(AppError::validation(
                "role",
                format!("'{}' is not one of driver, rider", other),
            )),
        }
    }
}

/// 车型，每种车型对应一个地理索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Motorcycle,
    Car,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 2] = [VehicleClass::Motorcycle, VehicleClass::Car];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Motorcycle => "motorcycle",
            VehicleClass::Car => "car",
        }
    }
}

impl FromStr for VehicleClass {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "motorcycle" => Ok(VehicleClass::Motorcycle),
            "car" => Ok(VehicleClass::Car),
            other => Err(AppError::validation(
                "vehicleClass",
                format!("unknown vehicle class '{}'", other),
            )),
        }
    }
}

/// 司机可用状态，只有 `Available` 的司机会出现在地理索引中
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    EnRouteToPickup,
    WaitingAtPickup,
    EnRouteToDropOff,
    NotAvailable,
    Busy,
    Offline,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::EnRouteToPickup => "en_route_to_pickup",
            AvailabilityStatus::WaitingAtPickup => "waiting_at_pickup",
            AvailabilityStatus::EnRouteToDropOff => "en_route_to_drop_off",
            AvailabilityStatus::NotAvailable => "not_available",
            AvailabilityStatus::Busy => "busy",
            AvailabilityStatus::Offline => "offline",
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, AvailabilityStatus::Available)
    }
}

impl FromStr for AvailabilityStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "available" => AvailabilityStatus::Available,
            "en_route_to_pickup" => AvailabilityStatus::EnRouteToPickup,
            "waiting_at_pickup" => AvailabilityStatus::WaitingAtPickup,
            "en_route_to_drop_off" => AvailabilityStatus::EnRouteToDropOff,
            "not_available" => AvailabilityStatus::NotAvailable,
            "busy" => AvailabilityStatus::Busy,
            "offline" => AvailabilityStatus::Offline,
            other => {
                return Err(AppError::validation(
                    "availabilityStatus",
                    format!("unknown status '{}'", other),
                ));
            }
        };
        Ok(status)
    }
}

/// 实体键：角色 + ID，格式为 `role:id`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub role: Role,
    pub id: String,
}

impl EntityKey {
    pub fn new(role: Role, id: impl Into<String>) -> Self {
        Self {
            role,
            id: id.into(),
        }
    }

    pub fn driver(id: impl Into<String>) -> Self {
        Self::new(Role::Driver, id)
    }

    pub fn rider(id: impl Into<String>) -> Self {
        Self::new(Role::Rider, id)
    }

    /// 从频道名解析，例如 `driver:abc`
    pub fn parse(raw: &str) -> Option<Self> {
        let (role, id) = raw.split_once(':')?;
        let role = role.parse().ok()?;
        // 审核锁等派生键带有额外的冒号，不是实体键
        if id.is_empty() || id.contains(':') {
            return None;
        }
        Some(Self::new(role, id))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&entity_key(self.role, &self.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// 设备遥测数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub speed_kph: Option<f64>,
    pub heading_deg: Option<f64>,
    pub battery_level: Option<f64>,
    pub accuracy_m: Option<f64>,
}

// 哈希字段名，与客户端约定保持一致
pub(crate) const F_SOCKET_ID: &str = "socketId";
const F_ROLE: &str = "role";
const F_ID: &str = "id";
const F_LAT: &str = "lat";
const F_LNG: &str = "lng";
const F_VEHICLE: &str = "vehicle_type";
const F_STATUS: &str = "availabilityStatus";
const F_UPDATE_VIA: &str = "update_via";
const F_UPDATED_AT: &str = "last_updated_at";
const F_SPEED: &str = "speed_kph";
const F_HEADING: &str = "heading_deg";
const F_BATTERY: &str = "battery_level";
const F_ACCURACY: &str = "accuracy_m";

/// 在线状态记录的部分更新，只写入 `Some` 的字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceFields {
    pub socket_id: Option<String>,
    pub location: Option<GeoPoint>,
    pub vehicle_class: Option<VehicleClass>,
    pub availability: Option<AvailabilityStatus>,
    pub update_via: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub telemetry: Telemetry,
}

impl PresenceFields {
    /// 转换为哈希字段对，身份字段 role/id 总是写入
    pub fn to_pairs(&self, key: &EntityKey) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (F_ROLE, key.role.as_str().to_string()),
            (F_ID, key.id.clone()),
        ];
        if let Some(socket_id) = &self.socket_id {
            pairs.push((F_SOCKET_ID, socket_id.clone()));
        }
        if let Some(location) = self.location {
            pairs.push((F_LAT, location.latitude.to_string()));
            pairs.push((F_LNG, location.longitude.to_string()));
        }
        if let Some(class) = self.vehicle_class {
            pairs.push((F_VEHICLE, class.as_str().to_string()));
        }
        if let Some(status) = self.availability {
            pairs.push((F_STATUS, status.as_str().to_string()));
        }
        if let Some(via) = &self.update_via {
            pairs.push((F_UPDATE_VIA, via.clone()));
        }
        if let Some(at) = self.last_updated_at {
            pairs.push((F_UPDATED_AT, at.to_rfc3339()));
        }
        let telemetry = [
            (F_SPEED, self.telemetry.speed_kph),
            (F_HEADING, self.telemetry.heading_deg),
            (F_BATTERY, self.telemetry.battery_level),
            (F_ACCURACY, self.telemetry.accuracy_m),
        ];
        for (field, value) in telemetry {
            if let Some(value) = value {
                pairs.push((field, value.to_string()));
            }
        }
        pairs
    }
}

/// 一次位置/状态上报，同时更新记录和地理索引
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub vehicle_class: VehicleClass,
    pub location: GeoPoint,
    pub status: AvailabilityStatus,
    pub telemetry: Telemetry,
    pub update_via: Option<String>,
}

impl LocationFix {
    pub fn new(vehicle_class: VehicleClass, location: GeoPoint, status: AvailabilityStatus) -> Self {
        Self {
            vehicle_class,
            location,
            status,
            telemetry: Telemetry::default(),
            update_via: None,
        }
    }

    pub fn to_fields(&self) -> PresenceFields {
        PresenceFields {
            socket_id: None,
            location: Some(self.location),
            vehicle_class: Some(self.vehicle_class),
            availability: Some(self.status),
            update_via: self.update_via.clone(),
            last_updated_at: Some(Utc::now()),
            telemetry: self.telemetry.clone(),
        }
    }
}

/// 在线状态记录（每个司机或乘客一条）
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    pub key: EntityKey,
    pub socket_id: Option<String>,
    pub location: Option<GeoPoint>,
    pub vehicle_class: Option<VehicleClass>,
    pub availability: Option<AvailabilityStatus>,
    pub update_via: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub telemetry: Telemetry,
}

impl PresenceRecord {
    /// 从哈希字段解析记录
    pub fn from_fields(key: &EntityKey, fields: &HashMap<String, String>) -> AppResult<Self> {
        let malformed = |message: String| AppError::MalformedRecord {
            key: key.to_string(),
            message,
        };
        let number = |field: &str| -> AppResult<Option<f64>> {
            match fields.get(field).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                None => Ok(None),
                Some(raw) => raw
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| malformed(format!("{} is not a number: '{}'", field, raw))),
            }
        };

        let location = match (number(F_LAT)?, number(F_LNG)?) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        };
        // 未知的车型或状态按缺失处理，不影响其他字段
        let vehicle_class = fields.get(F_VEHICLE).and_then(|v| v.parse().ok());
        let availability = fields.get(F_STATUS).and_then(|v| v.parse().ok());
        let last_updated_at = fields
            .get(F_UPDATED_AT)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Self {
            key: key.clone(),
            socket_id: fields.get(F_SOCKET_ID).filter(|v| !v.is_empty()).cloned(),
            location,
            vehicle_class,
            availability,
            update_via: fields.get(F_UPDATE_VIA).cloned(),
            last_updated_at,
            telemetry: Telemetry {
                speed_kph: number(F_SPEED)?,
                heading_deg: number(F_HEADING)?,
                battery_level: number(F_BATTERY)?,
                accuracy_m: number(F_ACCURACY)?,
            },
        })
    }

    pub fn is_available(&self) -> bool {
        self.availability.is_some_and(|s| s.is_available())
    }
}

/// 半径查询结果
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyEntity {
    pub id: String,
    pub distance_km: f64,
}
