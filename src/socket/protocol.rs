use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::AppResult;

/// 客户端帧：`{event, data, id?}`，`id` 为应答关联 ID
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

/// 对带 `id` 帧的应答
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub id: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok(id: Value) -> Self {
        Self {
            id,
            success: true,
            error: None,
        }
    }

    pub fn err(id: Value, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// 推给订阅乘客的司机位置
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub driver_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
}

/// 服务端帧：`{event, data}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Message(Value),
    LocationUpdate(LocationUpdate),
    Ack(Ack),
}

impl ServerEvent {
    /// 提示性消息，例如未知事件
    pub fn notice(text: impl Into<String>) -> Self {
        ServerEvent::Message(json!({ "msg": text.into() }))
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterPayload {
    pub role: Option<String>,
    pub id: Option<String>,
    #[serde(flatten)]
    pub location: LocationPayload,
}

/// 位置上报，坐标必须是数字
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationPayload {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(rename = "vehicleClass", alias = "vehicle_type")]
    pub vehicle_class: Option<String>,
    #[serde(rename = "availabilityStatus")]
    pub availability_status: Option<String>,
    pub update_via: Option<String>,
    pub speed_kph: Option<f64>,
    pub heading_deg: Option<f64>,
    pub battery_level: Option<f64>,
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverTarget {
    pub driver_id: String,
}
