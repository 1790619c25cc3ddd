use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::models::{
    AvailabilityStatus, GeoPoint, LocationFix, PresenceFields, Telemetry, VehicleClass,
};
use crate::cache::{EntityKey, PresenceStore, Role};
use crate::error::{AppError, AppResult};
use crate::socket::protocol::{
    Ack, DriverTarget, InboundFrame, LocationPayload, LocationUpdate, RegisterPayload, ServerEvent,
};
use crate::socket::registry::ConnectionRegistry;

const UPDATE_VIA: &str = "websocket";

const DRIVER_EVENTS: &[&str] = &["register", "updateLocation"];
const RIDER_EVENTS: &[&str] = &[
    "register",
    "updateLocation",
    "subscribeToDriver",
    "unsubscribeFromDriver",
];

/// 连接状态：Unregistered -> Registered(role, id) -> Closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered(EntityKey),
    Closed,
}

/// 处理一帧后连接的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
}

/// 单个连接的会话
///
/// 与传输层无关：出站消息都经由连接表发送，同一连接的帧按顺序处理。
pub struct Session {
    conn_id: String,
    state: SessionState,
    presence: Arc<dyn PresenceStore>,
    connections: Arc<ConnectionRegistry>,
    /// 司机最近一次上报的车型与状态，位置上报省略时沿用
    vehicle_class: Option<VehicleClass>,
    availability: Option<AvailabilityStatus>,
}

impl Session {
    pub fn new(
        conn_id: impl Into<String>,
        presence: Arc<dyn PresenceStore>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            conn_id: conn_id.into(),
            state: SessionState::Unregistered,
            presence,
            connections,
            vehicle_class: None,
            availability: None,
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&EntityKey> {
        match &self.state {
            SessionState::Registered(key) => Some(key),
            _ => None,
        }
    }

    pub async fn handle_text(&mut self, text: &str) -> Flow {
        match serde_json::from_str::<InboundFrame>(text) {
            Ok(frame) => self.handle(frame).await,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, "Malformed frame: {}", e);
                self.send(ServerEvent::notice("Malformed frame: expected {event, data, id?}"));
                Flow::Continue
            }
        }
    }

    pub async fn handle(&mut self, frame: InboundFrame) -> Flow {
        let key = match &self.state {
            SessionState::Closed => return Flow::Disconnect,
            SessionState::Unregistered => {
                if frame.event == "register" {
                    return self.register(frame).await;
                }
                tracing::warn!(conn_id = %self.conn_id, event = %frame.event, "Event before register");
                self.send(ServerEvent::notice(format!(
                    "Register before sending '{}'",
                    frame.event
                )));
                self.ack(&frame, Err("Connection is not registered.".into()));
                return Flow::Continue;
            }
            SessionState::Registered(key) => key.clone(),
        };

        let allowed = match key.role {
            Role::Driver => DRIVER_EVENTS,
            Role::Rider => RIDER_EVENTS,
        };
        if !allowed.contains(&frame.event.as_str()) {
            tracing::warn!(conn_id = %self.conn_id, entity = %key, event = %frame.event, "Unknown event");
            self.send(ServerEvent::notice(format!("Unknown event: '{}'", frame.event)));
            self.ack(&frame, Err(format!("Event '{}' is not supported.", frame.event)));
            return Flow::Continue;
        }

        let result = match (key.role, frame.event.as_str()) {
            (_, "register") => Err("Connection is already registered.".to_string()),
            (Role::Driver, "updateLocation") => self
                .driver_location(&key, &frame.data)
                .await
                .map_err(|e| self.reject(&key, &frame.event, e)),
            (Role::Rider, "updateLocation") => self
                .rider_location(&key, &frame.data)
                .await
                .map_err(|e| self.reject(&key, &frame.event, e)),
            (Role::Rider, "subscribeToDriver") => self
                .subscribe(&frame.data)
                .await
                .map_err(|e| self.reject(&key, &frame.event, e)),
            (Role::Rider, "unsubscribeFromDriver") => self
                .unsubscribe(&frame.data)
                .map_err(|e| self.reject(&key, &frame.event, e)),
            _ => Err(format!("Event '{}' is not supported.", frame.event)),
        };

        self.ack(&frame, result);
        Flow::Continue
    }

    /// 刷新存活 TTL
    pub async fn heartbeat(&self) {
        let Some(key) = self.identity() else {
            return;
        };
        match self.presence.touch(key).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(conn_id = %self.conn_id, entity = %key, "presence record already expired"),
            Err(e) => tracing::warn!(conn_id = %self.conn_id, entity = %key, "Failed to refresh presence: {}", e),
        }
    }

    /// 断开时按角色清理，失败只记录日志
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        let left = self.connections.remove(&self.conn_id);

        let SessionState::Registered(key) = previous else {
            return;
        };

        // 同一身份可能已在新连接上注册，只删除本连接拥有的记录
        match self.presence.remove_if_owned(&key, &self.conn_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(conn_id = %self.conn_id, entity = %key, "Presence owned by a newer connection, left in place");
            }
            Err(e) => {
                tracing::error!(conn_id = %self.conn_id, entity = %key, "Error during disconnect cleanup: {}", e);
            }
        }
        if key.role == Role::Rider {
            for room in &left {
                tracing::debug!(conn_id = %self.conn_id, entity = %key, room = %room, "left room");
            }
        }
        tracing::info!(conn_id = %self.conn_id, entity = %key, "Cleaned up connection");
    }

    async fn register(&mut self, frame: InboundFrame) -> Flow {
        let payload: RegisterPayload = match serde_json::from_value(frame.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, "Invalid registration payload: {}", e);
                self.ack(&frame, Err("Invalid registration payload.".into()));
                return Flow::Disconnect;
            }
        };

        let key = match identity_from(&payload) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, "Rejected registration: {}", e);
                self.ack(&frame, Err(e.to_string()));
                return Flow::Disconnect;
            }
        };

        let result = self.write_identity(&key, &payload.location).await;
        if let Err(e) = &result {
            tracing::error!(conn_id = %self.conn_id, entity = %key, "Failed to register presence: {}", e);
            self.ack(&frame, Err(e.to_string()));
            return Flow::Continue;
        }

        tracing::info!(conn_id = %self.conn_id, entity = %key, "Registered connection");
        self.state = SessionState::Registered(key);
        self.ack(&frame, Ok(()));
        Flow::Continue
    }

    async fn write_identity(&mut self, key: &EntityKey, location: &LocationPayload) -> AppResult<()> {
        let fields = PresenceFields {
            socket_id: Some(self.conn_id.clone()),
            update_via: Some(UPDATE_VIA.to_string()),
            last_updated_at: Some(Utc::now()),
            ..Default::default()
        };
        self.presence.upsert(key, &fields).await?;

        // 注册时附带的初始位置按一次位置上报处理
        if key.role == Role::Driver && location.lat.is_some() && location.lng.is_some() {
            self.apply_driver_fix(key, location).await?;
        }
        Ok(())
    }

    async fn driver_location(&mut self, key: &EntityKey, data: &Value) -> AppResult<()> {
        let payload: LocationPayload = decode("location", data)?;
        self.apply_driver_fix(key, &payload).await
    }

    async fn apply_driver_fix(&mut self, key: &EntityKey, payload: &LocationPayload) -> AppResult<()> {
        let location = coordinates(payload)?;
        let vehicle_class = match payload.vehicle_class.as_deref() {
            Some(raw) => raw.parse()?,
            None => self
                .vehicle_class
                .ok_or_else(|| AppError::validation("vehicleClass", "is required"))?,
        };
        let status = match payload.availability_status.as_deref() {
            Some(raw) => raw.parse()?,
            None => self.availability.unwrap_or(AvailabilityStatus::Available),
        };

        let mut fix = LocationFix::new(vehicle_class, location, status);
        fix.telemetry = telemetry(payload);
        fix.update_via = Some(payload.update_via.clone().unwrap_or_else(|| UPDATE_VIA.into()));

        self.presence.set_location(&key.id, &fix).await?;
        self.vehicle_class = Some(vehicle_class);
        self.availability = Some(status);

        // 同进程内订阅该司机的乘客直接收到位置
        let update = ServerEvent::LocationUpdate(LocationUpdate {
            driver_id: key.id.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
            heading: fix.telemetry.heading_deg,
            speed: fix.telemetry.speed_kph,
        });
        let delivered = self.connections.broadcast(&key.to_string(), &update);
        tracing::debug!(entity = %key, delivered, "location fanned out");
        Ok(())
    }

    async fn rider_location(&mut self, key: &EntityKey, data: &Value) -> AppResult<()> {
        let payload: LocationPayload = decode("location", data)?;
        let fields = PresenceFields {
            location: Some(coordinates(&payload)?),
            update_via: Some(payload.update_via.clone().unwrap_or_else(|| UPDATE_VIA.into())),
            last_updated_at: Some(Utc::now()),
            telemetry: telemetry(&payload),
            ..Default::default()
        };
        self.presence.upsert(key, &fields).await
    }

    async fn subscribe(&mut self, data: &Value) -> AppResult<()> {
        let target = driver_target(data)?;
        if self.connections.join(&self.conn_id, &target.to_string()) {
            tracing::info!(conn_id = %self.conn_id, room = %target, "Rider subscribed to driver");
        }

        // 先推一次最近位置，不必等下一次上报
        if let Some(record) = self.presence.get(&target).await? {
            if let Some(location) = record.location {
                self.send(ServerEvent::LocationUpdate(LocationUpdate {
                    driver_id: target.id.clone(),
                    latitude: location.latitude,
                    longitude: location.longitude,
                    heading: record.telemetry.heading_deg,
                    speed: record.telemetry.speed_kph,
                }));
            }
        }
        Ok(())
    }

    fn unsubscribe(&mut self, data: &Value) -> AppResult<()> {
        let target = driver_target(data)?;
        if self.connections.leave(&self.conn_id, &target.to_string()) {
            tracing::info!(conn_id = %self.conn_id, room = %target, "Rider unsubscribed from driver");
        }
        Ok(())
    }

    fn reject(&self, key: &EntityKey, event: &str, e: AppError) -> String {
        if e.is_transient() {
            tracing::error!(conn_id = %self.conn_id, entity = %key, event, "Event failed: {}", e);
        } else {
            tracing::warn!(conn_id = %self.conn_id, entity = %key, event, "Invalid event payload: {}", e);
        }
        e.to_string()
    }

    fn send(&self, event: ServerEvent) {
        if !self.connections.send(&self.conn_id, event) {
            tracing::debug!(conn_id = %self.conn_id, "connection gone, dropping outbound frame");
        }
    }

    fn ack(&self, frame: &InboundFrame, result: Result<(), String>) {
        let Some(id) = frame.id.clone() else {
            return;
        };
        let ack = match result {
            Ok(()) => Ack::ok(id),
            Err(error) => Ack::err(id, error),
        };
        self.send(ServerEvent::Ack(ack));
    }
}

fn identity_from(payload: &RegisterPayload) -> AppResult<EntityKey> {
    let role = payload
        .role
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::validation("role", "is required"))?;
    let id = payload
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::validation("id", "is required"))?;
    let role: Role = role.parse()?;
    if id.contains(':') {
        return Err(AppError::validation("id", "must not contain ':'"));
    }
    Ok(EntityKey::new(role, id))
}

fn decode<T: DeserializeOwned>(field: &'static str, data: &Value) -> AppResult<T> {
    serde_json::from_value(data.clone()).map_err(|e| AppError::validation(field, e.to_string()))
}

fn coordinates(payload: &LocationPayload) -> AppResult<GeoPoint> {
    let (Some(lat), Some(lng)) = (payload.lat, payload.lng) else {
        return Err(AppError::validation("lat/lng", "numeric lat and lng are required"));
    };
    let point = GeoPoint::new(lat, lng);
    if !point.is_valid() {
        return Err(AppError::validation("lat/lng", "coordinates are out of range"));
    }
    Ok(point)
}

fn telemetry(payload: &LocationPayload) -> Telemetry {
    Telemetry {
        speed_kph: payload.speed_kph,
        heading_deg: payload.heading_deg,
        battery_level: payload.battery_level,
        accuracy_m: payload.accuracy_m,
    }
}

fn driver_target(data: &Value) -> AppResult<EntityKey> {
    let target: DriverTarget = decode("driverId", data)?;
    if target.driver_id.is_empty() || target.driver_id.contains(':') {
        return Err(AppError::validation("driverId", "is not a valid driver id"));
    }
    Ok(EntityKey::driver(target.driver_id))
}
