use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;

use crate::cache::keys::reviewing_key;
use crate::cache::models::presence::F_SOCKET_ID;
use crate::cache::models::{
    EntityKey, GeoPoint, LocationFix, NearbyEntity, PresenceFields, PresenceRecord, Role,
    VehicleClass,
};
use crate::cache::operations::store::{BusMessage, MessageBus, PresenceStore};
use crate::error::AppResult;
use crate::utils::haversine_km;

/// 广播缓冲区大小
const BUS_CAPACITY: usize = 1024;

struct Entry {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, Entry>,
    geo: HashMap<VehicleClass, HashMap<String, GeoPoint>>,
    reviewing: HashMap<String, Instant>,
}

impl MemoryState {
    fn live_record(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.records.get(key).is_some_and(|e| e.expires_at <= now) {
            self.records.remove(key);
        }
        self.records.get_mut(key)
    }

    fn merge(&mut self, key: &EntityKey, fields: &PresenceFields, expires_at: Instant) {
        let redis_key = key.to_string();
        if self.live_record(&redis_key, Instant::now()).is_none() {
            self.records.insert(
                redis_key.clone(),
                Entry {
                    fields: HashMap::new(),
                    expires_at,
                },
            );
        }
        if let Some(entry) = self.records.get_mut(&redis_key) {
            for (field, value) in fields.to_pairs(key) {
                entry.fields.insert(field.to_string(), value);
            }
            entry.expires_at = expires_at;
        }
    }

    fn unindex(&mut self, driver_id: &str) {
        for index in self.geo.values_mut() {
            index.remove(driver_id);
        }
    }

    /// 清理所有过期记录和审核锁，过期司机同时移出索引
    fn prune(&mut self, now: Instant) {
        let mut expired_drivers = Vec::new();
        self.records.retain(|key, entry| {
            let alive = entry.expires_at > now;
            if !alive {
                if let Some(EntityKey { role: Role::Driver, id }) = EntityKey::parse(key) {
                    expired_drivers.push(id);
                }
            }
            alive
        });
        for id in &expired_drivers {
            self.unindex(id);
        }
        self.reviewing.retain(|_, until| *until > now);
    }
}

/// 进程内在线状态存储
///
/// 记录、索引、审核锁共用一把锁，配对更新天然原子。TTL 使用 tokio 时钟，
/// 测试中可以暂停和推进。只适用于单进程部署。
pub struct MemoryPresenceStore {
    state: Mutex<MemoryState>,
    ttl: Duration,
    bus: broadcast::Sender<BusMessage>,
}

impl MemoryPresenceStore {
    pub fn new(ttl: Duration) -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            ttl,
            bus,
        }
    }
}

/// Redis 风格的频道模式匹配，只支持结尾的 `*`
fn channel_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn upsert(&self, key: &EntityKey, fields: &PresenceFields) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.merge(key, fields, Instant::now() + self.ttl);
        Ok(())
    }

    async fn touch(&self, key: &EntityKey) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let expires_at = Instant::now() + self.ttl;
        match state.live_record(&key.to_string(), Instant::now()) {
            Some(entry) => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_location(&self, driver_id: &str, fix: &LocationFix) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let key = EntityKey::driver(driver_id);
        state.merge(&key, &fix.to_fields(), Instant::now() + self.ttl);
        state.unindex(driver_id);
        if fix.status.is_available() {
            state
                .geo
                .entry(fix.vehicle_class)
                .or_default()
                .insert(driver_id.to_string(), fix.location);
        }
        Ok(())
    }

    async fn get(&self, key: &EntityKey) -> AppResult<Option<PresenceRecord>> {
        let mut state = self.state.lock().await;
        match state.live_record(&key.to_string(), Instant::now()) {
            Some(entry) => PresenceRecord::from_fields(key, &entry.fields).map(Some),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &EntityKey) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.records.remove(&key.to_string());
        if key.role == Role::Driver {
            state.unindex(&key.id);
        }
        Ok(())
    }

    async fn remove_if_owned(&self, key: &EntityKey, socket_id: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let redis_key = key.to_string();
        let owned = match state.live_record(&redis_key, Instant::now()) {
            Some(entry) => entry
                .fields
                .get(F_SOCKET_ID)
                .is_none_or(|owner| owner == socket_id),
            None => true,
        };
        if !owned {
            return Ok(false);
        }
        state.records.remove(&redis_key);
        if key.role == Role::Driver {
            state.unindex(&key.id);
        }
        Ok(true)
    }

    async fn purge_drivers(&self, driver_ids: &[String]) -> AppResult<()> {
        let mut state = self.state.lock().await;
        for id in driver_ids {
            state.records.remove(&EntityKey::driver(id.as_str()).to_string());
            state.unindex(id);
        }
        Ok(())
    }

    async fn nearby(
        &self,
        class: VehicleClass,
        center: GeoPoint,
        radius_km: f64,
        exclude: &[String],
    ) -> AppResult<Vec<NearbyEntity>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.prune(now);
        let members: Vec<(String, GeoPoint)> = state
            .geo
            .get(&class)
            .map(|index| index.iter().map(|(id, p)| (id.clone(), *p)).collect())
            .unwrap_or_default();

        let mut found = Vec::new();
        for (id, point) in members {
            let key = EntityKey::driver(id.as_str()).to_string();
            if state.live_record(&key, now).is_none() {
                if let Some(index) = state.geo.get_mut(&class) {
                    index.remove(&id);
                }
                continue;
            }
            let distance_km = haversine_km(center, point);
            if distance_km <= radius_km && !exclude.contains(&id) {
                found.push(NearbyEntity { id, distance_km });
            }
        }
        found.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(found)
    }

    async fn is_indexed(&self, class: VehicleClass, driver_id: &str) -> AppResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .geo
            .get(&class)
            .is_some_and(|index| index.contains_key(driver_id)))
    }

    async fn try_acquire_reviewing(&self, driver_id: &str, ttl: Duration) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.prune(now);
        let key = reviewing_key(driver_id);
        if state.reviewing.get(&key).is_some_and(|until| *until > now) {
            return Ok(false);
        }
        state.reviewing.insert(key, now + ttl);
        Ok(true)
    }

    async fn is_reviewing(&self, driver_id: &str) -> AppResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .reviewing
            .get(&reviewing_key(driver_id))
            .is_some_and(|until| *until > Instant::now()))
    }

    async fn release_reviewing(&self, driver_id: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.reviewing.remove(&reviewing_key(driver_id));
        Ok(())
    }
}

#[async_trait]
impl MessageBus for MemoryPresenceStore {
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
        // 没有订阅者时发送失败，与 Redis 的 PUBLISH 返回 0 等价
        let _ = self.bus.send(BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn psubscribe(&self, patterns: &[&str]) -> AppResult<BoxStream<'static, BusMessage>> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        let rx = self.bus.subscribe();

        let stream = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "in-memory bus receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |message| {
            let matched = patterns
                .iter()
                .any(|p| channel_matches(p, &message.channel));
            futures_util::future::ready(matched)
        });

        Ok(stream.boxed())
    }
}
