use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client as RedisClient};

use crate::cache::keys::{driver_geo_key, reviewing_key};
use crate::cache::models::presence::F_SOCKET_ID;
use crate::cache::models::{
    EntityKey, GeoPoint, LocationFix, NearbyEntity, PresenceFields, PresenceRecord, Role,
    VehicleClass,
};
use crate::cache::operations::store::{BusMessage, MessageBus, PresenceStore};
use crate::error::AppResult;

/// 条件删除脚本：socketId 不属于该连接时不动，否则删除记录并移出索引
///
/// KEYS: 记录键, 各车型索引键（骑手没有）
/// ARGV: socketId 字段名, 连接 id, 索引成员
const REMOVE_IF_OWNED_SCRIPT: &str = r#"
local owner = redis.call('HGET', KEYS[1], ARGV[1])
if owner and owner ~= ARGV[2] then
    return 0
end
redis.call('DEL', KEYS[1])
for i = 2, #KEYS do
    redis.call('ZREM', KEYS[i], ARGV[3])
end
return 1
"#;

/// 基于 Redis 的在线状态存储
///
/// 记录为哈希，地理索引为每种车型一个 GEO 集合。记录与索引的配对更新
/// 都放在 MULTI/EXEC 管道中执行。
#[derive(Clone)]
pub struct RedisPresenceStore {
    client: Arc<RedisClient>,
    conn: MultiplexedConnection,
    ttl: Duration,
    remove_if_owned: redis::Script,
}

impl RedisPresenceStore {
    /// 创建存储并建立多路复用连接
    pub async fn connect(client: Arc<RedisClient>, ttl: Duration) -> AppResult<Self> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            conn,
            ttl,
            remove_if_owned: redis::Script::new(REMOVE_IF_OWNED_SCRIPT),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    fn ttl_secs(&self) -> i64 {
        self.ttl.as_secs().max(1) as i64
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn upsert(&self, key: &EntityKey, fields: &PresenceFields) -> AppResult<()> {
        let mut conn = self.conn();
        let redis_key = key.to_string();
        let pairs = fields.to_pairs(key);

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(&redis_key, &pairs)
            .ignore()
            .expire(&redis_key, self.ttl_secs())
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn touch(&self, key: &EntityKey) -> AppResult<bool> {
        let mut conn = self.conn();
        let touched: bool = conn.expire(key.to_string(), self.ttl_secs()).await?;
        Ok(touched)
    }

    async fn set_location(&self, driver_id: &str, fix: &LocationFix) -> AppResult<()> {
        let mut conn = self.conn();
        let key = EntityKey::driver(driver_id);
        let redis_key = key.to_string();
        let pairs = fix.to_fields().to_pairs(&key);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(&redis_key, &pairs)
            .ignore()
            .expire(&redis_key, self.ttl_secs())
            .ignore();

        for class in VehicleClass::ALL {
            let geo_key = driver_geo_key(class);
            if class == fix.vehicle_class && fix.status.is_available() {
                // GEOADD 参数顺序为经度、纬度
                pipe.cmd("GEOADD")
                    .arg(&geo_key)
                    .arg(fix.location.longitude)
                    .arg(fix.location.latitude)
                    .arg(driver_id)
                    .ignore();
            } else {
                pipe.zrem(&geo_key, driver_id).ignore();
            }
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &EntityKey) -> AppResult<Option<PresenceRecord>> {
        let mut conn = self.conn();
        let fields: HashMap<String, String> = conn.hgetall(key.to_string()).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        PresenceRecord::from_fields(key, &fields).map(Some)
    }

    async fn remove(&self, key: &EntityKey) -> AppResult<()> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key.to_string()).ignore();
        if key.role == Role::Driver {
            for class in VehicleClass::ALL {
                pipe.zrem(driver_geo_key(class), &key.id).ignore();
            }
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn remove_if_owned(&self, key: &EntityKey, socket_id: &str) -> AppResult<bool> {
        let mut conn = self.conn();
        let mut invocation = self.remove_if_owned.key(key.to_string());
        if key.role == Role::Driver {
            for class in VehicleClass::ALL {
                invocation.key(driver_geo_key(class));
            }
        }
        let removed: i64 = invocation
            .arg(F_SOCKET_ID)
            .arg(socket_id)
            .arg(&key.id)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn purge_drivers(&self, driver_ids: &[String]) -> AppResult<()> {
        if driver_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let keys: Vec<String> = driver_ids
            .iter()
            .map(|id| EntityKey::driver(id.as_str()).to_string())
            .collect();

        let mut pipe = redis::pipe();
        pipe.atomic().del(keys).ignore();
        for class in VehicleClass::ALL {
            pipe.zrem(driver_geo_key(class), driver_ids).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn nearby(
        &self,
        class: VehicleClass,
        center: GeoPoint,
        radius_km: f64,
        exclude: &[String],
    ) -> AppResult<Vec<NearbyEntity>> {
        let mut conn = self.conn();
        let geo_key = driver_geo_key(class);

        // GEOSEARCH ... ASC WITHDIST 返回 [成员, 距离] 列表
        let results: Vec<(String, f64)> = redis::cmd("GEOSEARCH")
            .arg(&geo_key)
            .arg("FROMLONLAT")
            .arg(center.longitude)
            .arg(center.latitude)
            .arg("BYRADIUS")
            .arg(radius_km)
            .arg("km")
            .arg("ASC")
            .arg("WITHDIST")
            .query_async(&mut conn)
            .await?;

        if results.is_empty() {
            return Ok(Vec::new());
        }

        // 记录已过期的索引成员不可投递，顺手清理
        let mut pipe = redis::pipe();
        for (driver_id, _) in &results {
            pipe.exists(EntityKey::driver(driver_id.as_str()).to_string());
        }
        let alive: Vec<bool> = pipe.query_async(&mut conn).await?;

        let stale: Vec<&String> = results
            .iter()
            .zip(&alive)
            .filter(|(_, alive)| !**alive)
            .map(|((id, _), _)| id)
            .collect();
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), %geo_key, "purging expired drivers from geo index");
            let _: () = conn.zrem(&geo_key, stale).await?;
        }

        Ok(results
            .into_iter()
            .zip(alive)
            .filter(|((id, _), alive)| *alive && !exclude.contains(id))
            .map(|((id, distance_km), _)| NearbyEntity { id, distance_km })
            .collect())
    }

    async fn is_indexed(&self, class: VehicleClass, driver_id: &str) -> AppResult<bool> {
        let mut conn = self.conn();
        let score: Option<f64> = conn.zscore(driver_geo_key(class), driver_id).await?;
        Ok(score.is_some())
    }

    async fn try_acquire_reviewing(&self, driver_id: &str, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.conn();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(reviewing_key(driver_id))
            .arg("true")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn is_reviewing(&self, driver_id: &str) -> AppResult<bool> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(reviewing_key(driver_id)).await?;
        Ok(value.as_deref() == Some("true"))
    }

    async fn release_reviewing(&self, driver_id: &str) -> AppResult<()> {
        let mut conn = self.conn();
        let _: () = conn.del(reviewing_key(driver_id)).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageBus for RedisPresenceStore {
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
        let mut conn = self.conn();
        let receivers: i64 = conn.publish(channel, payload).await?;
        tracing::debug!(channel, receivers, "published message");
        Ok(())
    }

    async fn psubscribe(&self, patterns: &[&str]) -> AppResult<BoxStream<'static, BusMessage>> {
        // 订阅需要独立连接，不能复用多路复用连接
        let mut pubsub = self.client.get_async_pubsub().await?;
        for pattern in patterns {
            pubsub.psubscribe(*pattern).await?;
        }

        let stream = pubsub.into_on_message().map(|msg| {
            let payload = msg.get_payload::<String>().unwrap_or_else(|e| {
                tracing::warn!(channel = msg.get_channel_name(), "non-text pub/sub payload: {}", e);
                String::new()
            });
            BusMessage {
                channel: msg.get_channel_name().to_string(),
                payload,
            }
        });

        Ok(stream.boxed())
    }
}
