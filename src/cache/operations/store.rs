use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::cache::models::{
    EntityKey, GeoPoint, LocationFix, NearbyEntity, PresenceFields, PresenceRecord, VehicleClass,
};
use crate::error::AppResult;

/// 在线状态存储
///
/// 所有写入对读取同一存储的任何进程可见。存储不可用时返回瞬时错误，
/// 调用方不能假设写入成功。
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// 合并字段到记录并刷新存活 TTL
    async fn upsert(&self, key: &EntityKey, fields: &PresenceFields) -> AppResult<()>;

    /// 只刷新存活 TTL，记录不存在时返回 false
    async fn touch(&self, key: &EntityKey) -> AppResult<bool>;

    /// 原子地更新司机记录与地理索引：可用则加入对应车型索引，否则移出；
    /// 同时移出其他车型索引
    async fn set_location(&self, driver_id: &str, fix: &LocationFix) -> AppResult<()>;

    async fn get(&self, key: &EntityKey) -> AppResult<Option<PresenceRecord>>;

    /// 删除记录；司机同时移出所有车型索引
    async fn remove(&self, key: &EntityKey) -> AppResult<()>;

    /// 仅当记录仍属于该连接（socketId 相同）或已不存在时删除，
    /// 返回是否执行了删除。同一身份在新连接上重新注册后，旧连接的清理不能删掉新记录
    async fn remove_if_owned(&self, key: &EntityKey, socket_id: &str) -> AppResult<bool>;

    /// 批量删除司机记录及索引成员
    async fn purge_drivers(&self, driver_ids: &[String]) -> AppResult<()>;

    /// 半径内的司机，按距离升序，附带公里距离
    async fn nearby(
        &self,
        class: VehicleClass,
        center: GeoPoint,
        radius_km: f64,
        exclude: &[String],
    ) -> AppResult<Vec<NearbyEntity>>;

    async fn is_indexed(&self, class: VehicleClass, driver_id: &str) -> AppResult<bool>;

    /// 原子地设置审核锁（不存在时才设置），返回是否获得
    async fn try_acquire_reviewing(&self, driver_id: &str, ttl: Duration) -> AppResult<bool>;

    async fn is_reviewing(&self, driver_id: &str) -> AppResult<bool>;

    /// 释放审核锁（派单未送达时）
    async fn release_reviewing(&self, driver_id: &str) -> AppResult<()>;
}

/// 发布订阅收到的一条消息
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// 跨进程发布订阅
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()>;

    /// 按模式订阅（`driver:*`），返回订阅之后发布的消息流
    async fn psubscribe(&self, patterns: &[&str]) -> AppResult<BoxStream<'static, BusMessage>>;
}
