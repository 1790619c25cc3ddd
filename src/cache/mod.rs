// 缓存模块
// 在线状态存储：记录、地理索引、审核锁和发布订阅

pub mod keys;
pub mod models;
pub mod operations;

// 重新导出常用类型，方便其他模块使用
pub use models::{EntityKey, PresenceRecord, Role, VehicleClass};
pub use operations::{MemoryPresenceStore, MessageBus, PresenceStore, RedisPresenceStore};
