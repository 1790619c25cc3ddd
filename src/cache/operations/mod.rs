/// 缓存操作
/// 在线状态存储与发布订阅的接口及其实现

// 接口定义
pub mod store;

// Redis 实现
pub mod redis_store;

// 进程内实现（单节点开发与测试）
pub mod memory;

// 重新导出常用类型
pub use memory::MemoryPresenceStore;
pub use redis_store::RedisPresenceStore;
pub use store::{BusMessage, MessageBus, PresenceStore};
