use std::sync::Arc;

use cache::{MessageBus, PresenceStore};
use config::Config;
use socket::ConnectionRegistry;

pub mod cache;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod queue;
pub mod router;
pub mod services;
pub mod socket;
pub mod utils;

/// 连接处理进程的共享状态
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub presence: Arc<dyn PresenceStore>,
    pub bus: Arc<dyn MessageBus>,
    pub connections: Arc<ConnectionRegistry>,
}
