use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;

use crate::cache::keys::{DRIVER_CHANNEL_PATTERN, RIDER_CHANNEL_PATTERN};
use crate::cache::operations::BusMessage;
use crate::cache::{EntityKey, MessageBus, PresenceStore};
use crate::error::AppResult;
use crate::socket::protocol::ServerEvent;
use crate::socket::registry::ConnectionRegistry;

/// 投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// 频道名不是实体键
    NotAnEntity,
    /// 实体不在线或记录中没有连接 ID
    NoConnection,
    /// 连接不在本进程，由持有连接的进程投递
    NotLocal,
}

/// 跨进程中继：频道 `role:id` 上的消息经在线状态记录找到 socketId，
/// 只投递给本进程持有的连接
#[derive(Clone)]
pub struct Relay {
    presence: Arc<dyn PresenceStore>,
    bus: Arc<dyn MessageBus>,
    connections: Arc<ConnectionRegistry>,
}

impl Relay {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        bus: Arc<dyn MessageBus>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            presence,
            bus,
            connections,
        }
    }

    pub async fn deliver(&self, message: &BusMessage) -> AppResult<Delivery> {
        let Some(key) = EntityKey::parse(&message.channel) else {
            return Ok(Delivery::NotAnEntity);
        };
        let socket_id = match self.presence.get(&key).await? {
            Some(record) => record.socket_id,
            None => None,
        };
        let Some(socket_id) = socket_id else {
            tracing::debug!(channel = %message.channel, "No socketId found for channel");
            return Ok(Delivery::NoConnection);
        };
        if !self.connections.is_live(&socket_id) {
            return Ok(Delivery::NotLocal);
        }

        let data = serde_json::from_str::<Value>(&message.payload)
            .unwrap_or_else(|_| Value::String(message.payload.clone()));
        if self.connections.send(&socket_id, ServerEvent::Message(data)) {
            tracing::debug!(channel = %message.channel, conn_id = %socket_id, "Relayed message");
            Ok(Delivery::Delivered)
        } else {
            Ok(Delivery::NotLocal)
        }
    }

    /// 订阅司机和乘客频道并持续中继，订阅流结束时返回
    pub async fn run(&self) -> AppResult<()> {
        let mut messages = self
            .bus
            .psubscribe(&[DRIVER_CHANNEL_PATTERN, RIDER_CHANNEL_PATTERN])
            .await?;
        tracing::info!("Relay subscribed to driver and rider channels");

        while let Some(message) = messages.next().await {
            if let Err(e) = self.deliver(&message).await {
                tracing::warn!(channel = %message.channel, "Error relaying message: {}", e);
            }
        }
        Ok(())
    }
}
