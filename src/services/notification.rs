use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::error::{AppError, AppResult};

/// 推送通知内容
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl PushNotification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data,
        }
    }
}

/// 推送通知网关（外部协作方）
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, token: &str, notification: &PushNotification) -> AppResult<()>;
}

/// 检查 Expo 推送令牌格式
pub fn is_expo_push_token(token: &str) -> bool {
    (token.starts_with("ExponentPushToken[") || token.starts_with("ExpoPushToken["))
        && token.ends_with(']')
}

/// Expo 推送网关
#[derive(Clone)]
pub struct ExpoPushGateway {
    http: reqwest::Client,
    url: String,
}

impl ExpoPushGateway {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PushGateway for ExpoPushGateway {
    async fn send(&self, token: &str, notification: &PushNotification) -> AppResult<()> {
        if !is_expo_push_token(token) {
            return Err(AppError::InvalidPushToken(token.to_string()));
        }

        let message = json!({
            "to": token,
            "sound": "default",
            "title": notification.title,
            "body": notification.body,
            "data": notification.data,
            "priority": "high",
            "channelId": "default",
            "badge": 1,
        });

        let response = self.http.post(&self.url).json(&message).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::PushRejected {
                status: status.as_u16(),
            });
        }

        // 网关对单条消息返回 ticket，错误只记录
        let ticket: serde_json::Value = response.json().await?;
        if ticket["data"]["status"] == "error" {
            tracing::warn!(
                "Push ticket error: {}",
                ticket["data"]["message"].as_str().unwrap_or("unknown")
            );
        }

        Ok(())
    }
}

/// 发送推送，失败只记录日志，不影响派单逻辑
pub async fn notify_quietly(
    push: &dyn PushGateway,
    token: Option<&str>,
    notification: &PushNotification,
) {
    let Some(token) = token else {
        return;
    };
    if let Err(e) = push.send(token, notification).await {
        tracing::warn!(title = %notification.title, "Failed to send push notification: {}", e);
    }
}
