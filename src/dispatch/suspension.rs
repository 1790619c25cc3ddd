use crate::cache::EntityKey;
use crate::dispatch::DispatchContext;
use crate::dispatch::messages::DispatchMessage;
use crate::error::AppResult;
use crate::services::{PushNotification, notify_quietly};

pub const SUSPENSION_TITLE: &str = "Status Anda: Tidak Aktif Sementara";
pub const SUSPENSION_REASON: &str = "Anda melewatkan atau menolak terlalu banyak permintaan. Status Anda telah dinonaktifkan. Silakan nonaktifkan dan aktifkan kembali tombol untuk menerima order.";

pub fn suspension_message() -> DispatchMessage {
    DispatchMessage::AccountDeactivatedTemporarily {
        reason: SUSPENSION_REASON.to_string(),
    }
}

/// 通知司机账号被临时停用：推送 + 频道消息
pub async fn notify_suspended(ctx: &DispatchContext, driver_id: &str, push_token: Option<&str>) {
    let message = suspension_message();
    match serde_json::to_value(&message) {
        Ok(data) => {
            let notification = PushNotification::new(SUSPENSION_TITLE, SUSPENSION_REASON, data);
            notify_quietly(ctx.push.as_ref(), push_token, &notification).await;
        }
        Err(e) => tracing::error!(driver_id, "Failed to encode suspension message: {}", e),
    }
    ctx.publish_quietly(&EntityKey::driver(driver_id), &message)
        .await;
}

/// 同步停用单个司机：持久化、通知、清理在线状态
pub async fn suspend_driver(
    ctx: &DispatchContext,
    driver_id: &str,
    push_token: Option<&str>,
) -> AppResult<()> {
    let changed = ctx.store.suspend_drivers(&[driver_id.to_string()]).await?;
    notify_suspended(ctx, driver_id, push_token).await;
    ctx.presence.purge_drivers(&[driver_id.to_string()]).await?;

    tracing::info!(driver_id, changed, "Suspended driver for missed or declined requests");
    Ok(())
}
