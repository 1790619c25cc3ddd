// 外部服务
// 推送通知网关

pub mod notification;

pub use notification::{ExpoPushGateway, PushGateway, PushNotification, notify_quietly};
