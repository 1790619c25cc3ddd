use axum::{Router, routing::get};

use crate::AppState;
use crate::middleware::log_rejections;
use crate::socket::ws_handler;

/// 传输层路由：只有 websocket 升级入口
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .layer(axum::middleware::from_fn(log_rejections));

    // 开发模式允许所有来源
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    router.with_state(state)
}
