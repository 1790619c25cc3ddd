use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::{error, warn};

/// 记录被拒绝的升级请求和服务端错误
pub async fn log_rejections(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let response = next.run(req).await;

    let status = response.status();
    if status.is_server_error() {
        error!(%method, %uri, "Server error occurred - Status: {}", status);
    } else if status.is_client_error() {
        warn!(%method, %uri, "Rejected request - Status: {}", status);
    }
    response
}
