use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化日志：`RUST_LOG` 过滤，默认 info
pub fn init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
