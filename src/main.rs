use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ride_dispatch::{
    AppState,
    cache::RedisPresenceStore,
    config::Config,
    logging,
    router::create_router,
    socket::{ConnectionRegistry, Relay},
};

/// 中继订阅断开后的重连间隔
const RELAY_RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    // 初始化日志
    logging::init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let store = Arc::new(
        RedisPresenceStore::connect(Arc::new(redis_client), config.presence_ttl())
            .await
            .expect("Failed to connect to Redis"),
    );

    // 设置应用状态
    let state = AppState {
        config: config.clone(),
        presence: store.clone(),
        bus: store,
        connections: Arc::new(ConnectionRegistry::new()),
    };

    // 跨进程中继
    let relay = Relay::new(
        state.presence.clone(),
        state.bus.clone(),
        state.connections.clone(),
    );
    tokio::spawn(async move {
        loop {
            match relay.run().await {
                Ok(()) => tracing::warn!("Relay subscription ended, resubscribing"),
                Err(e) => tracing::error!("Relay subscription failed: {}", e),
            }
            tokio::time::sleep(RELAY_RECONNECT_DELAY).await;
        }
    });

    let app = create_router(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
