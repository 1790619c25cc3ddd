use std::sync::Arc;

use ride_dispatch::{
    cache::RedisPresenceStore,
    config::Config,
    database::PgBusinessStore,
    dispatch::{DispatchContext, InactivitySweeper, MatchWorker},
    logging,
    queue::{RIDE_MATCH_QUEUE, RedisJobQueue},
    services::ExpoPushGateway,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() {
    // 初始化日志
    logging::init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");
    let database_url = config
        .database_url
        .clone()
        .expect("DATABASE_URL is required for the dispatch worker");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'dispatch_worker';")
                    .await?;
                Ok(())
            })
        })
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 设置 Redis 客户端
    let redis_client = Arc::new(
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client"),
    );
    let store = Arc::new(
        RedisPresenceStore::connect(redis_client.clone(), config.presence_ttl())
            .await
            .expect("Failed to connect to Redis"),
    );
    let queue_conn = redis_client
        .get_multiplexed_async_connection()
        .await
        .expect("Failed to connect to Redis");
    let queue = Arc::new(RedisJobQueue::new(
        queue_conn,
        RIDE_MATCH_QUEUE,
        config.job_lease(),
    ));

    let push = Arc::new(
        ExpoPushGateway::new(config.push_api_url.clone(), config.push_timeout())
            .expect("Failed to build push client"),
    );

    let ctx = DispatchContext::new(
        store.clone(),
        store,
        Arc::new(PgBusinessStore::new(pool)),
        push,
        queue,
    );

    // 停用巡检
    tokio::spawn(InactivitySweeper::new(ctx.clone()).run());

    MatchWorker::new(ctx, config.queue_poll_interval()).run().await;
}
