use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use crate::cache::keys::QueueKeys;
use crate::dispatch::job::RideMatchJob;
use crate::error::AppResult;
use crate::queue::{ClaimedJob, JobQueue};
use crate::utils::now_millis;

/// 匹配任务队列名
pub const RIDE_MATCH_QUEUE: &str = "ride-matching";

/// 领取脚本：先把租约过期的任务放回延时集合（已有同键新任务时丢弃），
/// 再取出一个到期任务并登记租约。
///
/// KEYS: delayed, payloads, processing, processing-payloads
/// ARGV: 当前毫秒时间, 租约毫秒数
const CLAIM_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local lease = tonumber(ARGV[2])

local stale = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', now)
for _, id in ipairs(stale) do
    redis.call('ZREM', KEYS[3], id)
    local body = redis.call('HGET', KEYS[4], id)
    redis.call('HDEL', KEYS[4], id)
    if body and not redis.call('ZSCORE', KEYS[1], id) then
        redis.call('HSET', KEYS[2], id, body)
        redis.call('ZADD', KEYS[1], now, id)
    end
end

local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now, 'LIMIT', 0, 1)
if #due == 0 then
    return false
end

local id = due[1]
redis.call('ZREM', KEYS[1], id)
local body = redis.call('HGET', KEYS[2], id)
redis.call('HDEL', KEYS[2], id)
if not body then
    return false
end

redis.call('ZADD', KEYS[3], now + lease, id)
redis.call('HSET', KEYS[4], id, body)
return {id, body}
"#;

/// 基于 Redis 有序集合的延时任务队列
///
/// 同一行程的任务共用一个键，调度时负载和到期时间在同一事务中覆盖，
/// 因此任意时刻每个行程至多一个待执行任务。领取后任务带租约，
/// 消费者崩溃时租约过期会重新投递（至少一次）。
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    keys: QueueKeys,
    lease: Duration,
    claim: redis::Script,
}

impl RedisJobQueue {
    pub fn new(conn: MultiplexedConnection, queue: &str, lease: Duration) -> Self {
        Self {
            conn,
            keys: QueueKeys::new(queue),
            lease,
            claim: redis::Script::new(CLAIM_SCRIPT),
        }
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn schedule(&self, job: &RideMatchJob, delay: Duration) -> AppResult<bool> {
        let mut conn = self.conn();
        let key = job.job_key();
        let payload = serde_json::to_string(job)?;
        let due = now_millis() + delay.as_millis() as i64;

        // ZADD 对已存在成员只更新分数，返回 0 表示取代了旧任务
        let (added,): (i64,) = redis::pipe()
            .atomic()
            .hset(&self.keys.payloads, &key, payload)
            .ignore()
            .zadd(&self.keys.delayed, &key, due)
            .query_async(&mut conn)
            .await?;

        if added == 0 {
            tracing::debug!(job_key = %key, "superseded pending job");
        }
        Ok(added == 0)
    }

    async fn cancel(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.conn();
        let (removed,): (i64,) = redis::pipe()
            .atomic()
            .zrem(&self.keys.delayed, key)
            .hdel(&self.keys.payloads, key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn pop_due(&self) -> AppResult<Option<ClaimedJob>> {
        let mut conn = self.conn();
        let claimed: Option<(String, String)> = self
            .claim
            .key(&self.keys.delayed)
            .key(&self.keys.payloads)
            .key(&self.keys.processing)
            .key(&self.keys.processing_payloads)
            .arg(now_millis())
            .arg(self.lease.as_millis() as i64)
            .invoke_async(&mut conn)
            .await?;

        let Some((key, payload)) = claimed else {
            return Ok(None);
        };

        match serde_json::from_str::<RideMatchJob>(&payload) {
            Ok(job) => Ok(Some(ClaimedJob { key, job })),
            Err(e) => {
                // 无法解析的任务不会变得可解析，直接丢弃
                tracing::error!(job_key = %key, "Dropping undecodable job: {}", e);
                self.ack(&key).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn();
        let _: () = redis::pipe()
            .atomic()
            .zrem(&self.keys.processing, key)
            .ignore()
            .hdel(&self.keys.processing_payloads, key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_pending(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.conn();
        let score: Option<f64> = conn.zscore(&self.keys.delayed, key).await?;
        Ok(score.is_some())
    }
}
