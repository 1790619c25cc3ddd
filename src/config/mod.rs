use std::env;
use std::time::Duration;

/// Expo 推送网关默认地址
pub const DEFAULT_PUSH_API_URL: &str = "https://exp.host/--/api/v2/push/send";

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub redis_url: String,
    pub database_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    pub presence_ttl_secs: u64,
    pub push_api_url: String,
    pub push_timeout_secs: u64,
    pub queue_poll_interval_ms: u64,
    pub job_lease_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| env::var(key))
    }

    /// 从任意键值来源构建配置，`from_env` 和测试共用
    pub fn from_vars<F>(lookup: F) -> Result<Self, env::VarError>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let number = |key: &str, default: u64| {
            lookup(key)
                .ok()
                .and_then(|v| v.trim_end_matches('s').parse::<u64>().ok())
                .unwrap_or(default)
        };

        Ok(Config {
            redis_url: lookup("REDIS_URL")?,
            database_url: lookup("DATABASE_URL").ok(),
            server_host: lookup("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            server_port: lookup("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3001),
            presence_ttl_secs: number("PRESENCE_TTL", 120),
            push_api_url: lookup("PUSH_API_URL").unwrap_or_else(|_| DEFAULT_PUSH_API_URL.into()),
            push_timeout_secs: number("PUSH_TIMEOUT", 5),
            queue_poll_interval_ms: number("QUEUE_POLL_INTERVAL_MS", 500),
            job_lease_secs: number("JOB_LEASE", 120),
        })
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    /// 连接心跳间隔，取存活 TTL 的一半
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs((self.presence_ttl_secs / 2).max(1))
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    pub fn job_lease(&self) -> Duration {
        Duration::from_secs(self.job_lease_secs)
    }
}
