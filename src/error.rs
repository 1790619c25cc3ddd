use thiserror::Error;

/// 调度子系统的统一错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 共享存储（Redis）不可用或命令失败，属于瞬时错误
    #[error("shared store error: {0}")]
    Store(#[from] redis::RedisError),

    /// 业务数据库查询失败
    #[error("business store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode or decode payload: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("push gateway request failed: {0}")]
    Push(#[from] reqwest::Error),

    #[error("push gateway rejected notification with status {status}")]
    PushRejected { status: u16 },

    #[error("'{0}' is not a valid Expo push token")]
    InvalidPushToken(String),

    /// 客户端负载校验失败
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// 存储中的记录无法解析
    #[error("record '{key}' is malformed: {message}")]
    MalformedRecord { key: String, message: String },
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            message: message.into(),
        }
    }

    /// 是否为基础设施瞬时错误（下一次客户端更新或下一轮任务即为重试路径）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Store(_) | AppError::Database(_) | AppError::Push(_)
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
