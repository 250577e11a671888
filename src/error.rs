use thiserror::Error;

use crate::models::UserId;

/// 解析错误
///
/// 全部不可重试：今天格式错误的页面明天依然会格式错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// 节点结构不符合预期
    #[error("页面结构异常: {reason}")]
    MalformedTree { reason: String },

    /// 分类标记前没有名称节点
    #[error("分类标记缺少名称 (前缀: \"{prefix}\")")]
    MissingCategoryName { prefix: String },

    /// 分类名称节点中强调元素数量不为 1
    #[error("分类名称不明确 (前缀: \"{prefix}\"): 找到 {found} 个强调元素，期望 1 个")]
    AmbiguousCategoryLabel { prefix: String, found: usize },

    /// 同一路径出现两次
    #[error("成绩名称重复: {path}")]
    DuplicateScoreName { path: String },

    /// 成绩文本无法解析
    #[error("无法解析成绩值: \"{text}\"")]
    InvalidScoreValue { text: String },
}

impl ParseError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ParseError::MalformedTree {
            reason: reason.into(),
        }
    }
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 用户记录不存在
    #[error("用户不存在: {user_id}")]
    NotFound { user_id: UserId },

    /// 读写失败
    #[error("存储读写失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 序列化失败
    #[error("用户记录编解码失败: {source}")]
    Codec {
        #[source]
        source: serde_json::Error,
    },

    /// 事务已经提交或回滚
    #[error("事务已关闭")]
    TransactionClosed,
}

impl StoreError {
    /// 是否值得稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec { source: err }
    }
}

/// 调度错误
///
/// `NoUserDue` 和 `LeaseLost` 属于正常的控制流，不是故障
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("当前没有需要检查的用户")]
    NoUserDue,

    #[error("租约被其他 worker 抢先续期: {user_id}")]
    LeaseLost { user_id: UserId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerError {
    /// 调用方应当退避而不是报错
    pub fn is_idle(&self) -> bool {
        matches!(self, SchedulerError::NoUserDue | SchedulerError::LeaseLost { .. })
    }
}

/// 同步周期错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 会话过期，必须重新认证，本周期内不重试
    #[error("会话已过期: {user_id}")]
    SessionExpired { user_id: UserId },

    /// 没有可用的会话
    #[error("找不到用户的会话: {user_id}")]
    UnknownSession { user_id: UserId },

    /// 页面解析失败
    #[error("课程 {class_id} 解析失败: {source}")]
    Parse {
        class_id: String,
        #[source]
        source: ParseError,
    },

    /// 非 200 响应
    #[error("HTTP 状态异常 ({endpoint}): {status}")]
    Http { endpoint: String, status: u16 },

    /// 网络请求失败
    #[error("请求失败 ({endpoint}): {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// 外部调用超时
    #[error("操作超时: {operation}")]
    Timeout { operation: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// 通知发送失败
    #[error("通知发送失败: {reason}")]
    Notify { reason: String },

    /// 周期被取消
    #[error("同步周期已取消")]
    Cancelled,
}

impl SyncError {
    /// 是否值得在下一个周期重试
    ///
    /// 解析错误和会话过期重试无意义：前者是页面问题，后者需要先重新认证
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Parse { .. }
            | SyncError::SessionExpired { .. }
            | SyncError::UnknownSession { .. }
            | SyncError::Cancelled => false,
            SyncError::Store(e) => e.is_retryable(),
            SyncError::Http { status, .. } => *status >= 500,
            SyncError::Request { .. } | SyncError::Timeout { .. } | SyncError::Notify { .. } => {
                true
            }
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, SyncError::SessionExpired { .. })
    }
}

// ========== 便捷构造函数 ==========

impl SyncError {
    /// 创建解析错误
    pub fn parse(class_id: impl Into<String>, source: ParseError) -> Self {
        SyncError::Parse {
            class_id: class_id.into(),
            source,
        }
    }

    /// 创建超时错误
    pub fn timeout(operation: impl Into<String>) -> Self {
        SyncError::Timeout {
            operation: operation.into(),
        }
    }

    /// 创建请求失败错误
    pub fn request_failed(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        SyncError::Request {
            endpoint: endpoint.into(),
            source,
        }
    }
}

// ========== Result 类型别名 ==========

pub type ParseResult<T> = Result<T, ParseError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let user_id = UserId::new("u1");
        assert!(!SyncError::SessionExpired { user_id }.is_retryable());
        assert!(!SyncError::parse("1", ParseError::malformed("x")).is_retryable());
        assert!(SyncError::timeout("fetch").is_retryable());
        assert!(SyncError::Http {
            endpoint: "/".into(),
            status: 503
        }
        .is_retryable());
        assert!(!SyncError::Http {
            endpoint: "/".into(),
            status: 404
        }
        .is_retryable());
    }

    #[test]
    fn test_scheduler_idle_outcomes() {
        assert!(SchedulerError::NoUserDue.is_idle());
        assert!(SchedulerError::LeaseLost {
            user_id: UserId::new("u1")
        }
        .is_idle());
        assert!(!SchedulerError::Store(StoreError::TransactionClosed).is_idle());
    }
}
