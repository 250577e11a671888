//! 同步上下文
//!
//! 封装"哪个 worker 正在为哪个用户同步"这一信息

use chrono::{DateTime, Utc};
use std::fmt::Display;

use crate::models::UserId;

/// 同步上下文
#[derive(Debug, Clone)]
pub struct SyncCtx {
    /// 用户 ID
    pub user_id: UserId,

    /// worker 编号（仅用于日志显示）
    pub worker_index: usize,

    /// 租约获取时间
    pub started_at: DateTime<Utc>,
}

impl SyncCtx {
    pub fn new(user_id: UserId, worker_index: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            worker_index,
            started_at,
        }
    }
}

impl Display for SyncCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[用户 {} worker#{}]", self.user_id, self.worker_index)
    }
}
