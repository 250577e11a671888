use std::fmt;

use super::UserId;

/// 已认证的会话（USOSweb 的 PHPSESSID）
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    user_id: UserId,
    value: String,
}

impl SessionToken {
    pub fn new(user_id: UserId, value: impl Into<String>) -> Self {
        Self {
            user_id,
            value: value.into(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

// 不把会话值打到日志里
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("user_id", &self.user_id)
            .field("value", &"***")
            .finish()
    }
}
