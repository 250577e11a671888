//! 会话服务 - 业务能力层
//!
//! 登录和凭证保存由外部服务负责，这里只定义取会话的接口

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::{SessionToken, UserId};

/// 会话提供者
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// 获取用户当前的会话
    async fn get_session(&self, user_id: &UserId) -> SyncResult<SessionToken>;

    /// 会话已过期，下次获取前需要重新认证
    async fn invalidate(&self, user_id: &UserId);
}

/// 静态会话表
///
/// 从 TOML 文件读取 `user_id = "PHPSESSID"`，适合开发和单机部署。
/// 失效的会话会被移除，直到文件被重新加载。
#[derive(Default)]
pub struct StaticSessionProvider {
    sessions: RwLock<HashMap<UserId, String>>,
}

impl StaticSessionProvider {
    pub fn new(sessions: HashMap<UserId, String>) -> Self {
        Self {
            sessions: RwLock::new(sessions),
        }
    }

    /// 从 TOML 文件加载
    pub async fn from_toml_file(path: &Path) -> Result<Self> {
        let sessions = Self::read_file(path).await?;
        info!("✓ 已加载 {} 个会话", sessions.len());
        Ok(Self::new(sessions))
    }

    /// 重新加载文件，覆盖内存中的会话表
    pub async fn reload(&self, path: &Path) -> Result<usize> {
        let sessions = Self::read_file(path).await?;
        let count = sessions.len();
        *self.sessions.write().await = sessions;
        Ok(count)
    }

    async fn read_file(path: &Path) -> Result<HashMap<UserId, String>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("无法读取会话文件: {}", path.display()))?;
        let table: HashMap<String, String> = toml::from_str(&content)
            .with_context(|| format!("无法解析会话文件: {}", path.display()))?;

        Ok(table
            .into_iter()
            .map(|(user, session)| (UserId::new(user), session))
            .collect())
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn get_session(&self, user_id: &UserId) -> SyncResult<SessionToken> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(|value| SessionToken::new(user_id.clone(), value.clone()))
            .ok_or_else(|| SyncError::UnknownSession {
                user_id: user_id.clone(),
            })
    }

    async fn invalidate(&self, user_id: &UserId) {
        if self.sessions.write().await.remove(user_id).is_some() {
            warn!("[用户 {}] 会话已失效，等待重新认证", user_id);
        }
    }
}
