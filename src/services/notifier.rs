//! 通知服务 - 业务能力层
//!
//! 只负责"把一段文本发给用户"，不关心内容怎么来的

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::models::UserId;

/// 通知发送
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, user_id: &UserId, text: &str) -> SyncResult<()>;
}

/// 只写日志
#[derive(Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn notify(&self, user_id: &UserId, text: &str) -> SyncResult<()> {
        info!("[用户 {}] 📬 通知:\n{}", user_id, text);
        Ok(())
    }
}

/// 写入本地文件的通知
///
/// 每条通知追加一段，适合没有聊天前端时使用
pub struct FileDispatcher {
    path: PathBuf,
}

impl FileDispatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl NotificationDispatcher for FileDispatcher {
    async fn notify(&self, user_id: &UserId, text: &str) -> SyncResult<()> {
        debug!("[用户 {}] 写入通知，长度: {}", user_id, text.len());

        let entry = format!(
            "[{}] {}\n{}\n\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            user_id,
            text
        );

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SyncError::Notify {
                reason: format!("无法打开 {}: {}", self.path.display(), e),
            })?;
        file.write_all(entry.as_bytes())
            .await
            .map_err(|e| SyncError::Notify {
                reason: format!("无法写入 {}: {}", self.path.display(), e),
            })?;
        // tokio 的文件写入在后台完成，flush 之后才算送达
        file.flush().await.map_err(|e| SyncError::Notify {
            reason: format!("无法写入 {}: {}", self.path.display(), e),
        })?;

        Ok(())
    }
}

/// 发往聊天前端的事件
#[derive(Debug, Serialize)]
struct SendNotificationEvent<'a> {
    user_id: &'a UserId,
    message: &'a str,
}

/// 通过 webhook 发送通知
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn notify(&self, user_id: &UserId, text: &str) -> SyncResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&SendNotificationEvent {
                user_id,
                message: text,
            })
            .send()
            .await
            .map_err(|e| SyncError::request_failed(&self.url, e))?;

        if !response.status().is_success() {
            return Err(SyncError::Notify {
                reason: format!("webhook 返回 {}", response.status()),
            });
        }
        Ok(())
    }
}
