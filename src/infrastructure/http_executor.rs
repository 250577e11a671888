//! HTTP 执行器 - 基础设施层
//!
//! 持有唯一的 HTTP 客户端，只暴露"带会话取页面"的能力

use reqwest::header::COOKIE;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::models::SessionToken;

/// 会话 cookie 名称
pub const SESSION_COOKIE: &str = "PHPSESSID";

/// HTTP 执行器
///
/// 职责：
/// - 持有 `reqwest::Client` 和站点根地址
/// - 把会话放进 cookie
/// - 把状态码翻译成 `SyncError`（403 表示会话过期）
/// - 不认识课程 / 成绩
#[derive(Clone)]
pub struct HttpExecutor {
    client: Client,
    base_url: String,
}

impl HttpExecutor {
    /// 创建新的 HTTP 执行器
    ///
    /// # 参数
    /// - `base_url`: 站点根地址，例如 `https://usosweb.mimuw.edu.pl`
    /// - `timeout`: 单次请求超时
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::request_failed("client", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 带会话获取页面 HTML
    ///
    /// # 参数
    /// - `path`: 以 `/` 开头的路径
    /// - `session`: 用户会话
    pub async fn get_html(&self, path: &str, session: &SessionToken) -> SyncResult<String> {
        let url = format!("{}{}", self.base_url, path);
        debug!("[用户 {}] GET {}", session.user_id(), path);

        let response = self
            .client
            .get(&url)
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, session.value()))
            .send()
            .await
            .map_err(|e| map_request_error(path, e))?;

        match response.status() {
            StatusCode::OK => response.text().await.map_err(|e| map_request_error(path, e)),
            StatusCode::FORBIDDEN => Err(SyncError::SessionExpired {
                user_id: session.user_id().clone(),
            }),
            status => Err(SyncError::Http {
                endpoint: path.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

fn map_request_error(endpoint: &str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::timeout(endpoint)
    } else {
        SyncError::request_failed(endpoint, err)
    }
}
