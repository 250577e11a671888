//! 页面获取服务 - 业务能力层
//!
//! 只负责"拿到 HTML"，不解析

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::infrastructure::HttpExecutor;
use crate::models::SessionToken;

/// 首页（课程列表）
pub const CLASS_LIST_PATH: &str = "/kontroler.php?_action=home/index";

/// 某门课的成绩页
pub fn scores_path(class_id: &str) -> String {
    format!(
        "/kontroler.php?_action=dla_stud/studia/sprawdziany/pokaz&wez_id={}",
        class_id
    )
}

/// 页面获取
#[async_trait]
pub trait MarkupFetcher: Send + Sync {
    /// 课程列表页面
    async fn fetch_class_list(&self, session: &SessionToken) -> SyncResult<String>;

    /// 某门课的成绩页面
    async fn fetch_scores(&self, session: &SessionToken, class_id: &str) -> SyncResult<String>;
}

/// 基于 HTTP 的页面获取
pub struct HttpMarkupFetcher {
    executor: HttpExecutor,
}

impl HttpMarkupFetcher {
    pub fn new(executor: HttpExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl MarkupFetcher for HttpMarkupFetcher {
    async fn fetch_class_list(&self, session: &SessionToken) -> SyncResult<String> {
        self.executor.get_html(CLASS_LIST_PATH, session).await
    }

    async fn fetch_scores(&self, session: &SessionToken, class_id: &str) -> SyncResult<String> {
        self.executor.get_html(&scores_path(class_id), session).await
    }
}
