//! 同步流程 - 流程层
//!
//! 核心职责：定义"一个用户的一轮检查"的完整流程
//!
//! 流程顺序：
//! 1. 获取会话
//! 2. 并发抓取并解析所有已订阅课程
//! 3. 与上一轮快照比较
//! 4. 逐门课程发送通知
//! 5. 持久化新快照（先通知后持久化，宁可重复通知也不漏发）

use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::infrastructure::UserRecordStore;
use crate::models::{Class, ClassHeader, SessionToken, User};
use crate::parser::parse_scores_page;
use crate::scheduler::Lease;
use crate::services::{
    diff, render_notification, MarkupFetcher, NotificationDispatcher, SessionProvider,
};
use crate::utils::truncate_text;
use crate::workflow::sync_ctx::SyncCtx;

/// 一轮同步的结果
#[derive(Debug, Default)]
pub struct SyncReport {
    /// 成功刷新的课程数
    pub classes_refreshed: usize,
    /// 有变化的成绩项总数
    pub changes: usize,
    /// 成功发送的通知数
    pub notified: usize,
    /// 发送失败的通知数
    pub notify_failures: usize,
    /// 抓取或解析失败的课程，保留旧快照
    pub failures: Vec<(ClassHeader, SyncError)>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.notify_failures == 0
    }
}

/// 同步流程
///
/// - 编排一轮检查
/// - 不持有稀缺资源，只依赖业务能力
pub struct SyncFlow {
    sessions: Arc<dyn SessionProvider>,
    fetcher: Arc<dyn MarkupFetcher>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    store: Arc<dyn UserRecordStore>,
    fetch_timeout: Duration,
}

impl SyncFlow {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        fetcher: Arc<dyn MarkupFetcher>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        store: Arc<dyn UserRecordStore>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            fetcher,
            dispatcher,
            store,
            fetch_timeout,
        }
    }

    pub async fn run(
        &self,
        ctx: &SyncCtx,
        lease: &Lease,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let previous = &lease.user;
        let mut report = SyncReport::default();

        if previous.observed_classes.is_empty() {
            debug!("{} 没有订阅任何课程，跳过", ctx);
            return Ok(report);
        }

        // ========== 1. 获取会话 ==========
        let session = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            session = self.bounded("获取会话", self.sessions.get_session(&ctx.user_id)) => session?,
        };

        // ========== 2. 并发抓取 ==========
        info!(
            "{} 🔍 检查 {} 门课程...",
            ctx,
            previous.observed_classes.len()
        );

        let session = &session;
        let fetches = previous
            .observed_classes
            .iter()
            .map(|header| async move { (header, self.fetch_class(session, header).await) });

        let results = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("{} ⚠️ 抓取过程中被取消", ctx);
                return Err(SyncError::Cancelled);
            }
            results = join_all(fetches) => results,
        };

        let mut fresh: BTreeMap<String, Class> = BTreeMap::new();
        for (header, result) in results {
            match result {
                Ok(class) => {
                    fresh.insert(header.id.clone(), class);
                }
                Err(e) if e.is_session_expired() => {
                    error!("{} ❌ 会话已过期，终止本轮", ctx);
                    return Err(e);
                }
                Err(e) => {
                    warn!("{} ⚠️ 课程 {} ({}) 刷新失败: {}", ctx, header.name, header.id, e);
                    report.failures.push((header.clone(), e));
                }
            }
        }
        report.classes_refreshed = fresh.len();

        // ========== 3. 比较 ==========
        let next = assemble_snapshot(previous, &fresh);
        let changes = diff(&previous.classes, &next.classes);
        report.changes = changes.values().map(Vec::len).sum();

        if changes.is_empty() {
            debug!("{} 没有新成绩", ctx);
        }

        // ========== 4. 通知 ==========
        for (class_name, class_changes) in &changes {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let text = render_notification(class_name, class_changes);
            debug!("{} 通知内容: {}", ctx, truncate_text(&text, 120));
            match self
                .bounded("发送通知", self.dispatcher.notify(&ctx.user_id, &text))
                .await
            {
                Ok(()) => {
                    info!("{} 📬 {}: {} 项新成绩", ctx, class_name, class_changes.len());
                    report.notified += 1;
                }
                Err(e) => {
                    error!("{} ❌ 通知发送失败 ({}): {}", ctx, class_name, e);
                    report.notify_failures += 1;
                }
            }
        }

        // ========== 5. 持久化 ==========
        if cancel.is_cancelled() {
            warn!("{} ⚠️ 持久化前被取消，保留旧快照", ctx);
            return Err(SyncError::Cancelled);
        }
        self.persist(ctx, &fresh).await?;

        info!(
            "{} ✅ 完成: 刷新 {} 门，变化 {} 项，失败 {} 门",
            ctx,
            report.classes_refreshed,
            report.changes,
            report.failures.len()
        );

        Ok(report)
    }

    async fn fetch_class(&self, session: &SessionToken, header: &ClassHeader) -> SyncResult<Class> {
        let html = self
            .bounded(
                &format!("获取课程 {} 成绩", header.id),
                self.fetcher.fetch_scores(session, &header.id),
            )
            .await?;
        let scores = parse_scores_page(&html).map_err(|e| SyncError::parse(&header.id, e))?;
        Ok(Class::new(header, scores))
    }

    /// 在事务里写回新快照
    ///
    /// 以事务内读到的记录为准：本轮期间用户可能增删了订阅
    async fn persist(&self, ctx: &SyncCtx, fresh: &BTreeMap<String, Class>) -> SyncResult<()> {
        let mut tx = self.store.begin(&ctx.user_id).await?;
        let current = tx.read().await?;
        let next = assemble_snapshot(&current, fresh);
        tx.write(next);
        tx.commit().await?;
        Ok(())
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        match tokio::time::timeout(self.fetch_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::timeout(operation)),
        }
    }
}

/// 用新抓到的快照替换旧快照，抓取失败的课程沿用旧快照
fn assemble_snapshot(base: &User, fresh: &BTreeMap<String, Class>) -> User {
    let mut classes: Vec<Class> = base
        .observed_classes
        .iter()
        .filter_map(|header| {
            fresh
                .get(&header.id)
                .or_else(|| base.class(&header.id))
                .cloned()
        })
        .collect();
    classes.sort_by(|a, b| a.id.cmp(&b.id));
    base.with_classes(classes)
}
