//! Worker 池 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责组装依赖和管理 worker 的生命周期。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：创建存储、会话表、HTTP 执行器、通知发送器
//! 2. **并发控制**：启动 `worker_count` 个独立的 worker 循环
//! 3. **退避**：没有到期用户时等待 `idle_backoff`，存储出错时等待 `error_backoff`
//! 4. **故障隔离**：单个用户的失败只记录日志，worker 继续运行
//! 5. **优雅退出**：Ctrl-C 触发取消，等待所有 worker 结束
//! 6. **全局统计**：汇总同步和通知次数

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{SchedulerError, SyncError};
use crate::infrastructure::{HttpExecutor, JsonFileStore, UserRecordStore};
use crate::scheduler::LeaseScheduler;
use crate::services::{
    FileDispatcher, HttpMarkupFetcher, LogDispatcher, MarkupFetcher, NotificationDispatcher,
    SessionProvider, StaticSessionProvider, SubscriptionService, WebhookDispatcher,
};
use crate::utils::logging::{log_startup, print_final_stats};
use crate::workflow::{SyncCtx, SyncFlow};

/// 运行统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// 完成的同步轮数
    pub cycles: usize,
    /// 失败的同步轮数
    pub failed: usize,
    /// 发送成功的通知数
    pub notified: usize,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicUsize,
    failed: AtomicUsize,
    notified: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> RunStats {
        RunStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            notified: self.notified.load(Ordering::Relaxed),
        }
    }
}

/// 应用主结构
pub struct App {
    config: Config,
    scheduler: LeaseScheduler,
    flow: Arc<SyncFlow>,
    sessions: Arc<dyn SessionProvider>,
    subscriptions: SubscriptionService,
    cancel: CancellationToken,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let store = JsonFileStore::open(&config.data_dir)
            .await
            .with_context(|| format!("无法打开数据目录: {}", config.data_dir))?;

        let sessions_path = Path::new(&config.sessions_file);
        let sessions = if sessions_path.exists() {
            StaticSessionProvider::from_toml_file(sessions_path).await?
        } else {
            warn!("⚠️ 会话文件 {} 不存在，所有用户都没有会话", config.sessions_file);
            StaticSessionProvider::default()
        };

        let executor = HttpExecutor::new(&config.base_url, config.fetch_timeout())
            .context("无法创建 HTTP 客户端")?;
        info!("🌐 成绩门户: {}", executor.base_url());

        let dispatcher: Arc<dyn NotificationDispatcher> = match (
            &config.webhook_url,
            &config.notifications_file,
        ) {
            (Some(url), _) => {
                info!("📬 通知方式: webhook {}", url);
                let client = reqwest::Client::builder()
                    .timeout(config.fetch_timeout())
                    .build()
                    .context("无法创建 webhook 客户端")?;
                Arc::new(WebhookDispatcher::new(client, url))
            }
            (None, Some(path)) => {
                info!("📬 通知方式: 写入文件 {}", path);
                Arc::new(FileDispatcher::new(path))
            }
            (None, None) => {
                info!("📬 通知方式: 仅日志");
                Arc::new(LogDispatcher)
            }
        };

        Ok(Self::from_parts(
            config,
            Arc::new(store),
            Arc::new(sessions),
            Arc::new(HttpMarkupFetcher::new(executor)),
            dispatcher,
        ))
    }

    /// 用现成的依赖组装应用
    pub fn from_parts(
        config: Config,
        store: Arc<dyn UserRecordStore>,
        sessions: Arc<dyn SessionProvider>,
        fetcher: Arc<dyn MarkupFetcher>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let scheduler = LeaseScheduler::new(store.clone(), config.lease_duration());
        let flow = Arc::new(SyncFlow::new(
            sessions.clone(),
            fetcher.clone(),
            dispatcher.clone(),
            store.clone(),
            config.fetch_timeout(),
        ));
        let subscriptions = SubscriptionService::new(sessions.clone(), fetcher, dispatcher, store);

        Self {
            config,
            scheduler,
            flow,
            sessions,
            subscriptions,
            cancel: CancellationToken::new(),
        }
    }

    pub fn subscriptions(&self) -> &SubscriptionService {
        &self.subscriptions
    }

    /// 取消后所有 worker 在当前步骤结束后退出
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 运行直到 Ctrl-C
    pub async fn run(&self) -> Result<RunStats> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("\n🛑 收到退出信号，等待 worker 结束...");
                cancel.cancel();
            }
        });

        let stats = self.run_until_cancelled().await?;
        print_final_stats(stats.cycles, stats.failed, stats.notified);
        Ok(stats)
    }

    /// 启动所有 worker，直到取消令牌被触发
    pub async fn run_until_cancelled(&self) -> Result<RunStats> {
        let counters = Arc::new(Counters::default());
        let mut handles = Vec::with_capacity(self.config.worker_count);

        info!("👷 启动 {} 个 worker", self.config.worker_count);

        for index in 1..=self.config.worker_count {
            let worker = Worker {
                index,
                scheduler: self.scheduler.clone(),
                flow: self.flow.clone(),
                sessions: self.sessions.clone(),
                cancel: self.cancel.clone(),
                idle_backoff: self.config.idle_backoff(),
                error_backoff: self.config.error_backoff(),
                counters: counters.clone(),
            };
            handles.push((index, tokio::spawn(worker.run())));
        }

        for (index, handle) in handles {
            if let Err(e) = handle.await {
                error!("[worker#{}] 任务执行失败: {}", index, e);
            }
        }

        Ok(counters.snapshot())
    }
}

/// 一轮同步失败后 worker 的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureAction {
    /// 会话过期：作废会话，等待重新认证
    Reauthenticate,
    /// 存储或网络故障：先退避再取下一个租约
    Backoff,
    /// 不可重试：记录后直接继续
    Continue,
}

fn failure_action(err: &SyncError) -> FailureAction {
    if err.is_session_expired() {
        FailureAction::Reauthenticate
    } else if err.is_retryable() {
        FailureAction::Backoff
    } else {
        FailureAction::Continue
    }
}

struct Worker {
    index: usize,
    scheduler: LeaseScheduler,
    flow: Arc<SyncFlow>,
    sessions: Arc<dyn SessionProvider>,
    cancel: CancellationToken,
    idle_backoff: Duration,
    error_backoff: Duration,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self) {
        debug!("[worker#{}] 启动", self.index);

        while !self.cancel.is_cancelled() {
            let now = Utc::now();
            let lease = match self.scheduler.acquire_lease(now).await {
                Ok(lease) => lease,
                Err(e) if e.is_idle() => {
                    debug!("[worker#{}] {}", self.index, e);
                    if !self.pause(self.idle_backoff).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!(
                        "[worker#{}] ❌ 获取租约失败 (可重试: {}): {}",
                        self.index,
                        matches!(e, SchedulerError::Store(ref s) if s.is_retryable()),
                        e
                    );
                    if !self.pause(self.error_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            let ctx = SyncCtx::new(lease.user_id.clone(), self.index, lease.acquired_at);
            match self.flow.run(&ctx, &lease, &self.cancel).await {
                Ok(report) => {
                    self.counters.cycles.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .notified
                        .fetch_add(report.notified, Ordering::Relaxed);
                    if !report.is_clean() {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(SyncError::Cancelled) => break,
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    match failure_action(&e) {
                        FailureAction::Reauthenticate => {
                            warn!("{} ⚠️ {}", ctx, e);
                            self.sessions.invalidate(&ctx.user_id).await;
                        }
                        FailureAction::Backoff => {
                            warn!(
                                "{} ⚠️ 同步失败，{} 秒后继续: {}",
                                ctx,
                                self.error_backoff.as_secs(),
                                e
                            );
                            if !self.pause(self.error_backoff).await {
                                break;
                            }
                        }
                        FailureAction::Continue => {
                            error!("{} ❌ 同步失败: {}", ctx, e);
                        }
                    }
                }
            }
        }

        debug!("[worker#{}] 退出", self.index);
    }

    /// 等待一段时间，被取消时返回 false
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
