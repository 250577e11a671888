//! # Marks Sync
//!
//! 定期抓取教务网站的成绩页面，发现新成绩时通知用户
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `HttpExecutor` - 唯一的 HTTP 客户端，带会话 cookie 取页面
//! - `UserRecordStore` - 用户记录存储（内存 / JSON 文件）
//!
//! ### ② 解析与模型（Parser / Models）
//! - `parser/` - 把成绩页面解析成 `路径 -> 成绩`
//! - `models/` - 成绩三态、课程快照、用户记录
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `SessionProvider` / `MarkupFetcher` / `NotificationDispatcher` - 外部能力
//! - `diff` - 比较前后两次快照
//! - `SubscriptionService` - 注册、订阅、取消订阅
//!
//! ### ④ 调度与流程层（Scheduler / Workflow）
//! - `scheduler/` - 租约：保证同一用户同一时间只被一个 worker 处理
//! - `workflow/` - 定义"一个用户的一轮检查"
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/` - 组装依赖，管理 worker 池
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod scheduler;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{ParseError, SchedulerError, StoreError, SyncError};
pub use models::{Class, ClassHeader, Score, ScorePath, User, UserId};
pub use orchestrator::{App, RunStats};
pub use scheduler::{LeaseOutcome, LeaseScheduler};
pub use workflow::{SyncCtx, SyncFlow, SyncReport};
