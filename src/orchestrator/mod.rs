//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责组装依赖和调度 worker，是整个系统的"指挥中心"。
//!
//! ## 层次关系
//!
//! ```text
//! worker_pool (N 个 worker 循环)
//!     ↓
//! scheduler::LeaseScheduler (挑出一个到期用户)
//!     ↓
//! workflow::SyncFlow (处理一个用户的一轮检查)
//!     ↓
//! services (能力层：session / fetch / diff / notify)
//!     ↓
//! infrastructure (基础设施：HttpExecutor / UserRecordStore)
//! ```
//!
//! ## 设计原则
//!
//! 1. **资源隔离**：只有编排层创建 HTTP 客户端和存储
//! 2. **向下依赖**：编排层 → workflow → services → infrastructure
//! 3. **无业务逻辑**：只做调度和统计

pub mod worker_pool;

pub use worker_pool::{App, RunStats};
