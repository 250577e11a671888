//! 用户记录存储
//!
//! 存储只提供两种能力：
//! - 非事务的范围查询（可能读到过期数据）
//! - 单条记录的事务（读 → 改 → 提交）
//!
//! 租约的正确性完全依赖后者，见 `scheduler::lease`

pub mod json_file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{User, UserId};

pub use json_file::JsonFileStore;
pub use memory::MemoryUserStore;

/// 用户记录存储
#[async_trait]
pub trait UserRecordStore: Send + Sync {
    /// 读取记录，不存在时返回 `StoreError::NotFound`
    async fn get(&self, user_id: &UserId) -> StoreResult<User>;

    /// 整条覆盖写入
    async fn set(&self, user_id: &UserId, user: &User) -> StoreResult<()>;

    /// 找一条 `next_check < now` 的记录，不加锁
    async fn query_due(&self, now: DateTime<Utc>) -> StoreResult<Option<UserId>>;

    /// 在单条记录上开启事务，事务存续期间其他事务会等待
    async fn begin(&self, user_id: &UserId) -> StoreResult<Box<dyn RecordTransaction>>;
}

/// 单条记录事务
///
/// 未提交就被丢弃等同于回滚
#[async_trait]
pub trait RecordTransaction: Send {
    /// 事务内重新读取记录
    async fn read(&mut self) -> StoreResult<User>;

    /// 暂存新值，提交时写入
    fn write(&mut self, user: User);

    async fn commit(&mut self) -> StoreResult<()>;

    fn rollback(&mut self);
}
