//! 租约调度
//!
//! 先做一次不加锁的范围查询挑出候选，再在单条记录事务里用同一个 `now` 复核。
//! 两个 worker 可能拿到同一个过期候选，但只有一个能通过复核并续期。

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{SchedulerError, StoreResult};
use crate::infrastructure::UserRecordStore;
use crate::models::{User, UserId};

/// 默认租约时长
pub const DEFAULT_LEASE_MINUTES: i64 = 15;

/// 一次获取的结果
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseOutcome {
    /// 拿到租约，`user` 是续期前的记录
    Due { user_id: UserId, user: User },
    /// 没有到期的记录
    NotDue,
    /// 候选被其他 worker 抢先续期
    LostRace { user_id: UserId },
}

/// 已获得的租约
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub user_id: UserId,
    /// 续期前的记录
    pub user: User,
    /// 获取租约时使用的时间
    pub acquired_at: DateTime<Utc>,
}

impl LeaseOutcome {
    /// 转成错误形式：`NotDue` → `NoUserDue`，`LostRace` → `LeaseLost`
    pub fn into_lease(self, acquired_at: DateTime<Utc>) -> Result<Lease, SchedulerError> {
        match self {
            LeaseOutcome::Due { user_id, user } => Ok(Lease {
                user_id,
                user,
                acquired_at,
            }),
            LeaseOutcome::NotDue => Err(SchedulerError::NoUserDue),
            LeaseOutcome::LostRace { user_id } => Err(SchedulerError::LeaseLost { user_id }),
        }
    }
}

/// 租约调度器
#[derive(Clone)]
pub struct LeaseScheduler {
    store: Arc<dyn UserRecordStore>,
    lease_duration: Duration,
}

impl LeaseScheduler {
    pub fn new(store: Arc<dyn UserRecordStore>, lease_duration: Duration) -> Self {
        Self {
            store,
            lease_duration,
        }
    }

    /// 选出一条到期记录并续期
    ///
    /// 丢失竞争不是错误，不重试
    pub async fn acquire_due(&self, now: DateTime<Utc>) -> StoreResult<LeaseOutcome> {
        let Some(user_id) = self.store.query_due(now).await? else {
            return Ok(LeaseOutcome::NotDue);
        };

        let mut tx = self.store.begin(&user_id).await?;
        let current = match tx.read().await {
            Ok(user) => user,
            Err(e) => {
                tx.rollback();
                return Err(e);
            }
        };

        // 必须用查询时的 now 复核，不能重新取时钟
        if !current.is_due(now) {
            tx.rollback();
            debug!("[调度] 用户 {} 已被其他 worker 续期", user_id);
            return Ok(LeaseOutcome::LostRace { user_id });
        }

        let mut renewed = current.clone();
        renewed.next_check = now + self.lease_duration;
        tx.write(renewed);
        tx.commit().await?;

        info!(
            "[调度] 获得用户 {} 的租约，下次检查: {}",
            user_id,
            (now + self.lease_duration).format("%H:%M:%S")
        );

        Ok(LeaseOutcome::Due {
            user_id,
            user: current,
        })
    }

    /// 同 `acquire_due`，但以错误形式返回空闲结果
    pub async fn acquire_lease(&self, now: DateTime<Utc>) -> Result<Lease, SchedulerError> {
        self.acquire_due(now).await?.into_lease(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::store::{RecordTransaction, UserRecordStore};
    use crate::infrastructure::MemoryUserStore;
    use async_trait::async_trait;

    fn scheduler(store: Arc<dyn UserRecordStore>) -> LeaseScheduler {
        LeaseScheduler::new(store, Duration::minutes(DEFAULT_LEASE_MINUTES))
    }

    async fn store_with(users: &[(&str, DateTime<Utc>)]) -> Arc<MemoryUserStore> {
        let store = Arc::new(MemoryUserStore::new());
        for (id, next_check) in users {
            store
                .set(&UserId::new(*id), &User::new(Vec::new(), *next_check))
                .await
                .unwrap();
        }
        store
    }

    /// 范围查询总是返回同一个候选，模拟读到过期索引
    struct StaleQueryStore {
        inner: Arc<MemoryUserStore>,
        candidate: UserId,
    }

    #[async_trait]
    impl UserRecordStore for StaleQueryStore {
        async fn get(&self, user_id: &UserId) -> StoreResult<User> {
            self.inner.get(user_id).await
        }

        async fn set(&self, user_id: &UserId, user: &User) -> StoreResult<()> {
            self.inner.set(user_id, user).await
        }

        async fn query_due(&self, _now: DateTime<Utc>) -> StoreResult<Option<UserId>> {
            Ok(Some(self.candidate.clone()))
        }

        async fn begin(&self, user_id: &UserId) -> StoreResult<Box<dyn RecordTransaction>> {
            self.inner.begin(user_id).await
        }
    }

    #[tokio::test]
    async fn test_due_user_is_renewed_and_returned_before_renewal() {
        let now = Utc::now();
        let before = now - Duration::minutes(1);
        let store = store_with(&[("alice", before)]).await;
        let scheduler = scheduler(store.clone());

        let outcome = scheduler.acquire_due(now).await.unwrap();

        let LeaseOutcome::Due { user_id, user } = outcome else {
            panic!("expected a lease, got {:?}", outcome);
        };
        assert_eq!(user_id, UserId::new("alice"));
        assert_eq!(user.next_check, before);
        assert_eq!(
            store.get(&user_id).await.unwrap().next_check,
            now + Duration::minutes(15)
        );
    }

    #[tokio::test]
    async fn test_nothing_due() {
        let now = Utc::now();
        let store = store_with(&[("alice", now + Duration::minutes(3))]).await;
        let scheduler = scheduler(store);

        assert_eq!(scheduler.acquire_due(now).await.unwrap(), LeaseOutcome::NotDue);
        assert!(matches!(
            scheduler.acquire_lease(now).await.unwrap_err(),
            SchedulerError::NoUserDue
        ));
    }

    #[tokio::test]
    async fn test_next_check_equal_to_now_is_not_due() {
        let now = Utc::now();
        let store = store_with(&[("alice", now)]).await;
        assert_eq!(
            scheduler(store).acquire_due(now).await.unwrap(),
            LeaseOutcome::NotDue
        );
    }

    #[tokio::test]
    async fn test_stale_candidate_loses_race_without_writing() {
        let now = Utc::now();
        let renewed_at = now + Duration::minutes(15);
        let inner = store_with(&[("alice", renewed_at)]).await;
        let store = Arc::new(StaleQueryStore {
            inner: inner.clone(),
            candidate: UserId::new("alice"),
        });

        let outcome = scheduler(store.clone()).acquire_due(now).await.unwrap();

        assert_eq!(
            outcome,
            LeaseOutcome::LostRace {
                user_id: UserId::new("alice")
            }
        );
        assert_eq!(
            inner.get(&UserId::new("alice")).await.unwrap().next_check,
            renewed_at
        );
        assert!(matches!(
            scheduler(store).acquire_lease(now).await.unwrap_err(),
            SchedulerError::LeaseLost { .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_get_at_most_one_lease() {
        let now = Utc::now();
        let inner = store_with(&[("alice", now - Duration::seconds(1))]).await;
        let store: Arc<dyn UserRecordStore> = Arc::new(StaleQueryStore {
            inner,
            candidate: UserId::new("alice"),
        });
        let scheduler = scheduler(store);

        let barrier = Arc::new(tokio::sync::Barrier::new(16));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let scheduler = scheduler.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                scheduler.acquire_due(now).await.unwrap()
            }));
        }

        let mut granted = 0;
        let mut lost = 0;
        for handle in handles {
            match handle.await.unwrap() {
                LeaseOutcome::Due { .. } => granted += 1,
                LeaseOutcome::LostRace { .. } => lost += 1,
                LeaseOutcome::NotDue => {}
            }
        }

        assert_eq!(granted, 1);
        assert_eq!(lost, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_many_users_without_duplicates() {
        let now = Utc::now();
        let ids: Vec<String> = (0..20).map(|i| format!("user-{}", i)).collect();
        let entries: Vec<(&str, DateTime<Utc>)> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), now - Duration::seconds(i as i64 + 1)))
            .collect();
        let store = store_with(&entries).await;
        let scheduler = scheduler(store);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    match scheduler.acquire_due(now).await.unwrap() {
                        LeaseOutcome::Due { user_id, .. } => mine.push(user_id),
                        LeaseOutcome::LostRace { .. } => continue,
                        LeaseOutcome::NotDue => break,
                    }
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        let total = all.len();
        all.dedup();
        assert_eq!(total, 20);
        assert_eq!(all.len(), 20);
    }
}
