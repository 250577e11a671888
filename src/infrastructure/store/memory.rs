//! 内存存储
//!
//! 每条记录一把异步锁，事务持有锁直到提交或回滚

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use super::{RecordTransaction, UserRecordStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{User, UserId};

#[derive(Default)]
pub struct MemoryUserStore {
    records: RwLock<HashMap<UserId, Arc<Mutex<User>>>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, user_id: &UserId) -> StoreResult<Arc<Mutex<User>>> {
        self.records
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                user_id: user_id.clone(),
            })
    }
}

#[async_trait]
impl UserRecordStore for MemoryUserStore {
    async fn get(&self, user_id: &UserId) -> StoreResult<User> {
        let record = self.record(user_id).await?;
        let user = record.lock().await.clone();
        Ok(user)
    }

    async fn set(&self, user_id: &UserId, user: &User) -> StoreResult<()> {
        let existing = self.records.read().await.get(user_id).cloned();
        let record = match existing {
            Some(record) => record,
            None => match self.records.write().await.entry(user_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Mutex::new(user.clone())));
                    return Ok(());
                }
                // 另一个 set 抢先创建了记录，照常覆盖
                Entry::Occupied(slot) => slot.get().clone(),
            },
        };
        *record.lock().await = user.clone();
        Ok(())
    }

    async fn query_due(&self, now: DateTime<Utc>) -> StoreResult<Option<UserId>> {
        let records: Vec<(UserId, Arc<Mutex<User>>)> = self
            .records
            .read()
            .await
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();

        // 最早到期的优先
        let mut best: Option<(UserId, DateTime<Utc>)> = None;
        for (id, record) in records {
            let next_check = record.lock().await.next_check;
            if next_check < now && best.as_ref().map_or(true, |(_, t)| next_check < *t) {
                best = Some((id, next_check));
            }
        }

        Ok(best.map(|(id, _)| id))
    }

    async fn begin(&self, user_id: &UserId) -> StoreResult<Box<dyn RecordTransaction>> {
        let record = self.record(user_id).await?;
        let guard = record.lock_owned().await;
        debug!("[存储] 开启事务: {}", user_id);
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            pending: None,
        }))
    }
}

struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<User>>,
    pending: Option<User>,
}

#[async_trait]
impl RecordTransaction for MemoryTransaction {
    async fn read(&mut self) -> StoreResult<User> {
        self.guard
            .as_ref()
            .map(|guard| (**guard).clone())
            .ok_or(StoreError::TransactionClosed)
    }

    fn write(&mut self, user: User) {
        self.pending = Some(user);
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let mut guard = self.guard.take().ok_or(StoreError::TransactionClosed)?;
        if let Some(user) = self.pending.take() {
            *guard = user;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.pending = None;
        self.guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user_due_at(next_check: DateTime<Utc>) -> User {
        User::new(Vec::new(), next_check)
    }

    #[tokio::test]
    async fn test_get_missing_user() {
        let store = MemoryUserStore::new();
        let err = store.get(&UserId::new("nobody")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_due_prefers_oldest() {
        let store = MemoryUserStore::new();
        let now = Utc::now();
        store
            .set(&UserId::new("a"), &user_due_at(now - Duration::minutes(1)))
            .await
            .unwrap();
        store
            .set(&UserId::new("b"), &user_due_at(now - Duration::minutes(5)))
            .await
            .unwrap();
        store
            .set(&UserId::new("c"), &user_due_at(now + Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(store.query_due(now).await.unwrap(), Some(UserId::new("b")));
        assert_eq!(
            store.query_due(now - Duration::minutes(10)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_rolled_back_transaction_changes_nothing() {
        let store = MemoryUserStore::new();
        let id = UserId::new("a");
        let now = Utc::now();
        store.set(&id, &user_due_at(now)).await.unwrap();

        let mut tx = store.begin(&id).await.unwrap();
        let mut user = tx.read().await.unwrap();
        user.next_check = now + Duration::minutes(15);
        tx.write(user);
        tx.rollback();
        assert!(matches!(
            tx.commit().await.unwrap_err(),
            StoreError::TransactionClosed
        ));
        drop(tx);

        assert_eq!(store.get(&id).await.unwrap().next_check, now);
    }

    #[tokio::test]
    async fn test_committed_transaction_is_visible() {
        let store = MemoryUserStore::new();
        let id = UserId::new("a");
        let now = Utc::now();
        store.set(&id, &user_due_at(now)).await.unwrap();

        let mut tx = store.begin(&id).await.unwrap();
        let mut user = tx.read().await.unwrap();
        user.next_check = now + Duration::minutes(15);
        tx.write(user);
        tx.commit().await.unwrap();
        drop(tx);

        assert_eq!(
            store.get(&id).await.unwrap().next_check,
            now + Duration::minutes(15)
        );
    }

    #[tokio::test]
    async fn test_set_overwrites_new_record() {
        let store = MemoryUserStore::new();
        let id = UserId::new("a");
        let now = Utc::now();

        store.set(&id, &user_due_at(now)).await.unwrap();
        store
            .set(&id, &user_due_at(now + Duration::minutes(3)))
            .await
            .unwrap();

        assert_eq!(
            store.get(&id).await.unwrap().next_check,
            now + Duration::minutes(3)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_of_new_record_all_land() {
        let store = Arc::new(MemoryUserStore::new());
        let id = UserId::new("a");
        let now = Utc::now();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    store
                        .set(&id, &user_due_at(now + Duration::minutes(i)))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.get(&id).await.unwrap().next_check;
        assert!((0..16).any(|i| stored == now + Duration::minutes(i)));

        // 竞争结束后，后来的 set 总是生效
        store
            .set(&id, &user_due_at(now - Duration::minutes(1)))
            .await
            .unwrap();
        assert_eq!(
            store.get(&id).await.unwrap().next_check,
            now - Duration::minutes(1)
        );
    }
}
