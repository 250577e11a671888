//! JSON 文件存储
//!
//! 每个用户一个 JSON 文件。写入先写临时文件再 rename，读到的总是完整的记录。
//! 事务锁只在本进程内有效，多进程部署需要换成带事务的数据库。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{RecordTransaction, UserRecordStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{User, UserId};

/// 文件内容
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    user_id: UserId,
    user: User,
}

pub struct JsonFileStore {
    dir: PathBuf,
    locks: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl JsonFileStore {
    /// 打开存储目录，不存在时创建
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, user_id: &UserId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(user_id)))
    }

    fn lock_for(&self, user_id: &UserId) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn read_record(path: &Path) -> StoreResult<Option<StoredRecord>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, e)),
        }
    }

    async fn write_record(path: &Path, user_id: &UserId, user: &User) -> StoreResult<()> {
        let record = StoredRecord {
            user_id: user_id.clone(),
            user: user.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await.map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, path).await.map_err(|e| io_error(path, e))?;
        Ok(())
    }
}

#[async_trait]
impl UserRecordStore for JsonFileStore {
    async fn get(&self, user_id: &UserId) -> StoreResult<User> {
        Self::read_record(&self.path_for(user_id))
            .await?
            .map(|record| record.user)
            .ok_or_else(|| StoreError::NotFound {
                user_id: user_id.clone(),
            })
    }

    async fn set(&self, user_id: &UserId, user: &User) -> StoreResult<()> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;
        Self::write_record(&self.path_for(user_id), user_id, user).await
    }

    async fn query_due(&self, now: DateTime<Utc>) -> StoreResult<Option<UserId>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let mut best: Option<(UserId, DateTime<Utc>)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let record = match Self::read_record(&path).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!("[存储] 跳过无法读取的记录 {}: {}", path.display(), e);
                    continue;
                }
            };

            let next_check = record.user.next_check;
            if next_check < now && best.as_ref().map_or(true, |(_, t)| next_check < *t) {
                best = Some((record.user_id, next_check));
            }
        }

        Ok(best.map(|(id, _)| id))
    }

    async fn begin(&self, user_id: &UserId) -> StoreResult<Box<dyn RecordTransaction>> {
        let guard = self.lock_for(user_id).lock_owned().await;
        let path = self.path_for(user_id);
        if Self::read_record(&path).await?.is_none() {
            return Err(StoreError::NotFound {
                user_id: user_id.clone(),
            });
        }
        debug!("[存储] 开启事务: {}", user_id);

        Ok(Box::new(FileTransaction {
            user_id: user_id.clone(),
            path,
            guard: Some(guard),
            pending: None,
        }))
    }
}

struct FileTransaction {
    user_id: UserId,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
    pending: Option<User>,
}

#[async_trait]
impl RecordTransaction for FileTransaction {
    async fn read(&mut self) -> StoreResult<User> {
        if self.guard.is_none() {
            return Err(StoreError::TransactionClosed);
        }
        JsonFileStore::read_record(&self.path)
            .await?
            .map(|record| record.user)
            .ok_or_else(|| StoreError::NotFound {
                user_id: self.user_id.clone(),
            })
    }

    fn write(&mut self, user: User) {
        self.pending = Some(user);
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let guard = self.guard.take().ok_or(StoreError::TransactionClosed)?;
        if let Some(user) = self.pending.take() {
            JsonFileStore::write_record(&self.path, &self.user_id, &user).await?;
        }
        drop(guard);
        Ok(())
    }

    fn rollback(&mut self) {
        self.pending = None;
        self.guard = None;
    }
}

/// 用户 ID 转成安全的文件名
///
/// 转义固定为 6 位十六进制（覆盖全部 Unicode），保证不同 ID 不会映射到同一文件
fn file_stem(user_id: &UserId) -> String {
    user_id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_string()
            } else {
                format!("%{:06x}", c as u32)
            }
        })
        .collect()
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}
