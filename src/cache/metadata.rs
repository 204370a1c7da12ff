//! 大小与元数据缓存
//!
//! ## 目录大小
//! - 键：`(uuid, sharer_id, receiver_id, trash, link_id)`
//! - 每个键在窗口期内最多一次权威重算，窗口内直接返回上次持久化的值
//! - 同一键的并发请求排队在键级互斥锁后面，只有第一个真正请求服务端
//!
//! ## 名称
//! 内存 + 持久化两级缓存，名称变更后由调用方显式失效

use super::store::{get_json, put_json, KvStore};
use crate::common::RecomputeLimiter;
use crate::error::Result;
use crate::storage::{DirectorySize, ItemScope, StorageApi};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// 数据新鲜度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// 本次刚重算
    Fresh,
    /// 窗口期内，返回上次持久化的值
    RateLimited,
    /// 重算失败，退回上次持久化的值
    Stale,
}

/// 带新鲜度标记的缓存值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cached<T> {
    pub value: T,
    pub freshness: Freshness,
}

impl<T> Cached<T> {
    fn new(value: T, freshness: Freshness) -> Self {
        Self { value, freshness }
    }

    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SizeRecord {
    #[serde(flatten)]
    size: DirectorySize,
    computed_at: i64,
}

/// 目录大小缓存键
pub fn directory_size_key(uuid: Uuid, scope: &ItemScope) -> String {
    format!(
        "directorySize:{}:{}:{}:{}:{}",
        uuid,
        scope.sharer_id,
        scope.receiver_id,
        scope.trash,
        scope.link_id.as_deref().unwrap_or("")
    )
}

fn item_name_key(uuid: Uuid) -> String {
    format!("itemName:{}", uuid)
}

/// 元数据缓存
pub struct MetadataCache {
    storage: Arc<dyn StorageApi>,
    store: Arc<dyn KvStore>,
    limiter: RecomputeLimiter,
    /// 最近一次重算失败的键，窗口期内继续标记为 Stale
    failed: DashMap<String, ()>,
    names: DashMap<Uuid, String>,
}

impl MetadataCache {
    pub fn new(storage: Arc<dyn StorageApi>, store: Arc<dyn KvStore>, window: Duration) -> Self {
        Self {
            storage,
            store,
            limiter: RecomputeLimiter::new(window),
            failed: DashMap::new(),
            names: DashMap::new(),
        }
    }

    /// 查询目录聚合大小（限流）
    pub async fn directory_size(
        &self,
        uuid: Uuid,
        scope: &ItemScope,
    ) -> Result<Cached<DirectorySize>> {
        let key = directory_size_key(uuid, scope);
        let _guard = self.limiter.lock(&key).await;

        let persisted: Option<SizeRecord> = get_json(self.store.as_ref(), &key)?;
        if !self.limiter.is_due(&key) {
            if let Some(record) = &persisted {
                debug!("目录大小命中限流窗口: {}", key);
                let freshness = if self.failed.contains_key(&key) {
                    Freshness::Stale
                } else {
                    Freshness::RateLimited
                };
                return Ok(Cached::new(record.size, freshness));
            }
        }

        match self.storage.directory_size(uuid, scope).await {
            Ok(size) => {
                let record = SizeRecord {
                    size,
                    computed_at: chrono::Utc::now().timestamp(),
                };
                put_json(self.store.as_ref(), &key, &record)?;
                self.limiter.mark_recomputed(&key);
                self.failed.remove(&key);
                Ok(Cached::new(size, Freshness::Fresh))
            }
            Err(e) => match persisted {
                Some(record) => {
                    // 失败的尝试同样占用窗口，排队的请求不再逐个打到服务端
                    warn!("目录大小重算失败，返回旧值: key={}, error={}", key, e);
                    self.limiter.mark_recomputed(&key);
                    self.failed.insert(key, ());
                    Ok(Cached::new(record.size, Freshness::Stale))
                }
                None => Err(e),
            },
        }
    }

    /// 使目录大小失效，下次请求必然重算
    pub fn invalidate_directory(&self, uuid: Uuid, scope: &ItemScope) -> Result<()> {
        let key = directory_size_key(uuid, scope);
        self.limiter.forget(&key);
        self.failed.remove(&key);
        self.store.remove(&key)?;
        Ok(())
    }

    /// 查询条目名称
    pub async fn item_name(&self, uuid: Uuid) -> Result<String> {
        if let Some(name) = self.names.get(&uuid) {
            return Ok(name.clone());
        }

        let key = item_name_key(uuid);
        if let Some(name) = get_json::<String>(self.store.as_ref(), &key)? {
            self.names.insert(uuid, name.clone());
            return Ok(name);
        }

        let name = self.storage.item_name(uuid).await?;
        put_json(self.store.as_ref(), &key, &name)?;
        self.names.insert(uuid, name.clone());
        Ok(name)
    }

    /// 名称变更（重命名）后失效
    pub fn invalidate_name(&self, uuid: Uuid) -> Result<()> {
        self.names.remove(&uuid);
        self.store.remove(&item_name_key(uuid))?;
        Ok(())
    }
}
