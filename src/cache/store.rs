//! 键值存储抽象
//!
//! 单键写入必须原子：读者要么看到旧值，要么看到新值。
//! 同一键的并发写入由上游（每项互斥锁、每键锁）串行化，这里不提供事务。

use crate::error::{Result, TransferError};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// 持久化键值存储
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 删除，返回键是否存在
    fn remove(&self, key: &str) -> Result<bool>;

    fn keys(&self) -> Result<Vec<String>>;
}

/// 读取 JSON 记录；损坏的记录当作不存在
pub fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => match serde_json::from_slice(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("缓存记录损坏，已忽略: key={}, error={}", key, e);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

pub fn put_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_vec(value).map_err(|e| TransferError::Cache(e.to_string()))?;
    store.put(key, &raw)
}

/// 内存键值存储
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        size: u64,
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryKvStore::new();
        put_json(&store, "k", &Record { size: 7 }).unwrap();
        let back: Option<Record> = get_json(&store, "k").unwrap();
        assert_eq!(back, Some(Record { size: 7 }));

        let missing: Option<Record> = get_json(&store, "missing").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_corrupt_record_reads_as_missing() {
        let store = MemoryKvStore::new();
        store.put("k", b"not json").unwrap();
        let back: Option<Record> = get_json(&store, "k").unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_remove_and_keys() {
        let store = MemoryKvStore::new();
        store.put("a", b"1").unwrap();
        store.put("b", b"2").unwrap();
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert_eq!(store.keys().unwrap(), vec!["b".to_string()]);
    }
}
