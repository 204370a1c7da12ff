//! SQLite 键值存储
//!
//! 单表 `kv_cache`，写入用 `INSERT OR REPLACE`，单条语句天然原子

use super::store::KvStore;
use crate::error::{Result, TransferError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use tracing::info;

pub type DbPool = Pool<SqliteConnectionManager>;

fn cache_err(e: impl std::fmt::Display) -> TransferError {
    TransferError::Cache(e.to_string())
}

/// SQLite 键值存储
pub struct SqliteKvStore {
    pool: DbPool,
}

impl SqliteKvStore {
    /// 打开（或创建）数据库文件
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("创建缓存目录失败: {:?}", parent))?;
        }
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 3000;
                "#,
            )
        });
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .context("创建 SQLite 连接池失败")?;
        let store = Self { pool };
        store.init_tables().context("初始化缓存表失败")?;
        info!("缓存数据库已打开: {:?}", db_path);
        Ok(store)
    }

    /// 内存数据库，连接池只保留一个连接以共享同一个库
    pub fn in_memory() -> anyhow::Result<Self> {
        use anyhow::Context;

        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .context("创建 SQLite 连接池失败")?;
        let store = Self { pool };
        store.init_tables().context("初始化缓存表失败")?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<()> {
        let conn = self.pool.get().map_err(cache_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_cache (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(cache_err)?;
        Ok(())
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.pool.get().map_err(cache_err)?;
        conn.query_row(
            "SELECT value FROM kv_cache WHERE key = ?1 LIMIT 1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(cache_err)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.pool.get().map_err(cache_err)?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_cache (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, chrono::Utc::now().timestamp()],
        )
        .map_err(cache_err)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.pool.get().map_err(cache_err)?;
        let affected = conn
            .execute("DELETE FROM kv_cache WHERE key = ?1", params![key])
            .map_err(cache_err)?;
        Ok(affected > 0)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.pool.get().map_err(cache_err)?;
        let mut stmt = conn
            .prepare("SELECT key FROM kv_cache ORDER BY key")
            .map_err(cache_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(cache_err)?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(cache_err)?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_overwrite() {
        let store = SqliteKvStore::in_memory().unwrap();
        assert!(store.get("k").unwrap().is_none());
        store.put("k", b"v1").unwrap();
        store.put("k", b"v2").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.keys().unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache").join("kv.db");
        {
            let store = SqliteKvStore::open(&path).unwrap();
            store.put("thumbnail:x:v1", &[1, 2, 3]).unwrap();
        }
        let store = SqliteKvStore::open(&path).unwrap();
        assert_eq!(store.get("thumbnail:x:v1").unwrap(), Some(vec![1, 2, 3]));
        assert!(store.remove("thumbnail:x:v1").unwrap());
        assert!(!store.remove("thumbnail:x:v1").unwrap());
    }
}
