use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AppError, Result};

/// Durable JSON documents under string keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<Value>>;
    async fn set_value(&self, key: &str, value: &Value) -> Result<()>;
}

/// `kv_store` table backed implementation.
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: sqlx::SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("read '{key}': {e}")))?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set_value(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let updated_at = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(text)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(format!("write '{key}': {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// In-memory store for unit tests. Reads and writes can be made to fail.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemoryKvStore {
    pub values: std::sync::Mutex<std::collections::HashMap<String, Value>>,
    pub fail_reads: std::sync::atomic::AtomicBool,
    pub fail_writes: std::sync::atomic::AtomicBool,
    pub writes: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        use std::sync::atomic::Ordering;
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(AppError::Persistence("read failed".into()));
        }
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &Value) -> Result<()> {
        use std::sync::atomic::Ordering;
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(AppError::Persistence("write failed".into()));
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.values.lock().unwrap().insert(key.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let kv = SqliteKvStore::new(test_pool().await);
        assert_eq!(kv.get_value("ticker_states").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_overwrite() {
        let kv = SqliteKvStore::new(test_pool().await);
        kv.set_value("summary", &json!({"total": 3})).await.unwrap();
        kv.set_value("summary", &json!({"total": 5, "failed": 1})).await.unwrap();

        let v = kv.get_value("summary").await.unwrap().unwrap();
        assert_eq!(v["total"], 5);
        assert_eq!(v["failed"], 1);
    }
}
