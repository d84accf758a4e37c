use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// One cached value with its TTL policy attached.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.stored_at).to_std() {
            Ok(age) => age < self.ttl,
            // Entry stamped in the future (clock skew): treat as fresh.
            Err(_) => true,
        }
    }
}

/// Storage mechanism behind a TTL cache. Policy (freshness, lazy expiry)
/// lives in [`TtlCache`]; backends only load, save and remove.
#[async_trait]
pub trait CacheBackend<V>: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry<V>>, CacheError>;
    async fn save(&self, key: &str, entry: CacheEntry<V>) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// TTL cache over a pluggable backend. Entries are lazily expired: freshness
/// is checked on read and stale rows removed then, never proactively swept.
pub struct TtlCache<V, B: CacheBackend<V>> {
    backend: B,
    _value: PhantomData<fn() -> V>,
}

impl<V, B: CacheBackend<V>> TtlCache<V, B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            _value: PhantomData,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        match self.backend.load(key).await? {
            Some(entry) if entry.is_fresh(Utc::now()) => Ok(Some(entry.value)),
            Some(_) => {
                self.backend.remove(key).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn insert(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError> {
        self.backend
            .save(
                key,
                CacheEntry {
                    value,
                    stored_at: Utc::now(),
                    ttl,
                },
            )
            .await
    }

    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.backend.remove(key).await
    }
}

/// In-memory backend: a keyed map behind a lock.
pub struct MemoryBackend<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V> MemoryBackend<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryBackend<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: Clone + Send + Sync> CacheBackend<V> for MemoryBackend<V> {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry<V>>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, entry: CacheEntry<V>) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Open (or create) the sqlite database backing durable caches.
pub async fn open_pool(db_path: &str) -> Result<SqlitePool, CacheError> {
    let url = format!("sqlite:{}?mode=rwc", db_path);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;
    Ok(pool)
}

/// Durable backend: values serialized as JSON rows in sqlite, surviving
/// process restarts.
pub struct SqliteBackend<V> {
    pool: SqlitePool,
    table: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V> SqliteBackend<V> {
    pub async fn new(pool: SqlitePool, table: &'static str) -> Result<Self, CacheError> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                stored_at INTEGER NOT NULL,
                ttl_secs INTEGER NOT NULL
            )
            "#
        );
        sqlx::query(&ddl).execute(&pool).await?;
        Ok(Self {
            pool,
            table,
            _value: PhantomData,
        })
    }
}

#[async_trait]
impl<V: Serialize + DeserializeOwned + Send + Sync> CacheBackend<V> for SqliteBackend<V> {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry<V>>, CacheError> {
        let sql = format!(
            "SELECT payload, stored_at, ttl_secs FROM {} WHERE key = ?",
            self.table
        );
        let row: Option<(String, i64, i64)> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some((payload, stored_at, ttl_secs)) = row else {
            return Ok(None);
        };

        let value: V = serde_json::from_str(&payload)?;
        let stored_at = DateTime::from_timestamp(stored_at, 0).unwrap_or_else(Utc::now);
        Ok(Some(CacheEntry {
            value,
            stored_at,
            ttl: Duration::from_secs(ttl_secs.max(0) as u64),
        }))
    }

    async fn save(&self, key: &str, entry: CacheEntry<V>) -> Result<(), CacheError> {
        let payload = serde_json::to_string(&entry.value)?;
        let sql = format!(
            "INSERT INTO {} (key, payload, stored_at, ttl_secs) VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                stored_at = excluded.stored_at,
                ttl_secs = excluded.ttl_secs",
            self.table
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(&payload)
            .bind(entry.stored_at.timestamp())
            .bind(entry.ttl.as_secs() as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let sql = format!("DELETE FROM {} WHERE key = ?", self.table);
        sqlx::query(&sql).bind(key).execute(&self.pool).await?;
        Ok(())
    }
}
