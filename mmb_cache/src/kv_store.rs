//! `KvStore`: the small interface the cache persists through. Two real
//! implementations (Redis, SQLite) so the cache has something to snapshot
//! into, plus an in-memory one for tests.

use async_trait::async_trait;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;
    /// Returns every key currently stored under `prefix`.
    async fn scan(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
}

pub struct RedisKvStore {
    client: redis::Client,
}

impl RedisKvStore {
    pub fn connect(redis_url: &str) -> anyhow::Result<Self> {
        Ok(RedisKvStore {
            client: redis::Client::open(redis_url)?,
        })
    }

    async fn connection(&self) -> anyhow::Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_tokio_connection().await?)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        conn.set(key, value).await?;
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        let pattern = format!("{prefix}*");
        Ok(conn.keys(pattern).await?)
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        conn.del(key).await?;
        Ok(())
    }
}

pub struct SqliteKvStore {
    pool: sqlx::SqlitePool,
}

impl SqliteKvStore {
    pub async fn connect(sqlite_path: &str) -> anyhow::Result<Self> {
        let pool = sqlx::SqlitePool::connect(sqlite_path).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_store (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
        )
        .execute(&pool)
        .await?;
        Ok(SqliteKvStore { pool })
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let pattern = format!("{prefix}%");
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM kv_store WHERE key LIKE ?")
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory `KvStore`, used by the cache's own unit tests instead of
/// standing up a real Redis/SQLite instance.
#[derive(Default)]
pub struct InMemoryKvStore {
    data: parking_lot::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .data
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.data.lock().remove(key);
        Ok(())
    }
}
