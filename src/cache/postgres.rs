//! Cache backend over two PostgreSQL tables shared with the loader

use super::CacheBackend;
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use sqlx::postgres::PgPool;

pub struct PgCacheBackend {
    pool: PgPool,
}

impl PgCacheBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the cache tables for development databases
    pub async fn bootstrap_schema(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_sets (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn cache_error(e: sqlx::Error) -> EngineError {
    EngineError::Cache(e.to_string())
}

#[async_trait]
impl CacheBackend for PgCacheBackend {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM cache_entries WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(cache_error)
    }

    async fn members(&self, key: &str) -> EngineResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT member FROM cache_sets WHERE key = $1 ORDER BY member",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(cache_error)
    }

    async fn health_check(&self) -> EngineResult<()> {
        sqlx::query("SELECT 1 FROM cache_entries LIMIT 1")
            .execute(&self.pool)
            .await
            .map_err(cache_error)?;
        Ok(())
    }
}
