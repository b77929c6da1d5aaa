use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::AppError;

const TOKEN_NAME: &str = "token";

/// Client-side persistent storage for the bearer token.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_token(&self) -> Result<Option<String>, AppError>;
    async fn set_token(&self, token: &str) -> Result<(), AppError>;
    async fn clear_token(&self) -> Result<(), AppError>;
}

/// Token kept in an SQLite file, surviving restarts of the client.
pub struct SqliteTokenStore {
    db: SqlitePool,
}

impl SqliteTokenStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Self::from_pool(db).await
    }

    pub async fn from_pool(db: SqlitePool) -> Result<Self, AppError> {
        sqlx::migrate!("./migrations").run(&db).await?;
        Ok(Self { db })
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn get_token(&self) -> Result<Option<String>, AppError> {
        let token = fetch_value(&self.db, TOKEN_NAME).await?;
        Ok(token)
    }

    async fn set_token(&self, token: &str) -> Result<(), AppError> {
        upsert_value(&self.db, TOKEN_NAME, token).await?;
        Ok(())
    }

    async fn clear_token(&self) -> Result<(), AppError> {
        delete_value(&self.db, TOKEN_NAME).await?;
        Ok(())
    }
}

async fn fetch_value(db: &SqlitePool, name: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT value FROM auth_tokens WHERE name = ?1")
        .bind(name)
        .fetch_optional(db)
        .await
}

async fn upsert_value(db: &SqlitePool, name: &str, value: &str) -> Result<(), sqlx::Error> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO auth_tokens (name, value, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(name) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(name)
    .bind(value)
    .bind(now)
    .execute(db)
    .await?;
    Ok(())
}

async fn delete_value(db: &SqlitePool, name: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM auth_tokens WHERE name = ?1")
        .bind(name)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Process-local token storage.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        // A poisoned slot still holds a usable Option.
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get_token(&self) -> Result<Option<String>, AppError> {
        Ok(self.slot().clone())
    }

    async fn set_token(&self, token: &str) -> Result<(), AppError> {
        *self.slot() = Some(token.to_string());
        Ok(())
    }

    async fn clear_token(&self) -> Result<(), AppError> {
        *self.slot() = None;
        Ok(())
    }
}
