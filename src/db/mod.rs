//! Durable store plumbing
//!
//! Connection pool wrapper, schema bootstrap and the shared
//! repository error type.

pub mod schema;

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

/// Repository-level errors shared by the durable stores
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A guarded write found its precondition gone
    /// (duplicate request, stock guard, status race)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl RepoError {
    /// Unique-constraint violations surface as conflicts so callers
    /// can treat them as idempotent replays
    pub fn is_conflict(&self) -> bool {
        match self {
            RepoError::Conflict(_) => true,
            RepoError::Database(sqlx::Error::Database(db)) => {
                // 23505 = unique_violation
                db.code().as_deref() == Some("23505")
            }
            _ => false,
        }
    }
}

/// PostgreSQL database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.effective_url())
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
