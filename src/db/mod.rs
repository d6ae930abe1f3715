use chrono::Utc;
use log::{debug, info};
use sqlx::{migrate::MigrateDatabase, sqlite::{SqlitePool, SqlitePoolOptions}, Row, Sqlite};
use thiserror::Error;

// Key namespace for the "already voted" flag: `has_voted_<pollId>`
pub const VOTED_NAMESPACE: &str = "has_voted";
const VOTED_VALUE: &str = "true";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vote state database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub fn vote_key(poll_id: &str) -> String {
    format!("{}_{}", VOTED_NAMESPACE, poll_id)
}

/// Durable record of which polls this client has voted in.
///
/// Records are scoped by the backend origin, so one database file can serve
/// several deployments without their poll ids colliding. Nothing here ever
/// clears a record.
#[derive(Clone)]
pub struct VoteStateStore {
    pool: SqlitePool,
    origin: String,
}

impl VoteStateStore {
    pub async fn connect(db_url: &str, origin: &str) -> Result<Self, StoreError> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating vote state database at {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        // An in-memory database lives exactly as long as its single connection
        let in_memory = db_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self {
            pool,
            origin: origin.to_string(),
        })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vote_state (
                origin TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (origin, key)
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub async fn has_voted(&self, poll_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT value
            FROM vote_state
            WHERE origin = ? AND key = ?
            "#,
        )
        .bind(&self.origin)
        .bind(vote_key(poll_id))
        .fetch_optional(&self.pool)
        .await?;

        // Any stored value counts, same as a truthy storage lookup
        Ok(row.map(|row| !row.get::<String, _>("value").is_empty()).unwrap_or(false))
    }

    pub async fn mark_voted(&self, poll_id: &str) -> Result<(), StoreError> {
        debug!("Marking poll {} as voted for origin {}", poll_id, self.origin);
        sqlx::query(
            r#"
            INSERT INTO vote_state (origin, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(origin, key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.origin)
        .bind(vote_key(poll_id))
        .bind(VOTED_VALUE)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> VoteStateStore {
    VoteStateStore::connect("sqlite::memory:", "http://localhost:5000")
        .await
        .unwrap()
}
