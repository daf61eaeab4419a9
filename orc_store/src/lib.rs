//! ABOUTME: Database layer with SQLite, migrations, and job/event repositories
//! ABOUTME: Handles durable persistence of jobs and the append-only event log

use orc_core::{Error, Result};
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Row, Sqlite, SqlitePool,
};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Database connection retry configuration
#[derive(Debug, Clone)]
pub struct DatabaseRetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay_ms: u64,
    /// Maximum delay between retries
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for DatabaseRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl DatabaseRetryConfig {
    pub fn new(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            backoff_multiplier,
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = delay_ms.min(self.max_delay_ms as f64);

        // jitter derived from the clock to avoid a thundering herd on reconnect
        let jitter = {
            use std::time::SystemTime;
            let nanos = SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos();
            0.9 + ((nanos % 201) as f64 / 1000.0)
        };

        let final_delay = (capped_delay * jitter) as u64;
        Duration::from_millis(final_delay)
    }
}

/// Database connection pool and operations
#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Create a new database connection with migrations and default retry configuration
    #[instrument(skip(db_path))]
    pub async fn new(db_path: &str) -> Result<Self> {
        Self::new_with_retry(db_path, DatabaseRetryConfig::default()).await
    }

    /// Create a new database connection with migrations and custom retry configuration
    #[instrument(skip(db_path, retry_config))]
    pub async fn new_with_retry(db_path: &str, retry_config: DatabaseRetryConfig) -> Result<Self> {
        info!(
            "Initializing database at: {} (max_attempts: {}, initial_delay: {}ms)",
            db_path, retry_config.max_attempts, retry_config.initial_delay_ms
        );

        let database_url = format!("sqlite://{}", db_path);
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                let delay = retry_config.calculate_delay(attempt - 1);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = retry_config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Database connection failed, retrying after delay..."
                );
                tokio::time::sleep(delay).await;
            }

            match Self::try_initialize(db_path, &database_url).await {
                Ok(db) => match db.migrate().await {
                    Ok(_) => {
                        info!(attempts = attempt + 1, "Database initialized and migrated successfully");
                        return Ok(db);
                    }
                    Err(e) => {
                        warn!(attempt = attempt + 1, error = %e, "Database migration failed, will retry initialization");
                        last_error = Some(e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Database initialization failed");
                    last_error = Some(e);
                    continue;
                }
            }
        }

        let error_msg = match last_error {
            Some(e) => format!(
                "Failed to initialize database after {} attempts: {}",
                retry_config.max_attempts, e
            ),
            None => format!("Failed to initialize database after {} attempts", retry_config.max_attempts),
        };

        Err(Error::Database(error_msg))
    }

    async fn try_initialize(db_path: &str, database_url: &str) -> Result<Self> {
        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            debug!("Creating database: {}", database_url);
            Sqlite::create_database(database_url)
                .await
                .map_err(|e| Error::Database(format!("Failed to create database: {}", e)))?;
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(db_path)
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true)
            .pragma("foreign_keys", "ON")
            .pragma("synchronous", "NORMAL")
            .pragma("cache_size", "10000")
            .pragma("temp_store", "memory")
            .pragma("busy_timeout", "30000")
            .pragma("mmap_size", "268435456");

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(|e| Error::Database(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Run database migrations
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Migration failed: {}", e)))?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a Db instance from an existing pool (for testing/reuse)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Check database health
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        debug!("Performing database health check");

        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Health check failed: {}", e)))?;

        debug!("Database health check passed");
        Ok(())
    }

    /// Get database statistics
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<DatabaseStats> {
        debug!("Gathering database statistics");

        let tables = vec!["jobs", "events"];
        let mut table_counts = std::collections::HashMap::new();

        for table in &tables {
            let query = format!("SELECT COUNT(*) as count FROM {}", table);
            let row = sqlx::query(&query)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| Error::Database(format!("Failed to get count for {}: {}", table, e)))?;

            let count: i64 = row.get("count");
            table_counts.insert(table.to_string(), count);
        }

        debug!("Database statistics gathered successfully");
        Ok(DatabaseStats { table_counts })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseStats {
    pub table_counts: std::collections::HashMap<String, i64>,
}

pub mod repositories;

pub use repositories::events::{Event, EventRepository, NewEvent};
pub use repositories::jobs::{GitInfo, HookStatus, Job, JobRepository, JobState};
