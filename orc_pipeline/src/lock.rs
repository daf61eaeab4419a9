//! ABOUTME: Distributed lock service enforcing per-application mutual exclusion
//! ABOUTME: CAS-over-SQLite: acquire is a conditional insert/update, release is conditional

use chrono::{DateTime, Duration, Utc};
use orc_core::{Error, Id, Result};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Unique identifier for the process holding locks, used as part of the owner token.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let pid = std::process::id();
        Self(format!("{}:{}", hostname, pid))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Acquired,
    Released,
    Expired,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Released => "released",
            Self::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "acquired" => Self::Acquired,
            "released" => Self::Released,
            _ => Self::Expired,
        }
    }
}

/// A held lock on `<app_key>`, identified by an owner token only this holder knows.
#[derive(Debug, Clone)]
pub struct Lock {
    pub lock_key: String,
    pub owner_token: String,
    pub locked_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    pub status: LockStatus,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    /// `ttl_lock`: lease duration for a freshly acquired lock.
    pub ttl_seconds: u64,
    /// `N_lock`: max `acquire` retry attempts before surfacing `locked`.
    pub retry_attempts: u32,
    /// `d_lock`: fixed delay between `acquire` retries.
    pub retry_delay_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            retry_attempts: 20,
            retry_delay_seconds: 5,
        }
    }
}

impl From<&orc_config::LockConfig> for LockConfig {
    fn from(config: &orc_config::LockConfig) -> Self {
        Self {
            ttl_seconds: config.ttl_seconds,
            retry_attempts: config.retry_attempts,
            retry_delay_seconds: config.retry_delay_seconds,
        }
    }
}

/// Per-application distributed lock service (C2). Backed by the same SQLite
/// store as the Job Store, in a `locks` table keyed by `lock_key` (app_key).
#[derive(Clone)]
pub struct LockService {
    pool: SqlitePool,
    instance_id: InstanceId,
    config: LockConfig,
    metrics: Option<Arc<orc_obs::Metrics>>,
}

impl LockService {
    pub fn new(pool: SqlitePool, config: LockConfig) -> Self {
        let instance_id = InstanceId::new();
        info!(instance = %instance_id, "Lock service initialized");
        Self {
            pool,
            instance_id,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<orc_obs::Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// `acquire(app_key)`: retries up to `N_lock` times with fixed delay `d_lock`,
    /// surfacing `Error::Locked` only once the retry budget is exhausted.
    pub async fn acquire(&self, app_key: &str) -> Result<LockGuard> {
        for attempt in 0..self.config.retry_attempts {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(self.config.retry_delay_seconds)).await;
            }

            if let Some(lock) = self.try_acquire_once(app_key).await? {
                return Ok(LockGuard::new(lock, self.pool.clone()));
            }

            debug!(app_key, attempt, "lock held, retrying");
        }

        Err(Error::Locked(app_key.to_string()))
    }

    /// Single CAS attempt: takes over an absent or lease-expired row, otherwise fails.
    async fn try_acquire_once(&self, app_key: &str) -> Result<Option<Lock>> {
        let existing = self.get_active_lock(app_key).await?;

        if let Some(lock) = existing {
            if Utc::now() <= lock.lease_expires_at {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_lock_contention();
                }
                return Ok(None);
            }
            debug!(app_key, previous_owner = %lock.owner_token, "reclaiming expired lock");
        }

        let owner_token = format!("{}:{}", self.instance_id, Id::new());
        let now = Utc::now();
        let lease_expires_at = now + Duration::seconds(self.config.ttl_seconds as i64);

        let result = sqlx::query(
            r#"
            INSERT INTO locks (lock_key, owner_token, status, locked_at, lease_expires_at, released_at)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL)
            ON CONFLICT(lock_key) DO UPDATE SET
                owner_token = excluded.owner_token,
                status = excluded.status,
                locked_at = excluded.locked_at,
                lease_expires_at = excluded.lease_expires_at,
                released_at = NULL
            WHERE locks.status != ?3 OR locks.lease_expires_at < ?4
            "#,
        )
        .bind(app_key)
        .bind(&owner_token)
        .bind(LockStatus::Acquired.as_str())
        .bind(now.to_rfc3339())
        .bind(lease_expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("failed to acquire lock {app_key}: {e}")))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        info!(app_key, owner = %owner_token, expires = %lease_expires_at, "lock acquired");
        Ok(Some(Lock {
            lock_key: app_key.to_string(),
            owner_token,
            locked_at: now,
            lease_expires_at,
            status: LockStatus::Acquired,
            released_at: None,
        }))
    }

    /// `release(lock)`: conditional update requiring the stored owner token to match.
    /// Returns `false` (not an error) if the lock was already stolen or expired.
    pub async fn release(&self, lock_key: &str, owner_token: &str) -> Result<bool> {
        release_with_pool(&self.pool, lock_key, owner_token).await
    }

    async fn get_active_lock(&self, app_key: &str) -> Result<Option<Lock>> {
        let row = sqlx::query("SELECT * FROM locks WHERE lock_key = ?1 AND status = ?2")
            .bind(app_key)
            .bind(LockStatus::Acquired.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("failed to query lock {app_key}: {e}")))?;

        row.map(|r| row_to_lock(&r)).transpose()
    }

    /// Opportunistic sweep of stale/old rows, mirroring the freeze registry's cleanup.
    pub async fn expire_stale_locks(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE locks SET status = ?1 WHERE status = ?2 AND lease_expires_at < ?3",
        )
        .bind(LockStatus::Expired.as_str())
        .bind(LockStatus::Acquired.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("failed to expire stale locks: {e}")))?;

        Ok(result.rows_affected())
    }

    pub async fn cleanup_old_locks(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let result = sqlx::query(
            "DELETE FROM locks WHERE (status = ?1 OR status = ?2) AND locked_at < ?3",
        )
        .bind(LockStatus::Released.as_str())
        .bind(LockStatus::Expired.as_str())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("failed to cleanup old locks: {e}")))?;

        Ok(result.rows_affected())
    }
}

async fn release_with_pool(pool: &SqlitePool, lock_key: &str, owner_token: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE locks
        SET status = ?1, released_at = ?2
        WHERE lock_key = ?3 AND owner_token = ?4 AND status = ?5
        "#,
    )
    .bind(LockStatus::Released.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(lock_key)
    .bind(owner_token)
    .bind(LockStatus::Acquired.as_str())
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("failed to release lock {lock_key}: {e}")))?;

    let released = result.rows_affected() > 0;
    if released {
        info!(lock_key, "lock released");
    } else {
        warn!(lock_key, "release no-op: lock already expired or stolen");
    }
    Ok(released)
}

fn row_to_lock(row: &sqlx::sqlite::SqliteRow) -> Result<Lock> {
    let locked_at: String = row.get("locked_at");
    let lease_expires_at: String = row.get("lease_expires_at");
    let released_at: Option<String> = row.get("released_at");

    Ok(Lock {
        lock_key: row.get("lock_key"),
        owner_token: row.get("owner_token"),
        locked_at: DateTime::parse_from_rfc3339(&locked_at)
            .map_err(|e| Error::Storage(format!("invalid locked_at: {e}")))?
            .with_timezone(&Utc),
        lease_expires_at: DateTime::parse_from_rfc3339(&lease_expires_at)
            .map_err(|e| Error::Storage(format!("invalid lease_expires_at: {e}")))?
            .with_timezone(&Utc),
        status: LockStatus::from_str(&row.get::<String, _>("status")),
        released_at: released_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| Error::Storage(format!("invalid released_at: {e}")))?,
    })
}

/// RAII guard releasing its lock on drop, so a task panicking mid-pipeline
/// never holds `<app_key>` past its own lifetime.
pub struct LockGuard {
    lock: Lock,
    pool: SqlitePool,
}

impl LockGuard {
    fn new(lock: Lock, pool: SqlitePool) -> Self {
        Self { lock, pool }
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Explicit release; consumes the guard so `Drop` does not double-release.
    pub async fn release(mut self) -> Result<bool> {
        let released = release_with_pool(&self.pool, &self.lock.lock_key, &self.lock.owner_token).await?;
        self.lock.status = LockStatus::Released;
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.lock.status != LockStatus::Acquired {
            return;
        }

        let lock_key = self.lock.lock_key.clone();
        let owner_token = self.lock.owner_token.clone();
        let pool = self.pool.clone();

        tokio::spawn(async move {
            if let Err(e) = release_with_pool(&pool, &lock_key, &owner_token).await {
                warn!(lock_key, error = %e, "failed to release lock on drop");
            }
        });
    }
}
