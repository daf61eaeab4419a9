//! ABOUTME: Freeze registry gating deploys/undeploys per application
//! ABOUTME: Same CAS-over-SQLite shape as the lock service, under the `freezes` table

use chrono::{DateTime, Duration, Utc};
use orc_core::{Error, Result};
use sqlx::{Row, SqlitePool};
use tracing::info;

#[derive(Debug, Clone)]
pub struct FreezeConfig {
    /// How long a `set(app_key, true)` freeze holds before it is treated as lapsed.
    pub default_ttl_seconds: i64,
}

impl Default for FreezeConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 86_400,
        }
    }
}

/// Freeze Registry (C3): per-application flag consulted before any deploy or
/// undeploy is fanned out. Absent or lapsed rows read as "not frozen".
#[derive(Clone)]
pub struct FreezeRegistry {
    pool: SqlitePool,
    config: FreezeConfig,
}

impl FreezeRegistry {
    pub fn new(pool: SqlitePool, config: FreezeConfig) -> Self {
        Self { pool, config }
    }

    /// `set(app_key, frozen)`: upserts the flag with a fresh expiry window.
    pub async fn set(&self, app_key: &str, frozen: bool) -> Result<()> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.default_ttl_seconds);

        sqlx::query(
            r#"
            INSERT INTO freezes (app_key, frozen, set_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(app_key) DO UPDATE SET
                frozen = excluded.frozen,
                set_at = excluded.set_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(app_key)
        .bind(frozen)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("failed to set freeze {app_key}: {e}")))?;

        info!(app_key, frozen, "freeze flag updated");
        Ok(())
    }

    /// `is_frozen(app_key) -> bool`: absent or lapsed rows read as unfrozen.
    pub async fn is_frozen(&self, app_key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT frozen, expires_at FROM freezes WHERE app_key = ?1")
            .bind(app_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("failed to query freeze {app_key}: {e}")))?;

        let Some(row) = row else {
            return Ok(false);
        };

        let frozen: bool = row.get("frozen");
        let expires_at: String = row.get("expires_at");
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| Error::Storage(format!("invalid expires_at: {e}")))?
            .with_timezone(&Utc);

        Ok(frozen && Utc::now() <= expires_at)
    }

    /// Clears lapsed rows so the table doesn't grow unbounded.
    pub async fn cleanup_lapsed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM freezes WHERE expires_at < ?1")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("failed to cleanup freezes: {e}")))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::Id;
    use orc_store::Db;

    async fn test_db() -> Db {
        let path = format!("test_freeze_{}.db", Id::new());
        Db::new(&path).await.expect("db init")
    }

    #[tokio::test]
    async fn unset_app_reads_as_not_frozen() {
        let db = test_db().await;
        let registry = FreezeRegistry::new(db.pool().clone(), FreezeConfig::default());

        assert!(!registry.is_frozen("acme-web-main").await.expect("query"));
    }

    #[tokio::test]
    async fn set_frozen_then_unfreeze_round_trips() {
        let db = test_db().await;
        let registry = FreezeRegistry::new(db.pool().clone(), FreezeConfig::default());

        registry.set("acme-web-main", true).await.expect("set");
        assert!(registry.is_frozen("acme-web-main").await.expect("query"));

        registry.set("acme-web-main", false).await.expect("unset");
        assert!(!registry.is_frozen("acme-web-main").await.expect("query"));
    }

    #[tokio::test]
    async fn lapsed_freeze_reads_as_not_frozen() {
        let db = test_db().await;
        let registry = FreezeRegistry::new(
            db.pool().clone(),
            FreezeConfig {
                default_ttl_seconds: -1,
            },
        );

        registry.set("acme-web-main", true).await.expect("set");
        assert!(!registry.is_frozen("acme-web-main").await.expect("query"));
    }

    #[tokio::test]
    async fn cleanup_removes_only_lapsed_rows() {
        let db = test_db().await;
        let registry = FreezeRegistry::new(db.pool().clone(), FreezeConfig::default());
        let lapsed = FreezeRegistry::new(
            db.pool().clone(),
            FreezeConfig {
                default_ttl_seconds: -1,
            },
        );

        registry.set("acme-web-main", true).await.expect("set live");
        lapsed.set("acme-api-main", true).await.expect("set lapsed");

        let removed = registry.cleanup_lapsed().await.expect("cleanup");
        assert_eq!(removed, 1);
        assert!(registry.is_frozen("acme-web-main").await.expect("still frozen"));
    }
}
