//! ABOUTME: Append-only event log backing the orchestrator's observability story
//! ABOUTME: Events are never mutated; this is the only write surface for them

use orc_core::{time::now_iso8601, Error, Id, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// An append-only record of a significant job transition.
///
/// `component` is always `"orchestrator"`; `meta_info` typically carries
/// `job_id`/`owner`/`repo`/`ref` so a job's timeline can be reconstructed
/// from the event log alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub job_id: Option<String>,
    pub component: String,
    pub event_type: String,
    pub details: serde_json::Value,
    pub meta_info: serde_json::Value,
    pub created_at: String,
}

/// Request to append a new event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub job_id: Option<String>,
    pub event_type: String,
    pub details: serde_json::Value,
    pub meta_info: serde_json::Value,
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event> {
    let details: String = row.try_get("details").map_err(|e| Error::Database(e.to_string()))?;
    let meta_info: String = row.try_get("meta_info").map_err(|e| Error::Database(e.to_string()))?;

    Ok(Event {
        id: row.try_get("id").map_err(|e| Error::Database(e.to_string()))?,
        job_id: row.try_get("job_id").map_err(|e| Error::Database(e.to_string()))?,
        component: "orchestrator".to_string(),
        event_type: row.try_get("event_type").map_err(|e| Error::Database(e.to_string()))?,
        details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
        meta_info: serde_json::from_str(&meta_info).unwrap_or(serde_json::Value::Null),
        created_at: row.try_get("created_at").map_err(|e| Error::Database(e.to_string()))?,
    })
}

/// Event repository: insert-only, as the Job Store contract requires.
pub struct EventRepository<'a> {
    pool: &'a SqlitePool,
    retention: std::time::Duration,
}

const DEFAULT_EVENT_RETENTION: std::time::Duration = std::time::Duration::from_secs(4 * 7 * 24 * 3600);

impl<'a> EventRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool, retention: DEFAULT_EVENT_RETENTION }
    }

    pub fn with_retention(pool: &'a SqlitePool, retention: std::time::Duration) -> Self {
        Self { pool, retention }
    }

    /// `append_event`: insert-only.
    pub async fn append(&self, request: NewEvent) -> Result<Event> {
        let id = Id::new().to_string();
        let now = now_iso8601();
        let expiry = orc_core::to_rfc3339(orc_core::utc_now() + self.retention);
        let details = serde_json::to_string(&request.details).unwrap_or_default();
        let meta_info = serde_json::to_string(&request.meta_info).unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO events (id, job_id, event_type, details, meta_info, created_at, expiry)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&id)
        .bind(&request.job_id)
        .bind(&request.event_type)
        .bind(&details)
        .bind(&meta_info)
        .bind(&now)
        .bind(&expiry)
        .execute(self.pool)
        .await
        .map_err(|e| Error::Database(format!("failed to append event: {e}")))?;

        Ok(Event {
            id,
            job_id: request.job_id,
            component: "orchestrator".to_string(),
            event_type: request.event_type,
            details: request.details,
            meta_info: request.meta_info,
            created_at: now,
        })
    }

    /// Ordered read for tests/diagnostics; not a public query surface.
    pub async fn list_for_job(&self, job_id: &str) -> Result<Vec<Event>> {
        let rows = sqlx::query("SELECT * FROM events WHERE job_id = ?1 ORDER BY created_at ASC")
            .bind(job_id)
            .fetch_all(self.pool)
            .await
            .map_err(|e| Error::Database(format!("failed to list events: {e}")))?;

        rows.iter().map(row_to_event).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    async fn test_db() -> Db {
        let path = format!("test_events_{}.db", Id::new());
        Db::new(&path).await.expect("db init")
    }

    #[tokio::test]
    async fn append_then_list_preserves_order() {
        let db = test_db().await;
        let repo = EventRepository::new(db.pool());

        repo.append(NewEvent {
            job_id: Some("job-1".into()),
            event_type: "NEW_JOB".into(),
            details: serde_json::json!({}),
            meta_info: serde_json::json!({"owner": "acme"}),
        })
        .await
        .expect("append");

        repo.append(NewEvent {
            job_id: Some("job-1".into()),
            event_type: "CALLBACK_HOOK".into(),
            details: serde_json::json!({}),
            meta_info: serde_json::json!({}),
        })
        .await
        .expect("append");

        let events = repo.list_for_job("job-1").await.expect("list");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "NEW_JOB");
        assert_eq!(events[1].event_type, "CALLBACK_HOOK");
    }

    #[tokio::test]
    async fn events_are_never_mutated_only_appended() {
        let db = test_db().await;
        let repo = EventRepository::new(db.pool());

        let first = repo
            .append(NewEvent {
                job_id: None,
                event_type: "JOB_FAILED".into(),
                details: serde_json::json!({"code": "INTERNAL"}),
                meta_info: serde_json::json!({}),
            })
            .await
            .expect("append");

        assert_eq!(first.event_type, "JOB_FAILED");
    }
}
