//! ABOUTME: Job repository backing the job lifecycle engine's correlation store
//! ABOUTME: Uses runtime-checked queries; the job payload is denormalized JSON

use orc_core::{time::now_iso8601, Error, Id, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    New,
    Scheduled,
    Complete,
    Noop,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "NEW",
            JobState::Scheduled => "SCHEDULED",
            JobState::Complete => "COMPLETE",
            JobState::Noop => "NOOP",
            JobState::Failed => "FAILED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobState::New | JobState::Scheduled)
    }
}

/// `(owner, repo, ref, commit, commit_set)` — the correlation identity of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitInfo {
    pub owner: String,
    pub repo: String,
    #[serde(rename = "ref")]
    pub r#ref: String,
    pub commit: Option<String>,
    pub commit_set: Vec<String>,
}

/// Hook application status, as recorded in a job's hook matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStatus {
    Pending,
    Success,
    Failed,
}

/// `hook_type -> hook_name -> status`. Only enabled hooks are present.
pub type HookMatrix = BTreeMap<String, BTreeMap<String, HookStatus>>;

/// The central correlation record described in the data model: a job is
/// one unit of work for a single `(owner, repo, ref)` target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub state: JobState,
    pub config: serde_json::Value,
    pub git: GitInfo,
    pub hooks: HookMatrix,
    pub force_deploy: bool,
    pub modified: String,
}

impl Job {
    /// Build a brand-new job in state `NEW`, per the Hook Correlator contract.
    pub fn new_for_signal(
        owner: &str,
        repo: &str,
        r#ref: &str,
        commit: Option<String>,
        force_deploy: bool,
        config: serde_json::Value,
        hooks: HookMatrix,
    ) -> Self {
        Self {
            job_id: Id::new().to_string(),
            state: JobState::New,
            config,
            git: GitInfo {
                owner: owner.to_string(),
                repo: repo.to_string(),
                r#ref: r#ref.to_string(),
                commit: commit.clone(),
                commit_set: commit.into_iter().collect(),
            },
            hooks,
            force_deploy,
            modified: now_iso8601(),
        }
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let payload: String = row.try_get("payload").map_err(|e| Error::Database(e.to_string()))?;
    serde_json::from_str(&payload).map_err(|e| Error::Storage(format!("failed to decode job payload: {e}")))
}

/// Job repository. Job retention default matches the 4-week default
/// documented for background expiry.
pub struct JobRepository<'a> {
    pool: &'a SqlitePool,
    retention: std::time::Duration,
}

const DEFAULT_RETENTION: std::time::Duration = std::time::Duration::from_secs(4 * 7 * 24 * 3600);

impl<'a> JobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool, retention: DEFAULT_RETENTION }
    }

    pub fn with_retention(pool: &'a SqlitePool, retention: std::time::Duration) -> Self {
        Self { pool, retention }
    }

    fn expiry_from_now(&self) -> String {
        orc_core::to_rfc3339(orc_core::utc_now() + self.retention)
    }

    /// `upsert_job`: replace-by `job_id`, stamping `modified`/`_expiry`. Idempotent per snapshot.
    pub async fn upsert_job(&self, job: &mut Job) -> Result<()> {
        job.modified = now_iso8601();
        let payload = serde_json::to_string(job)
            .map_err(|e| Error::Storage(format!("failed to encode job payload: {e}")))?;
        let expiry = self.expiry_from_now();

        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, owner, repo, ref_name, state, payload, modified, expiry)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(job_id) DO UPDATE SET
                owner = excluded.owner,
                repo = excluded.repo,
                ref_name = excluded.ref_name,
                state = excluded.state,
                payload = excluded.payload,
                modified = excluded.modified,
                expiry = excluded.expiry
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.git.owner)
        .bind(&job.git.repo)
        .bind(&job.git.r#ref)
        .bind(job.state.as_str())
        .bind(&payload)
        .bind(&job.modified)
        .bind(&expiry)
        .execute(self.pool)
        .await
        .map_err(|e| Error::Database(format!("failed to upsert job: {e}")))?;

        Ok(())
    }

    /// `find_active`: jobs in `{NEW, SCHEDULED}` for the correlation key, sorted by `modified` ascending.
    pub async fn find_active(&self, owner: &str, repo: &str, r#ref: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE owner = ?1 AND repo = ?2 AND ref_name = ?3
              AND state IN ('NEW', 'SCHEDULED')
            ORDER BY modified ASC
            "#,
        )
        .bind(owner)
        .bind(repo)
        .bind(r#ref)
        .fetch_all(self.pool)
        .await
        .map_err(|e| Error::Database(format!("failed to query active jobs: {e}")))?;

        rows.iter().map(row_to_job).collect()
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| Error::Database(format!("failed to fetch job: {e}")))?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// `update_state`: read-modify-write since the job snapshot is a single JSON column.
    pub async fn update_state(&self, job_id: &str, new_state: JobState) -> Result<Job> {
        let mut job = self
            .get(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        job.state = new_state;
        self.upsert_job(&mut job).await?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    async fn test_db() -> Db {
        let path = format!("test_jobs_{}.db", Id::new());
        Db::new(&path).await.expect("db init")
    }

    fn sample_job() -> Job {
        let mut hooks: HookMatrix = BTreeMap::new();
        hooks.insert("ci".into(), BTreeMap::from([("travis".into(), HookStatus::Pending)]));
        Job::new_for_signal("acme", "web", "main", Some("c1".into()), false, serde_json::json!({}), hooks)
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let db = test_db().await;
        let repo = JobRepository::new(db.pool());
        let mut job = sample_job();
        let job_id = job.job_id.clone();

        repo.upsert_job(&mut job).await.expect("upsert");
        let found = repo.get(&job_id).await.expect("get").expect("present");

        assert_eq!(found.job_id, job_id);
        assert_eq!(found.git.commit.as_deref(), Some("c1"));
        assert_eq!(found.state, JobState::New);
    }

    #[tokio::test]
    async fn find_active_excludes_terminal_states() {
        let db = test_db().await;
        let repo = JobRepository::new(db.pool());
        let mut job = sample_job();
        repo.upsert_job(&mut job).await.expect("upsert");

        let active = repo.find_active("acme", "web", "main").await.expect("query");
        assert_eq!(active.len(), 1);

        repo.update_state(&job.job_id, JobState::Complete).await.expect("update");
        let active = repo.find_active("acme", "web", "main").await.expect("query");
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn update_state_is_read_modify_write() {
        let db = test_db().await;
        let repo = JobRepository::new(db.pool());
        let mut job = sample_job();
        repo.upsert_job(&mut job).await.expect("upsert");

        let updated = repo.update_state(&job.job_id, JobState::Failed).await.expect("update");
        assert_eq!(updated.state, JobState::Failed);

        let reloaded = repo.get(&job.job_id).await.expect("get").expect("present");
        assert_eq!(reloaded.state, JobState::Failed);
    }
}
