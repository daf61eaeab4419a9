//! ABOUTME: Hook Correlator (C5): locates-or-creates the active job for a signal
//! ABOUTME: Must be called under the application lock; enforces the one-active-job invariant

use orc_config::job_config::EvaluatedConfig;
use orc_core::{Error, Result};
use orc_store::{EventRepository, HookMatrix, HookStatus, Job, JobRepository, NewEvent};
use std::collections::BTreeMap;
use tracing::debug;

/// Builds the initial `hook_type -> hook_name -> pending` matrix from the
/// enabled set in the evaluated config (§4.4.1). Disabled hooks are absent.
pub fn enabled_hook_matrix(config: &EvaluatedConfig) -> HookMatrix {
    let mut matrix: HookMatrix = BTreeMap::new();
    for (hook_type, names) in &config.hooks {
        let enabled: BTreeMap<String, HookStatus> = names
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, _)| (name.clone(), HookStatus::Pending))
            .collect();
        if !enabled.is_empty() {
            matrix.insert(hook_type.clone(), enabled);
        }
    }
    matrix
}

/// `correlate(config, owner, repo, ref, commit?, force_deploy?) -> job` (§4.4).
/// Caller must already hold the application lock for `(owner, repo, ref)`.
pub async fn correlate(
    jobs: &JobRepository<'_>,
    events: &EventRepository<'_>,
    config: &EvaluatedConfig,
    owner: &str,
    repo: &str,
    r#ref: &str,
    commit: Option<String>,
    force_deploy: bool,
) -> Result<Job> {
    let mut active = jobs.find_active(owner, repo, r#ref).await?;
    // Tie-break for multiple active jobs (should not arise): most-recently-modified.
    active.sort_by(|a, b| a.modified.cmp(&b.modified));

    if let Some(mut job) = active.pop() {
        let supersedes = match &commit {
            Some(c) => !job.git.commit_set.contains(c),
            None => false,
        };

        if supersedes {
            let commit = commit.expect("supersedes implies Some");
            job.git.commit_set.push(commit.clone());
            job.git.commit = Some(commit);
            job.config = serde_json::to_value(config)
                .map_err(|e| Error::Storage(format!("failed to snapshot config: {e}")))?;
            for (_, names) in job.hooks.iter_mut() {
                for (_, status) in names.iter_mut() {
                    *status = HookStatus::Pending;
                }
            }
            jobs.upsert_job(&mut job).await?;
            debug!(job_id = %job.job_id, "correlated new commit onto active job");
        }

        return Ok(job);
    }

    let config_value = serde_json::to_value(config)
        .map_err(|e| Error::Storage(format!("failed to snapshot config: {e}")))?;
    let mut job = Job::new_for_signal(
        owner,
        repo,
        r#ref,
        commit,
        force_deploy,
        config_value,
        enabled_hook_matrix(config),
    );

    events
        .append(NewEvent {
            job_id: Some(job.job_id.clone()),
            event_type: "NEW_JOB".to_string(),
            details: serde_json::json!({}),
            meta_info: serde_json::json!({"owner": owner, "repo": repo, "ref": r#ref}),
        })
        .await?;

    jobs.upsert_job(&mut job).await?;
    debug!(job_id = %job.job_id, "created new job");
    Ok(job)
}

/// `true` once a job has moved past `{NEW, SCHEDULED}`.
pub fn is_terminal(job: &Job) -> bool {
    !job.state.is_active()
}
