//! ABOUTME: Hook application (part of C10): applies one signal to a correlated job
//! ABOUTME: Runs after correlation and before readiness evaluation, per §4.6

use orc_config::job_config::{extract_builder_image, EvaluatedConfig};
use orc_core::Result;
use orc_pipeline::FreezeRegistry;
use orc_store::{EventRepository, HookStatus, Job, JobRepository, JobState, NewEvent};
use tracing::info;

/// One inbound hook signal (§3 "Hook signal"), scoped to the job's own
/// `(owner, repo, ref)` — the correlation key travels alongside it, not inside.
#[derive(Debug, Clone)]
pub struct HookSignal {
    pub hook_type: String,
    pub hook_name: String,
    pub hook_status: HookStatus,
    pub hook_result: Option<serde_json::Value>,
    pub force_deploy: bool,
}

/// What step 3/4 of hook application decided, so `handle_hook` knows whether
/// to continue into readiness evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Job moved to `NOOP`; the caller should notify success and stop.
    Noop,
    /// The `(hook_type, hook_name)` pair was absent or disabled; job untouched.
    Ignored,
    /// The signal was applied; job is `SCHEDULED` and ready for readiness evaluation.
    Applied,
}

/// `apply_hook` (§4.6): mutates `job` in place and persists it via `jobs`,
/// appending whichever lifecycle event the outcome calls for.
pub async fn apply_hook(
    jobs: &JobRepository<'_>,
    events: &EventRepository<'_>,
    freezes: &FreezeRegistry,
    app_key: &str,
    job: &mut Job,
    config: &EvaluatedConfig,
    signal: &HookSignal,
) -> Result<ApplyOutcome> {
    let noop = if signal.hook_type == "scm-create" {
        freezes.set(app_key, false).await?;
        events
            .append(NewEvent {
                job_id: Some(job.job_id.clone()),
                event_type: "SETUP_APPLICATION_COMPLETE".to_string(),
                details: serde_json::json!({}),
                meta_info: serde_json::json!({"app_key": app_key}),
            })
            .await?;
        true
    } else {
        freezes.is_frozen(app_key).await?
    };

    let no_enabled_builder = config.enabled_hooks("builder").is_empty();
    let no_enabled_deployer = config.enabled_deployers().is_empty();

    if noop || !config.enabled || no_enabled_builder || no_enabled_deployer {
        job.state = JobState::Noop;
        jobs.upsert_job(job).await?;
        events
            .append(NewEvent {
                job_id: Some(job.job_id.clone()),
                event_type: "JOB_NOOP".to_string(),
                details: serde_json::json!({}),
                meta_info: serde_json::json!({"app_key": app_key}),
            })
            .await?;
        return Ok(ApplyOutcome::Noop);
    }

    let entry_enabled = config
        .hooks
        .get(&signal.hook_type)
        .and_then(|names| names.get(&signal.hook_name))
        .map(|entry| entry.enabled)
        .unwrap_or(false);

    if !entry_enabled {
        events
            .append(NewEvent {
                job_id: Some(job.job_id.clone()),
                event_type: "HOOK_IGNORED".to_string(),
                details: serde_json::json!({"hook_type": signal.hook_type, "hook_name": signal.hook_name}),
                meta_info: serde_json::json!({"app_key": app_key}),
            })
            .await?;
        return Ok(ApplyOutcome::Ignored);
    }

    job.state = JobState::Scheduled;
    job.hooks
        .entry(signal.hook_type.clone())
        .or_default()
        .insert(signal.hook_name.clone(), signal.hook_status);
    job.force_deploy = signal.force_deploy;

    if signal.hook_type == "builder" && signal.hook_status == HookStatus::Success {
        if let Some(hook_result) = &signal.hook_result {
            if let Some(image) = extract_builder_image(&signal.hook_name, hook_result) {
                let mut evaluated: EvaluatedConfig = serde_json::from_value(job.config.clone())
                    .unwrap_or_else(|_| config.clone());
                evaluated.apply_image(&image);
                job.config = serde_json::to_value(&evaluated)
                    .map_err(|e| orc_core::Error::Storage(format!("failed to re-snapshot config: {e}")))?;
                info!(job_id = %job.job_id, image, "applied builder image to deployer templates");
            }
        }
    }

    jobs.upsert_job(job).await?;
    Ok(ApplyOutcome::Applied)
}
