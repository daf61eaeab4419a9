//! ABOUTME: Top-level orchestration flows (C10) composing C2-C9, and the error router (C11)
//! ABOUTME: `handle_hook` and `undeploy` are the only two public entry points into the core

use crate::context::{ConfigLoader, NotifyCtx, SearchParams};
use crate::correlator::correlate;
use crate::deploy_tasks::{deploy_retry_policy, undeploy_retry_policy, DeployTask, UndeployTask};
use crate::hooks::{apply_hook, ApplyOutcome, HookSignal};
use crate::notifier::NotifierCollaborator;
use crate::readiness::evaluate;
use orc_config::job_config::{DeployerEntry, EvaluatedConfig};
use orc_core::{Error, Result};
use orc_deploy::{DeployRequest, DeployerClient};
use orc_notify::NotificationKind;
use orc_pipeline::{FreezeRegistry, LockService, PipelineRuntime, Task};
use orc_store::{EventRepository, HookStatus, Job, JobRepository, JobState, NewEvent};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, instrument};

/// One inbound webhook arrival, as handed to `handle_hook` by the (out of
/// scope) authenticated HTTP layer.
#[derive(Debug, Clone)]
pub struct HandleHookRequest {
    pub env: String,
    pub owner: String,
    pub repo: String,
    pub r#ref: String,
    pub hook_type: String,
    pub hook_name: String,
    pub hook_status: HookStatus,
    pub hook_result: Option<serde_json::Value>,
    pub commit: Option<String>,
    pub force_deploy: bool,
}

/// Composes the Lock Service, Freeze Registry, Job Store, Pipeline Runtime,
/// Deploy/Undeploy Fan-out clients, and the Config/Notifier collaborators into
/// the two top-level flows. Holds no domain state itself.
pub struct Orchestrator {
    pool: SqlitePool,
    lock: LockService,
    freezes: FreezeRegistry,
    runtime: PipelineRuntime,
    deploy_client: DeployerClient,
    fanout: orc_config::FanoutConfig,
    config_loader: Arc<dyn ConfigLoader>,
    notifier: Arc<dyn NotifierCollaborator>,
    metrics: Option<Arc<orc_obs::Metrics>>,
}

impl Orchestrator {
    pub fn new(
        pool: SqlitePool,
        lock: LockService,
        freezes: FreezeRegistry,
        runtime: PipelineRuntime,
        fanout: orc_config::FanoutConfig,
        config_loader: Arc<dyn ConfigLoader>,
        notifier: Arc<dyn NotifierCollaborator>,
    ) -> Self {
        Self {
            pool,
            lock,
            freezes,
            runtime,
            deploy_client: DeployerClient::new(),
            fanout,
            config_loader,
            notifier,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<orc_obs::Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// `handle_hook` (§4.10).
    #[instrument(skip(self, request), fields(owner = %request.owner, repo = %request.repo, r#ref = %request.r#ref))]
    pub async fn handle_hook(&self, request: HandleHookRequest) -> Result<Job> {
        let mut notify_ctx = NotifyCtx {
            env: request.env.clone(),
            owner: request.owner.clone(),
            repo: request.repo.clone(),
            r#ref: request.r#ref.clone(),
            job_id: None,
        };
        let search_params = SearchParams::default();
        let app_key = notify_ctx.app_key();

        let config = match self
            .config_loader
            .load_config(&request.env, &request.owner, &request.repo, &request.r#ref, &HashMap::new())
            .await
        {
            Ok(config) => config,
            Err(err) => {
                self.handle_job_error(&err, &EvaluatedConfig::default(), &notify_ctx, &search_params, None)
                    .await;
                return Err(err);
            }
        };

        self.notifier
            .notify(
                "Webhook received",
                &format!(
                    "Received webhook {}/{} with status {:?}",
                    request.hook_type, request.hook_name, request.hook_status
                ),
                &notify_ctx,
                NotificationKind::Started,
                &config.notifications,
            )
            .await
            .ok();

        let events = EventRepository::new(&self.pool);
        events
            .append(NewEvent {
                job_id: None,
                event_type: "CALLBACK_HOOK".to_string(),
                details: serde_json::json!({"hook_type": request.hook_type, "hook_name": request.hook_name}),
                meta_info: serde_json::json!({"owner": request.owner, "repo": request.repo, "ref": request.r#ref}),
            })
            .await
            .ok();

        let result = self.run_locked_sub_pipeline(&request, &config, &app_key, &mut notify_ctx).await;

        match result {
            Ok(job) => Ok(job),
            Err(err) => {
                self.handle_job_error(&err, &config, &notify_ctx, &search_params, notify_ctx.job_id.clone())
                    .await;
                Err(err)
            }
        }
    }

    async fn run_locked_sub_pipeline(
        &self,
        request: &HandleHookRequest,
        config: &EvaluatedConfig,
        app_key: &str,
        notify_ctx: &mut NotifyCtx,
    ) -> Result<Job> {
        let jobs = JobRepository::new(&self.pool);
        let events = EventRepository::new(&self.pool);

        let guard = self.lock.acquire(app_key).await?;
        events
            .append(NewEvent {
                job_id: None,
                event_type: "ACQUIRED_LOCK".to_string(),
                details: serde_json::json!({}),
                meta_info: serde_json::json!({"app_key": app_key}),
            })
            .await
            .ok();

        let mut job = correlate(
            &jobs,
            &events,
            config,
            &request.owner,
            &request.repo,
            &request.r#ref,
            request.commit.clone(),
            request.force_deploy,
        )
        .await?;
        notify_ctx.job_id = Some(job.job_id.clone());

        if let Some(commit) = &request.commit {
            if job.git.commit.as_deref() != Some(commit.as_str()) {
                events
                    .append(NewEvent {
                        job_id: Some(job.job_id.clone()),
                        event_type: "COMMIT_IGNORED".to_string(),
                        details: serde_json::json!({"commit": commit}),
                        meta_info: serde_json::json!({"app_key": app_key}),
                    })
                    .await?;
                guard.release().await.ok();
                return Ok(job);
            }
        }

        let signal = HookSignal {
            hook_type: request.hook_type.clone(),
            hook_name: request.hook_name.clone(),
            hook_status: request.hook_status,
            hook_result: request.hook_result.clone(),
            force_deploy: request.force_deploy,
        };

        let outcome = apply_hook(&jobs, &events, &self.freezes, app_key, &mut job, config, &signal).await?;

        match outcome {
            ApplyOutcome::Noop => {
                self.notifier
                    .notify(
                        "Job is a no-op",
                        &format!("{app_key} requires no deploy for this signal"),
                        notify_ctx,
                        NotificationKind::Success,
                        &config.notifications,
                    )
                    .await
                    .ok();
                guard.release().await.ok();
                return Ok(job);
            }
            ApplyOutcome::Ignored => {
                guard.release().await.ok();
                return Ok(job);
            }
            ApplyOutcome::Applied => {}
        }

        let readiness = evaluate(&job);
        if !readiness.failed.is_empty() {
            jobs.update_state(&job.job_id, JobState::Failed).await.ok();
            guard.release().await.ok();
            return Err(Error::HooksFailed(readiness.failed));
        }
        if !readiness.pending.is_empty() {
            events
                .append(NewEvent {
                    job_id: Some(job.job_id.clone()),
                    event_type: "PENDING_HOOK".to_string(),
                    details: serde_json::json!({"pending": readiness.pending}),
                    meta_info: serde_json::json!({"app_key": app_key}),
                })
                .await?;
            guard.release().await.ok();
            return Ok(job);
        }

        let deploy_result = self.deploy_fan_out(&job, config, app_key, &events).await;
        guard.release().await.ok();

        match deploy_result {
            Ok(()) => {
                let job = jobs.update_state(&job.job_id, JobState::Complete).await?;
                events
                    .append(NewEvent {
                        job_id: Some(job.job_id.clone()),
                        event_type: "JOB_COMPLETE".to_string(),
                        details: serde_json::json!({}),
                        meta_info: serde_json::json!({"app_key": app_key}),
                    })
                    .await?;
                Ok(job)
            }
            Err(err) => Err(err),
        }
    }

    /// Deploy Fan-out (§4.7): one `DeployTask` per enabled deployer, joined via
    /// the pipeline runtime's chord. Any fatal branch short-circuits the whole join.
    async fn deploy_fan_out(
        &self,
        job: &Job,
        config: &EvaluatedConfig,
        app_key: &str,
        events: &EventRepository<'_>,
    ) -> Result<()> {
        let evaluated: EvaluatedConfig =
            serde_json::from_value(job.config.clone()).unwrap_or_else(|_| config.clone());

        let meta_info = serde_json::json!({
            "owner": job.git.owner,
            "repo": job.git.repo,
            "ref": job.git.r#ref,
            "commit": job.git.commit,
        });

        let group: Vec<Arc<dyn Task>> = evaluated
            .enabled_deployers()
            .into_iter()
            .map(|(name, deployer): (&String, &DeployerEntry)| {
                let request = DeployRequest {
                    meta_info: meta_info.clone(),
                    proxy: deployer.proxy.clone(),
                    templates: deployer.templates.clone(),
                    deployment: deployer.deployment.clone(),
                    security: serde_json::to_value(&evaluated.security).unwrap_or(serde_json::Value::Null),
                    notifications: evaluated.notifications.clone(),
                };
                Arc::new(DeployTask {
                    deployer_name: name.clone(),
                    deployer: deployer.clone(),
                    request,
                    client: self.deploy_client.clone(),
                    retry_policy: deploy_retry_policy(&self.fanout),
                    metrics: self.metrics.clone(),
                }) as Arc<dyn Task>
            })
            .collect();

        if group.is_empty() {
            return Ok(());
        }

        match self.runtime.chord(&job.job_id, group).await {
            Ok(results) => {
                for result in results {
                    events
                        .append(NewEvent {
                            job_id: Some(job.job_id.clone()),
                            event_type: "DEPLOY_REQUESTED".to_string(),
                            details: result,
                            meta_info: serde_json::json!({"app_key": app_key}),
                        })
                        .await?;
                }
                Ok(())
            }
            Err(task_err) => Err(Error::DeployRequestFailed(task_err.to_string())),
        }
    }

    /// `undeploy` (§4.11).
    #[instrument(skip(self), fields(%owner, %repo, r#ref = %ref_name))]
    pub async fn undeploy(&self, env: &str, owner: &str, repo: &str, ref_name: &str) -> Result<()> {
        let mut notify_ctx = NotifyCtx {
            env: env.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            r#ref: ref_name.to_string(),
            job_id: None,
        };
        let search_params = SearchParams::default();
        let app_key = notify_ctx.app_key();

        let config = match self
            .config_loader
            .load_config(env, owner, repo, ref_name, &HashMap::new())
            .await
        {
            Ok(config) => config,
            Err(err) => {
                self.handle_job_error(&err, &EvaluatedConfig::default(), &notify_ctx, &search_params, None)
                    .await;
                return Err(err);
            }
        };

        let events = EventRepository::new(&self.pool);
        events
            .append(NewEvent {
                job_id: None,
                event_type: "UNDEPLOY_HOOK".to_string(),
                details: serde_json::json!({}),
                meta_info: serde_json::json!({"app_key": app_key}),
            })
            .await
            .ok();
        self.notifier
            .notify(
                "Undeploy requested",
                &format!("Undeploying {app_key}"),
                &notify_ctx,
                NotificationKind::Started,
                &config.notifications,
            )
            .await
            .ok();

        let result = self.run_undeploy_sub_pipeline(owner, repo, ref_name, &config, &app_key, &events).await;

        if let Err(err) = &result {
            let job_id = notify_ctx.job_id.take();
            self.handle_job_error(err, &config, &notify_ctx, &search_params, job_id).await;
        }
        result
    }

    async fn run_undeploy_sub_pipeline(
        &self,
        owner: &str,
        repo: &str,
        ref_name: &str,
        config: &EvaluatedConfig,
        app_key: &str,
        events: &EventRepository<'_>,
    ) -> Result<()> {
        let guard = self.lock.acquire(app_key).await?;
        events
            .append(NewEvent {
                job_id: None,
                event_type: "ACQUIRED_LOCK".to_string(),
                details: serde_json::json!({}),
                meta_info: serde_json::json!({"app_key": app_key}),
            })
            .await
            .ok();
        self.freezes.set(app_key, true).await?;

        let group: Vec<Arc<dyn Task>> = config
            .enabled_deployers()
            .into_iter()
            .map(|(name, deployer)| {
                Arc::new(UndeployTask {
                    deployer_name: name.clone(),
                    deployer: deployer.clone(),
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    r#ref: ref_name.to_string(),
                    client: self.deploy_client.clone(),
                    retry_policy: undeploy_retry_policy(&self.fanout),
                    metrics: self.metrics.clone(),
                }) as Arc<dyn Task>
            })
            .collect();

        let job_key = format!("undeploy:{app_key}");
        let outcome = if group.is_empty() {
            Ok(Vec::new())
        } else {
            self.runtime.chord(&job_key, group).await
        };

        guard.release().await.ok();

        match outcome {
            Ok(results) => {
                for result in results {
                    events
                        .append(NewEvent {
                            job_id: None,
                            event_type: "UNDEPLOY_REQUESTED".to_string(),
                            details: result,
                            meta_info: serde_json::json!({"app_key": app_key}),
                        })
                        .await?;
                }
                Ok(())
            }
            Err(task_err) => Err(Error::DeployRequestFailed(task_err.to_string())),
        }
    }

    /// `_handle_job_error` (C11, §4.12). Best-effort: logging/notification failures
    /// here never mask the original error returned to the caller.
    async fn handle_job_error(
        &self,
        err: &Error,
        config: &EvaluatedConfig,
        notify_ctx: &NotifyCtx,
        _search_params: &SearchParams,
        job_id: Option<String>,
    ) {
        let normalized = err.to_normalized();
        error!(app_key = %notify_ctx.app_key(), code = %normalized.code, message = %normalized.message, "job failed");

        self.notifier
            .notify(
                "Job failed",
                &normalized.message,
                notify_ctx,
                NotificationKind::Failed,
                &config.notifications,
            )
            .await
            .ok();

        let events = EventRepository::new(&self.pool);
        events
            .append(NewEvent {
                job_id: job_id.clone(),
                event_type: "JOB_FAILED".to_string(),
                details: serde_json::to_value(&normalized).unwrap_or(serde_json::Value::Null),
                meta_info: serde_json::json!({"app_key": notify_ctx.app_key()}),
            })
            .await
            .ok();

        if let Some(job_id) = job_id {
            let jobs = JobRepository::new(&self.pool);
            let _ = jobs.update_state(&job_id, JobState::Failed).await;
        }
    }
}
