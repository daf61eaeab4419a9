//! ABOUTME: Wraps the deploy/undeploy HTTP clients (C7/C8) as pipeline runtime tasks
//! ABOUTME: Retry classification and policy come straight from orc_deploy/orc_config

use async_trait::async_trait;
use orc_config::job_config::DeployerEntry;
use orc_config::FanoutConfig;
use orc_deploy::{DeployError, DeployRequest, DeployerClient};
use orc_pipeline::{CancelToken, RetryPolicy, Task, TaskError, TaskResult};
use std::sync::Arc;
use std::time::Duration;

fn record_attempt(metrics: &Option<Arc<orc_obs::Metrics>>) {
    if let Some(metrics) = metrics {
        metrics.inc_deploy_requests();
    }
}

fn record_failure(metrics: &Option<Arc<orc_obs::Metrics>>, error: &TaskError) {
    if matches!(error, TaskError::Fatal(_)) {
        if let Some(metrics) = metrics {
            metrics.inc_deploy_failures();
        }
    }
}

fn to_task_error(err: DeployError) -> TaskError {
    match err {
        DeployError::Retryable(msg) => TaskError::Retryable(msg),
        DeployError::Fatal(msg) => TaskError::Fatal(msg),
    }
}

/// One deployer's `POST .../apps` leg of the deploy fan-out (§4.7).
pub struct DeployTask {
    pub deployer_name: String,
    pub deployer: DeployerEntry,
    pub request: DeployRequest,
    pub client: DeployerClient,
    pub retry_policy: RetryPolicy,
    pub metrics: Option<Arc<orc_obs::Metrics>>,
}

#[async_trait]
impl Task for DeployTask {
    async fn run(&self, _cancel: &CancelToken) -> TaskResult<serde_json::Value> {
        record_attempt(&self.metrics);

        let outcome = self
            .client
            .deploy(&self.deployer_name, &self.deployer, self.request.clone())
            .await
            .map_err(to_task_error)
            .map_err(|err| {
                record_failure(&self.metrics, &err);
                err
            })?;

        Ok(serde_json::json!({
            "deployer": self.deployer_name,
            "status": outcome.status,
            "body": outcome.body,
        }))
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }

    fn name(&self) -> &str {
        &self.deployer_name
    }
}

/// One deployer's `DELETE .../apps/{owner}-{repo}-{ref}` leg of the undeploy fan-out (§4.8).
pub struct UndeployTask {
    pub deployer_name: String,
    pub deployer: DeployerEntry,
    pub owner: String,
    pub repo: String,
    pub r#ref: String,
    pub client: DeployerClient,
    pub retry_policy: RetryPolicy,
    pub metrics: Option<Arc<orc_obs::Metrics>>,
}

#[async_trait]
impl Task for UndeployTask {
    async fn run(&self, _cancel: &CancelToken) -> TaskResult<serde_json::Value> {
        record_attempt(&self.metrics);

        let outcome = self
            .client
            .undeploy(&self.deployer_name, &self.deployer, &self.owner, &self.repo, &self.r#ref)
            .await
            .map_err(to_task_error)
            .map_err(|err| {
                record_failure(&self.metrics, &err);
                err
            })?;

        Ok(serde_json::json!({
            "deployer": self.deployer_name,
            "status": outcome.status,
            "body": outcome.body,
        }))
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }

    fn name(&self) -> &str {
        &self.deployer_name
    }
}

/// `N_deploy`/`d_deploy` retry policy (§4.7 defaults: 10 attempts, 20 s).
pub fn deploy_retry_policy(fanout: &FanoutConfig) -> RetryPolicy {
    RetryPolicy::fixed(
        fanout.deploy_retry_attempts,
        Duration::from_secs(fanout.deploy_retry_delay_seconds),
    )
}

/// `N_default`/`d_default` retry policy (§4.8 defaults: 5 attempts, 10 s).
pub fn undeploy_retry_policy(fanout: &FanoutConfig) -> RetryPolicy {
    RetryPolicy::fixed(
        fanout.default_retry_attempts,
        Duration::from_secs(fanout.default_retry_delay_seconds),
    )
}
