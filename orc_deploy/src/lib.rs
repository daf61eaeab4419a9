//! ABOUTME: Deploy fan-out (C7) and undeploy fan-out (C8) HTTP clients
//! ABOUTME: One POST/DELETE per enabled deployer; response classification drives retry

use orc_config::job_config::DeployerEntry;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

/// Outcome of a terminal (non-retried) deploy/undeploy attempt, kept verbatim
/// on the `DEPLOY_REQUESTED`/`UNDEPLOY_REQUESTED` event.
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub status: u16,
    pub body: serde_json::Value,
}

impl DeployOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Classification of a failed attempt. Only `Retryable` should be retried by
/// the caller's retry policy; `Fatal` should be routed straight to the error
/// continuation (C11).
#[derive(Debug, Clone)]
pub enum DeployError {
    Retryable(String),
    Fatal(String),
}

impl std::fmt::Display for DeployError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable(msg) => write!(f, "retryable deploy error: {msg}"),
            Self::Fatal(msg) => write!(f, "fatal deploy error: {msg}"),
        }
    }
}

impl std::error::Error for DeployError {}

pub type Result<T> = std::result::Result<T, DeployError>;

/// Request body for `POST <deployer.url>/apps`, per §4.7: meta-info augmented
/// with the deployer's own name and url, plus the evaluated config's
/// proxy/templates/deployment/security/notifications subtrees.
#[derive(Debug, Clone, Serialize)]
pub struct DeployRequest {
    #[serde(rename = "meta-info")]
    pub meta_info: serde_json::Value,
    pub proxy: serde_json::Value,
    pub templates: serde_json::Value,
    pub deployment: serde_json::Value,
    pub security: serde_json::Value,
    pub notifications: serde_json::Value,
}

impl DeployRequest {
    pub fn augmented_with_deployer(mut self, deployer_name: &str, deployer: &DeployerEntry) -> Self {
        if let Some(meta) = self.meta_info.as_object_mut() {
            meta.insert(
                "deployer".to_string(),
                serde_json::json!({"name": deployer_name, "url": deployer.url}),
            );
        }
        self
    }
}

const DEPLOY_CONTENT_TYPE: &str = "application/vnd.deployer.app.version.create.v1+json";

/// HTTP client for the deployer fan-out contract. Stateless beyond its
/// `reqwest::Client`; every call targets one deployer's `url`.
#[derive(Debug, Clone)]
pub struct DeployerClient {
    client: Client,
}

impl DeployerClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// `POST <deployer.url>/apps`. `2xx` is success; `502`/`503` and transport
    /// errors are retryable; any other `>= 400` is fatal.
    pub async fn deploy(
        &self,
        deployer_name: &str,
        deployer: &DeployerEntry,
        request: DeployRequest,
    ) -> Result<DeployOutcome> {
        let request = request.augmented_with_deployer(deployer_name, deployer);
        let url = format!("{}/apps", deployer.url.trim_end_matches('/'));

        debug!(deployer = deployer_name, url = %url, "dispatching deploy request");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, DEPLOY_CONTENT_TYPE)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeployError::Retryable(format!("{deployer_name}: transport error: {e}")))?;

        let status = response.status();
        let body = response.json::<serde_json::Value>().await.unwrap_or(serde_json::Value::Null);

        classify_deploy_response(deployer_name, status, body)
    }

    /// `DELETE <deployer.url>/apps/{owner}-{repo}-{ref}`. Transport errors are
    /// retryable; any response (including non-2xx) is recorded, not retried.
    pub async fn undeploy(
        &self,
        deployer_name: &str,
        deployer: &DeployerEntry,
        owner: &str,
        repo: &str,
        ref_name: &str,
    ) -> Result<DeployOutcome> {
        let app_id = format!("{owner}-{repo}-{ref_name}");
        let url = format!("{}/apps/{}", deployer.url.trim_end_matches('/'), app_id);

        debug!(deployer = deployer_name, url = %url, "dispatching undeploy request");

        let response = self.client.delete(&url).send().await.map_err(|e| {
            DeployError::Retryable(format!("{deployer_name}: transport error: {e}"))
        })?;

        let status = response.status();
        let body = response.json::<serde_json::Value>().await.unwrap_or(serde_json::Value::Null);

        if !status.is_success() {
            warn!(deployer = deployer_name, %status, "undeploy returned non-success, not retrying");
        }

        Ok(DeployOutcome {
            status: status.as_u16(),
            body,
        })
    }
}

impl Default for DeployerClient {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_deploy_response(
    deployer_name: &str,
    status: StatusCode,
    body: serde_json::Value,
) -> Result<DeployOutcome> {
    if status.is_success() {
        return Ok(DeployOutcome {
            status: status.as_u16(),
            body,
        });
    }

    if status == StatusCode::BAD_GATEWAY || status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(DeployError::Retryable(format!(
            "{deployer_name}: {status} from deployer"
        )));
    }

    Err(DeployError::Fatal(format!(
        "{deployer_name}: deployment failed with {status}: {body}"
    )))
}
