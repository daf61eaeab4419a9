//! ABOUTME: External collaborator interfaces and per-request contexts (§6.3, §6.4)
//! ABOUTME: ConfigLoader supplies per-job config; notify_ctx/search_params ride along errors

use async_trait::async_trait;
use orc_config::job_config::EvaluatedConfig;
use orc_core::Result;
use std::collections::HashMap;

/// The external "Config collaborator" (§6.3): hierarchical config
/// loading/merging/templating lives outside the core. The core only ever
/// sees the merged, template-evaluated result.
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    async fn load_config(
        &self,
        env: &str,
        owner: &str,
        repo: &str,
        r#ref: &str,
        default_variables: &HashMap<String, serde_json::Value>,
    ) -> Result<EvaluatedConfig>;
}

/// Context threaded through a hook's lifecycle for notifications, built once
/// at the top of `handle_hook`/`undeploy` and carried into the error router.
#[derive(Debug, Clone)]
pub struct NotifyCtx {
    pub env: String,
    pub owner: String,
    pub repo: String,
    pub r#ref: String,
    pub job_id: Option<String>,
}

impl NotifyCtx {
    pub fn app_key(&self) -> String {
        format!("{}-{}-{}-{}", self.env, self.owner, self.repo, self.r#ref)
    }
}

/// Search-indexing parameters forwarded to the error router for an external
/// search/indexing collaborator; the core itself only writes events (§1 Non-goals).
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub fields: HashMap<String, serde_json::Value>,
}
