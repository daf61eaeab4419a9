//! ABOUTME: Minimal file-backed stand-in for the external Config collaborator (§6.3)
//! ABOUTME: Not a hierarchical loader: reads one JSON map, keyed by app_key, at each call

use async_trait::async_trait;
use orc_config::job_config::EvaluatedConfig;
use orc_core::{Error, Result};
use orc_orchestrator::ConfigLoader;
use std::collections::HashMap;

/// Reads `{"env-owner-repo-ref": EvaluatedConfig, ...}` from a JSON file on
/// every call. Missing entries resolve to a disabled config rather than an
/// error, matching the "no enabled deployer" noop path in hook application.
pub struct StaticConfigLoader {
    path: String,
}

impl StaticConfigLoader {
    pub fn new(path: String) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ConfigLoader for StaticConfigLoader {
    async fn load_config(
        &self,
        env: &str,
        owner: &str,
        repo: &str,
        r#ref: &str,
        _default_variables: &HashMap<String, serde_json::Value>,
    ) -> Result<EvaluatedConfig> {
        let app_key = format!("{env}-{owner}-{repo}-{ref}");

        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Ok(EvaluatedConfig::default()),
        };

        let mut table: HashMap<String, EvaluatedConfig> = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", self.path)))?;

        Ok(table.remove(&app_key).unwrap_or_default())
    }
}
