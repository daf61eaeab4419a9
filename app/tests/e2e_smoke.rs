//! ABOUTME: End-to-end smoke test driving handle_hook through correlation, readiness,
//! ABOUTME: and deploy fan-out against a mock deployer, plus the observability server

use async_trait::async_trait;
use orc_config::job_config::{DeployerEntry, EvaluatedConfig, HookEntry};
use orc_core::telemetry;
use orc_notify::NotificationManager;
use orc_obs::ObsState;
use orc_orchestrator::{ConfigLoader, HandleHookRequest, NotifierCollaborator, Orchestrator, WebhookNotifier};
use orc_pipeline::{FreezeConfig, FreezeRegistry, LockConfig, LockService, PipelineRuntime, RuntimeConfig};
use orc_store::{Db, HookStatus, JobState};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FixedConfigLoader {
    config: EvaluatedConfig,
}

#[async_trait]
impl ConfigLoader for FixedConfigLoader {
    async fn load_config(
        &self,
        _env: &str,
        _owner: &str,
        _repo: &str,
        _r#ref: &str,
        _default_variables: &std::collections::HashMap<String, serde_json::Value>,
    ) -> orc_core::Result<EvaluatedConfig> {
        Ok(self.config.clone())
    }
}

fn evaluated_config(deployer_url: String) -> EvaluatedConfig {
    let mut hooks = BTreeMap::new();
    hooks.insert(
        "ci".to_string(),
        BTreeMap::from([(
            "travis".to_string(),
            HookEntry {
                enabled: true,
                extra: serde_json::json!({}),
            },
        )]),
    );
    hooks.insert(
        "builder".to_string(),
        BTreeMap::from([(
            "quay".to_string(),
            HookEntry {
                enabled: true,
                extra: serde_json::json!({}),
            },
        )]),
    );

    let deployers = BTreeMap::from([(
        "primary".to_string(),
        DeployerEntry {
            enabled: true,
            url: deployer_url,
            proxy: serde_json::json!({}),
            templates: serde_json::json!({}),
            deployment: serde_json::json!({}),
        },
    )]);

    EvaluatedConfig {
        enabled: true,
        hooks,
        deployers,
        security: Default::default(),
        notifications: serde_json::json!({}),
    }
}

async fn build_orchestrator(db: &Db, deployer_url: String) -> Orchestrator {
    let lock = LockService::new(db.pool().clone(), LockConfig::default());
    let freezes = FreezeRegistry::new(db.pool().clone(), FreezeConfig::default());
    let runtime = PipelineRuntime::new(RuntimeConfig::default());

    let manager = NotificationManager::new();
    let notifier: Arc<dyn NotifierCollaborator> = Arc::new(WebhookNotifier::new(Arc::new(manager)));

    let config_loader = Arc::new(FixedConfigLoader {
        config: evaluated_config(deployer_url),
    });

    Orchestrator::new(
        db.pool().clone(),
        lock,
        freezes,
        runtime,
        orc_config::FanoutConfig::default(),
        config_loader,
        notifier,
    )
}

#[tokio::test]
async fn test_e2e_handle_hook_to_deploy_fan_out() {
    telemetry::init_tracing("test", "e2e_smoke");

    let temp_dir = TempDir::new().expect("tempdir");
    let db_path = temp_dir.path().join("e2e.db");
    let db = Db::new(&db_path.to_string_lossy()).await.expect("open db");

    let deployer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "v1"})))
        .mount(&deployer)
        .await;

    let orchestrator = build_orchestrator(&db, deployer.uri()).await;

    // scm-create unfreezes the application and is itself a no-op.
    let setup_job = orchestrator
        .handle_hook(HandleHookRequest {
            env: "dev".to_string(),
            owner: "acme".to_string(),
            repo: "web".to_string(),
            r#ref: "main".to_string(),
            hook_type: "scm-create".to_string(),
            hook_name: "github".to_string(),
            hook_status: HookStatus::Success,
            hook_result: None,
            commit: None,
            force_deploy: false,
        })
        .await
        .expect("scm-create handled");
    assert_eq!(setup_job.state, JobState::Noop);

    // ci success: pending until builder also reports.
    let job = orchestrator
        .handle_hook(HandleHookRequest {
            env: "dev".to_string(),
            owner: "acme".to_string(),
            repo: "web".to_string(),
            r#ref: "main".to_string(),
            hook_type: "ci".to_string(),
            hook_name: "travis".to_string(),
            hook_status: HookStatus::Success,
            hook_result: None,
            commit: Some("c1".to_string()),
            force_deploy: false,
        })
        .await
        .expect("ci hook handled");
    assert_eq!(job.state, JobState::Scheduled);

    // builder success with an image: completes readiness and dispatches the
    // deploy fan-out against the mocked deployer.
    let job = orchestrator
        .handle_hook(HandleHookRequest {
            env: "dev".to_string(),
            owner: "acme".to_string(),
            repo: "web".to_string(),
            r#ref: "main".to_string(),
            hook_type: "builder".to_string(),
            hook_name: "quay".to_string(),
            hook_status: HookStatus::Success,
            hook_result: Some(serde_json::json!({"docker_url": "quay.io/acme/web", "docker_tags": ["v1"]})),
            commit: Some("c1".to_string()),
            force_deploy: false,
        })
        .await
        .expect("builder hook handled and deploy fan-out succeeds");

    assert_eq!(job.state, JobState::Complete);

    let events = orc_store::EventRepository::new(db.pool());
    let job_events = events.list_for_job(&job.job_id).await.expect("list events");
    assert!(job_events.iter().any(|e| e.event_type == "DEPLOY_REQUESTED"));
    assert!(job_events.iter().any(|e| e.event_type == "JOB_COMPLETE"));
}

#[tokio::test]
async fn test_observability_server_reports_healthy() {
    let obs_state = ObsState::new();
    obs_state.readiness.set_ready(true);

    let bind_addr = "127.0.0.1:0";
    let listener = std::net::TcpListener::bind(bind_addr).expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let server_state = obs_state.clone();
    let bind = addr.to_string();
    tokio::spawn(async move {
        let _ = orc_obs::start_server(&bind, server_state).await;
    });

    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .expect("health request succeeds");
    assert!(response.status().is_success());

    let response = client
        .get(format!("http://{addr}/readyz"))
        .send()
        .await
        .expect("readiness request succeeds");
    assert!(response.status().is_success());
}
