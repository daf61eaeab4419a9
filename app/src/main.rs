use clap::{Parser, Subcommand};
use orc_config::Config;
use orc_core::telemetry;
use orc_notify::adapters::WebhookAdapter;
use orc_notify::NotificationManager;
use orc_obs::ObsState;
use orc_orchestrator::{HandleHookRequest, NotifierCollaborator, Orchestrator, WebhookNotifier};
use orc_pipeline::{FreezeConfig, FreezeRegistry, LockService, PipelineRuntime, RuntimeConfig};
use orc_store::{Db, HookStatus};
use std::process;
use std::sync::Arc;

mod config_loader;

use config_loader::StaticConfigLoader;

#[derive(Parser)]
#[command(name = "orchestratord")]
#[command(about = "Continuous-deployment job orchestrator")]
struct Cli {
    /// Path to a JSON file mapping "env-owner-repo-ref" to an evaluated config,
    /// used in place of the external Config collaborator this binary doesn't ship.
    #[arg(long, default_value = "static_config.json")]
    config_file: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the observability server and idle, ready for an external HTTP
    /// layer to call into the orchestrator.
    Start,
    /// Manually drive one hook signal through `handle_hook`, for local testing.
    Hook {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        r#ref: String,
        #[arg(long)]
        hook_type: String,
        #[arg(long)]
        hook_name: String,
        #[arg(long, default_value = "success")]
        status: String,
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        force_deploy: bool,
    },
    /// Manually drive `undeploy` for one application, for local testing.
    Undeploy {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        r#ref: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    telemetry::init_tracing(&config.environment, "orchestrator");

    let db = match Db::new(&config.store.db_path).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to initialize database: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = db.health_check().await {
        tracing::error!("Database health check failed: {e}");
        process::exit(1);
    }

    let obs_state = ObsState::new();
    let orchestrator = build_orchestrator(&config, &db, &cli.config_file, obs_state.metrics.clone());

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            let obs_bind_addr = "0.0.0.0:9100".to_string();
            tracing::info!(bind = %obs_bind_addr, "starting observability server");
            if let Err(e) = orc_obs::start_server(&obs_bind_addr, obs_state).await {
                tracing::error!("observability server exited: {e}");
                process::exit(1);
            }
        }
        Commands::Hook {
            owner,
            repo,
            r#ref,
            hook_type,
            hook_name,
            status,
            commit,
            force_deploy,
        } => {
            let hook_status = match status.as_str() {
                "success" => HookStatus::Success,
                "failed" => HookStatus::Failed,
                _ => HookStatus::Pending,
            };
            let request = HandleHookRequest {
                env: config.environment.clone(),
                owner,
                repo,
                r#ref,
                hook_type,
                hook_name,
                hook_status,
                hook_result: None,
                commit,
                force_deploy,
            };
            match orchestrator.handle_hook(request).await {
                Ok(job) => println!("{}", serde_json::to_string_pretty(&job).unwrap_or_default()),
                Err(e) => {
                    tracing::error!("handle_hook failed: {e}");
                    process::exit(1);
                }
            }
        }
        Commands::Undeploy { owner, repo, r#ref } => {
            if let Err(e) = orchestrator
                .undeploy(&config.environment, &owner, &repo, &r#ref)
                .await
            {
                tracing::error!("undeploy failed: {e}");
                process::exit(1);
            }
        }
    }
}

fn build_orchestrator(
    config: &Config,
    db: &Db,
    config_file: &str,
    metrics: Arc<orc_obs::Metrics>,
) -> Orchestrator {
    let lock = LockService::new(db.pool().clone(), (&config.lock).into()).with_metrics(metrics.clone());
    let freezes = FreezeRegistry::new(db.pool().clone(), FreezeConfig::default());
    let runtime = PipelineRuntime::new(RuntimeConfig::from(&config.pipeline)).with_metrics(metrics.clone());

    let mut manager = NotificationManager::new();
    manager.register_adapter("webhook".to_string(), Arc::new(WebhookAdapter::new()));
    let notifier: Arc<dyn NotifierCollaborator> = Arc::new(WebhookNotifier::new(Arc::new(manager)));

    let config_loader = Arc::new(StaticConfigLoader::new(config_file.to_string()));

    Orchestrator::new(
        db.pool().clone(),
        lock,
        freezes,
        runtime,
        config.fanout.clone(),
        config_loader,
        notifier,
    )
    .with_metrics(metrics)
}
