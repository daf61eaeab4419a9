//! ABOUTME: Orchestrator core: correlation, readiness, hook application, and fan-out (C5-C11)
//! ABOUTME: `Orchestrator::handle_hook`/`undeploy` are the only two entry points into the core

pub mod context;
pub mod correlator;
pub mod deploy_tasks;
pub mod flows;
pub mod hooks;
pub mod notifier;
pub mod readiness;

pub use context::{ConfigLoader, NotifyCtx, SearchParams};
pub use correlator::{correlate, enabled_hook_matrix, is_terminal};
pub use deploy_tasks::{deploy_retry_policy, undeploy_retry_policy, DeployTask, UndeployTask};
pub use flows::{HandleHookRequest, Orchestrator};
pub use hooks::{apply_hook, ApplyOutcome, HookSignal};
pub use notifier::{NotifierCollaborator, WebhookNotifier};
pub use readiness::{evaluate, Readiness};
