//! ABOUTME: Readiness Evaluator (C6): decides deployable/pending/failed from the hook matrix
//! ABOUTME: Only `ci` and `builder` hooks gate; `force_deploy` bypasses evaluation entirely

use orc_store::{HookStatus, Job};

const GATING_HOOK_TYPES: [&str; 2] = ["ci", "builder"];

/// Result of evaluating a job's hook matrix against the gating rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    pub failed: Vec<String>,
    pub pending: Vec<String>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty()
    }
}

/// `evaluate(job) -> {failed, pending}` (§4.5).
pub fn evaluate(job: &Job) -> Readiness {
    if job.force_deploy {
        return Readiness::default();
    }

    let mut readiness = Readiness::default();
    for hook_type in GATING_HOOK_TYPES {
        let Some(names) = job.hooks.get(hook_type) else {
            continue;
        };
        for (name, status) in names {
            match status {
                HookStatus::Failed => readiness.failed.push(name.clone()),
                HookStatus::Pending => readiness.pending.push(name.clone()),
                HookStatus::Success => {}
            }
        }
    }
    readiness
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_store::{GitInfo, JobState};
    use std::collections::BTreeMap;

    fn job_with_hooks(hooks: orc_store::HookMatrix, force_deploy: bool) -> Job {
        Job {
            job_id: "job-1".into(),
            state: JobState::New,
            config: serde_json::json!({}),
            git: GitInfo {
                owner: "acme".into(),
                repo: "web".into(),
                r#ref: "main".into(),
                commit: None,
                commit_set: vec![],
            },
            hooks,
            force_deploy,
            modified: "now".into(),
        }
    }

    #[test]
    fn all_success_is_ready() {
        let mut hooks = BTreeMap::new();
        hooks.insert("ci".to_string(), BTreeMap::from([("travis".to_string(), HookStatus::Success)]));
        let job = job_with_hooks(hooks, false);
        assert!(evaluate(&job).is_ready());
    }

    #[test]
    fn pending_ci_blocks_readiness() {
        let mut hooks = BTreeMap::new();
        hooks.insert("ci".to_string(), BTreeMap::from([("travis".to_string(), HookStatus::Pending)]));
        let job = job_with_hooks(hooks, false);
        let readiness = evaluate(&job);
        assert_eq!(readiness.pending, vec!["travis".to_string()]);
        assert!(readiness.failed.is_empty());
    }

    #[test]
    fn failed_builder_surfaces_as_failed() {
        let mut hooks = BTreeMap::new();
        hooks.insert("builder".to_string(), BTreeMap::from([("quay".to_string(), HookStatus::Failed)]));
        let job = job_with_hooks(hooks, false);
        assert_eq!(evaluate(&job).failed, vec!["quay".to_string()]);
    }

    #[test]
    fn scm_push_hooks_never_gate() {
        let mut hooks = BTreeMap::new();
        hooks.insert("scm-push".to_string(), BTreeMap::from([("origin".to_string(), HookStatus::Pending)]));
        let job = job_with_hooks(hooks, false);
        assert!(evaluate(&job).is_ready());
    }

    #[test]
    fn force_deploy_bypasses_pending_and_failed_hooks() {
        let mut hooks = BTreeMap::new();
        hooks.insert("ci".to_string(), BTreeMap::from([("travis".to_string(), HookStatus::Failed)]));
        let job = job_with_hooks(hooks, true);
        assert!(evaluate(&job).is_ready());
    }
}
