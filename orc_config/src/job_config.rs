//! ABOUTME: Per-job evaluated configuration model (the external "Config collaborator", §6.3)
//! ABOUTME: Known entities are typed; template-evaluated leaves stay permissive JSON

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single hook entry within `hooks[<type>][<name>]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEntry {
    pub enabled: bool,
    /// Hook-specific template-evaluated leaves (e.g. webhook URLs, secrets).
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// A single deployer entry within `deployers[<name>]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerEntry {
    pub enabled: bool,
    pub url: String,
    /// Proxy routing descriptor; opaque to the core beyond being forwarded.
    #[serde(default)]
    pub proxy: serde_json::Value,
    /// Request templates, including `templates.app.args.image`, which the
    /// builder-hook image extraction step mutates in place.
    #[serde(default)]
    pub templates: serde_json::Value,
    #[serde(default)]
    pub deployment: serde_json::Value,
}

/// Notifier routing entry; opaque beyond `enabled`/`severity_threshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierEntry {
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Security profile selector, forwarded verbatim into deploy requests.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    pub profile: Option<String>,
}

/// The merged, template-evaluated configuration for one `(env, owner, repo, ref)`
/// target, as returned by the external Config collaborator (`load_config`, §6.3).
///
/// The core treats this as opaque except for the paths named in §6.3: `enabled`,
/// `hooks[<type>][<name>].enabled`, `deployers[<name>].{enabled,url,proxy,templates,deployment}`,
/// `security.profile`, `notifications`. Everything else round-trips as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvaluatedConfig {
    pub enabled: bool,
    #[serde(default)]
    pub hooks: BTreeMap<String, BTreeMap<String, HookEntry>>,
    #[serde(default)]
    pub deployers: BTreeMap<String, DeployerEntry>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub notifications: serde_json::Value,
}

impl EvaluatedConfig {
    /// Enabled deployer entries, in stable name order, as used by the fan-out steps.
    pub fn enabled_deployers(&self) -> Vec<(&String, &DeployerEntry)> {
        self.deployers.iter().filter(|(_, d)| d.enabled).collect()
    }

    /// Enabled hooks of the given type (`ci`, `builder`, `scm-push`, `scm-create`).
    pub fn enabled_hooks(&self, hook_type: &str) -> Vec<&String> {
        self.hooks
            .get(hook_type)
            .map(|names| names.iter().filter(|(_, h)| h.enabled).map(|(n, _)| n).collect())
            .unwrap_or_default()
    }

    /// Apply an extracted builder image to every enabled deployer's
    /// `templates.app.args.image`, per the builder-hook step (§6.1 step 6).
    pub fn apply_image(&mut self, image: &str) {
        for deployer in self.deployers.values_mut() {
            if !deployer.enabled {
                continue;
            }
            if !deployer.templates.is_object() {
                deployer.templates = serde_json::json!({});
            }
            let templates = deployer.templates.as_object_mut().expect("just ensured object");

            let app = templates.entry("app").or_insert_with(|| serde_json::json!({}));
            if !app.is_object() {
                *app = serde_json::json!({});
            }
            let app = app.as_object_mut().expect("just ensured object");

            let args = app.entry("args").or_insert_with(|| serde_json::json!({}));
            if !args.is_object() {
                *args = serde_json::json!({});
            }
            let args = args.as_object_mut().expect("just ensured object");

            args.insert("image".to_string(), serde_json::Value::String(image.to_string()));
        }
    }
}

/// Extract an image reference from a builder hook result, per the deployer-specific
/// rule in §6.1 step 6: `quay` uses `docker_url[:docker_tags[0]]` when tags exist,
/// otherwise `docker_url`; any other builder falls back to `hook_result.image`.
pub fn extract_builder_image(builder: &str, hook_result: &serde_json::Value) -> Option<String> {
    if builder == "quay" {
        let docker_url = hook_result.get("docker_url")?.as_str()?;
        let tag = hook_result
            .get("docker_tags")
            .and_then(|v| v.as_array())
            .and_then(|tags| tags.first())
            .and_then(|t| t.as_str());
        return Some(match tag {
            Some(tag) => format!("{docker_url}:{tag}"),
            None => docker_url.to_string(),
        });
    }

    hook_result.get("image").and_then(|v| v.as_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quay_image_extraction_prefers_first_tag() {
        let result = serde_json::json!({
            "docker_url": "quay.io/acme/web",
            "docker_tags": ["v1", "v2"],
        });
        assert_eq!(
            extract_builder_image("quay", &result).as_deref(),
            Some("quay.io/acme/web:v1")
        );
    }

    #[test]
    fn quay_image_extraction_falls_back_without_tags() {
        let result = serde_json::json!({ "docker_url": "quay.io/acme/web" });
        assert_eq!(
            extract_builder_image("quay", &result).as_deref(),
            Some("quay.io/acme/web")
        );
    }

    #[test]
    fn other_builder_uses_image_field() {
        let result = serde_json::json!({ "image": "img:1" });
        assert_eq!(extract_builder_image("travis", &result).as_deref(), Some("img:1"));
    }

    #[test]
    fn apply_image_sets_every_enabled_deployer_template() {
        let mut config = EvaluatedConfig {
            enabled: true,
            deployers: BTreeMap::from([(
                "d1".to_string(),
                DeployerEntry {
                    enabled: true,
                    url: "http://d1".to_string(),
                    proxy: serde_json::json!({}),
                    templates: serde_json::json!({}),
                    deployment: serde_json::json!({}),
                },
            )]),
            ..Default::default()
        };

        config.apply_image("img:1");

        let image = config.deployers["d1"].templates["app"]["args"]["image"].clone();
        assert_eq!(image, serde_json::json!("img:1"));
    }
}
