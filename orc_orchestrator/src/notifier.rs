//! ABOUTME: Bridges the §6.4 Notifier collaborator contract onto orc_notify's webhook transport
//! ABOUTME: `notifications` stays opaque except for the `webhook_url` leaf this bridge reads

use crate::context::NotifyCtx;
use async_trait::async_trait;
use orc_core::Result;
use orc_notify::{Notification, NotificationChannel, NotificationKind, NotificationManager};
use std::sync::Arc;
use tracing::warn;

/// `notify(payload, ctx, level, notifications, security_profile)` (§6.4),
/// fire-and-forget from the orchestrator's point of view.
#[async_trait]
pub trait NotifierCollaborator: Send + Sync {
    async fn notify(
        &self,
        title: &str,
        body: &str,
        ctx: &NotifyCtx,
        level: NotificationKind,
        notifications: &serde_json::Value,
    ) -> Result<()>;
}

/// Default bridge: reads `notifications.webhook_url` out of the otherwise
/// opaque per-job `notifications` subtree and delivers through the webhook
/// transport registered on the wrapped `NotificationManager`.
pub struct WebhookNotifier {
    manager: Arc<NotificationManager>,
}

impl WebhookNotifier {
    pub fn new(manager: Arc<NotificationManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl NotifierCollaborator for WebhookNotifier {
    async fn notify(
        &self,
        title: &str,
        body: &str,
        ctx: &NotifyCtx,
        level: NotificationKind,
        notifications: &serde_json::Value,
    ) -> Result<()> {
        let Some(url) = notifications.get("webhook_url").and_then(|v| v.as_str()) else {
            warn!(app_key = %ctx.app_key(), "no webhook_url configured, dropping notification");
            return Ok(());
        };

        let Ok(url) = url.parse() else {
            warn!(app_key = %ctx.app_key(), url, "invalid webhook_url, dropping notification");
            return Ok(());
        };

        let notification = Notification::new(
            level,
            title.to_string(),
            body.to_string(),
            vec![NotificationChannel::Webhook {
                url,
                headers: None,
                method: None,
            }],
        )
        .with_metadata("app_key".to_string(), ctx.app_key());

        self.manager
            .send(&notification)
            .await
            .map_err(|e| orc_core::Error::External(format!("notification delivery failed: {e}")))
    }
}
