//! ABOUTME: Notification system routing job outcomes to webhook channels
//! ABOUTME: The Error Router (C11) hand-off target; wraps delivery with retry/circuit-breaking

use async_trait::async_trait;
use futures_util::future::join_all;
use orc_core::Id;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

pub mod adapters;
pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::CircuitBreakerWrapper;
pub use retry::RetryWrapper;

/// Result type for notification operations
pub type Result<T> = std::result::Result<T, NotificationError>;

/// Errors that can occur during notification operations
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Channel adapter not found: {0}")]
    ChannelNotFound(String),
    #[error("Webhook error: {0}")]
    WebhookError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Circuit breaker open for channel: {0}")]
    CircuitBreakerOpen(String),
    #[error("Retry exhausted for notification: {0}")]
    RetryExhausted(String),
}

/// Notification severity, ordered least to most urgent per the job lifecycle's
/// own convention: `Failed < FailedWarn < Success < Started < Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Failed = 1,
    FailedWarn = 2,
    Success = 3,
    Started = 4,
    Pending = 5,
}

/// Channel configuration for notification delivery. Webhook is the only
/// transport the core speaks directly; routing beyond that is an external
/// notifier's concern (§6.3 `notifications`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationChannel {
    Webhook {
        url: Url,
        headers: Option<HashMap<String, String>>,
        method: Option<String>,
    },
}

/// Core notification message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier for the notification
    pub id: Id,
    /// Type/severity of notification
    pub kind: NotificationKind,
    /// Short title or subject
    pub title: String,
    /// Main message body
    pub body: String,
    /// Target channels for delivery
    pub channels: Vec<NotificationChannel>,
    /// Optional file attachments as URIs
    pub attachments: Vec<Url>,
    /// Optional metadata for adapters
    pub metadata: HashMap<String, String>,
}

impl Notification {
    /// Create a new notification
    pub fn new(
        kind: NotificationKind,
        title: String,
        body: String,
        channels: Vec<NotificationChannel>,
    ) -> Self {
        Self {
            id: Id::new(),
            kind,
            title,
            body,
            channels,
            attachments: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Add an attachment URL
    pub fn with_attachment(mut self, url: Url) -> Self {
        self.attachments.push(url);
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

/// Core trait for notification adapters
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a notification through this adapter
    async fn send(&self, msg: &Notification) -> Result<()>;

    /// Check if the adapter is healthy/available
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// Get the adapter's name for logging/debugging
    fn name(&self) -> &str;
}

/// Multi-channel notification manager
pub struct NotificationManager {
    adapters: HashMap<String, Arc<dyn Notifier>>,
}

impl NotificationManager {
    /// Create a new notification manager
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register a notification adapter
    pub fn register_adapter(&mut self, name: String, adapter: Arc<dyn Notifier>) {
        self.adapters.insert(name, adapter);
    }

    /// Send a notification through all applicable adapters
    pub async fn send(&self, notification: &Notification) -> Result<()> {
        let futures = notification.channels.iter().map(|channel| {
            let adapter_name = match channel {
                NotificationChannel::Webhook { .. } => "webhook",
            };

            let adapter = self.adapters.get(adapter_name).map(|a| a.as_ref());
            let adapter_name = adapter_name.to_string();
            async move {
                if let Some(adapter) = adapter {
                    adapter
                        .send(notification)
                        .await
                        .map_err(|e| format!("{}: {}", adapter_name, e))
                } else {
                    Err(format!("Adapter not found: {}", adapter_name))
                }
            }
        });

        let results = join_all(futures).await;
        let errors: Vec<String> = results.into_iter().filter_map(|r| r.err()).collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotificationError::RetryExhausted(errors.join(", ")))
        }
    }

    /// Get all registered adapter names
    pub fn adapters(&self) -> Vec<&str> {
        self.adapters.keys().map(|s| s.as_str()).collect()
    }

    /// Health check all adapters
    pub async fn health_check(&self) -> HashMap<String, Result<()>> {
        let mut results = HashMap::new();

        for (name, adapter) in &self.adapters {
            results.insert(name.clone(), adapter.health_check().await);
        }

        results
    }
}

impl Clone for NotificationManager {
    fn clone(&self) -> Self {
        // Cloning the manager shares adapter instances via Arc
        Self {
            adapters: self.adapters.clone(),
        }
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}
