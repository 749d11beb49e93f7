//! Build notifications
//!
//! Notifications are best-effort: the orchestrator logs a failed delivery
//! and carries on.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::config::NotificationConfig;
use crate::error::{Error, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Discards every message
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Writes messages to the daemon log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        info!(target: "stevedore::notify", "{}", message);
        Ok(())
    }
}

/// Posts messages to a Slack incoming webhook
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
    channel: Option<String>,
    username: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>, channel: Option<String>, username: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
            channel,
            username: username.into(),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        let mut payload = json!({
            "text": message,
            "username": self.username,
        });
        if let Some(channel) = &self.channel {
            payload["channel"] = json!(channel);
        }

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Notification(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!("Slack returned {}: {}", status, body)));
        }

        Ok(())
    }
}

/// Build the notifier selected by `notifications.channel`
pub fn from_config(config: &NotificationConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match config.channel.as_str() {
        "none" => Ok(Arc::new(NoopNotifier)),
        "log" => Ok(Arc::new(LogNotifier)),
        "slack" => {
            let url = config
                .slack_webhook_url
                .clone()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| anyhow::anyhow!("notifications.slack_webhook_url is required for the slack channel"))?;
            Ok(Arc::new(SlackNotifier::new(
                url,
                config.slack_channel.clone(),
                config.username.clone(),
            )))
        }
        other => Err(anyhow::anyhow!("Unknown notification channel: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_slack_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({
                "text": "built it",
                "channel": "#builds",
                "username": "stevedore",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(
            format!("{}/hook", server.uri()),
            Some("#builds".to_string()),
            "stevedore",
        );

        notifier.notify("built it").await.unwrap();
    }

    #[tokio::test]
    async fn test_slack_error_status_is_notification_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no_service"))
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(server.uri(), None, "stevedore");

        let err = notifier.notify("hello").await.unwrap_err();
        assert_matches!(&err, Error::Notification(msg) if msg.contains("no_service"));
    }

    #[test]
    fn test_from_config_requires_webhook_for_slack() {
        let mut config = NotificationConfig::default();
        config.channel = "slack".to_string();
        assert!(from_config(&config).is_err());

        config.slack_webhook_url = Some("https://hooks.slack.com/services/x".to_string());
        assert!(from_config(&config).is_ok());
    }

    #[test]
    fn test_from_config_rejects_unknown_channel() {
        let mut config = NotificationConfig::default();
        config.channel = "pager".to_string();
        assert!(from_config(&config).is_err());

        config.channel = "none".to_string();
        assert!(from_config(&config).is_ok());
    }
}
