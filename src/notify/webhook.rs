//! Generic chat-webhook notifications (Feishu/Lark-compatible wire format).

use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Posts plain-text cards to a chat webhook. Used for task pauses, hedge
/// failures, and exposure threshold breaches (§5, §4.7.7).
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

#[derive(Serialize)]
struct WebhookMessage {
    msg_type: String,
    content: WebhookContent,
}

#[derive(Serialize)]
struct WebhookContent {
    text: String,
}

impl WebhookNotifier {
    pub fn from_env() -> Option<Arc<Self>> {
        std::env::var("ALERT_WEBHOOK_URL").ok().map(|url| {
            info!("webhook alerting enabled");
            Arc::new(Self {
                client: Client::new(),
                webhook_url: url,
            })
        })
    }

    pub fn new(webhook_url: String) -> Arc<Self> {
        Arc::new(Self {
            client: Client::new(),
            webhook_url,
        })
    }

    pub async fn send_message(&self, text: &str) -> Result<(), String> {
        let message = WebhookMessage {
            msg_type: "text".to_string(),
            content: WebhookContent {
                text: text.to_string(),
            },
        };

        match self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!("alert webhook delivered");
                Ok(())
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                error!("alert webhook rejected: {} - {}", status, body);
                Err(format!("HTTP {}: {}", status, body))
            }
            Err(e) => {
                error!("alert webhook request failed: {}", e);
                Err(e.to_string())
            }
        }
    }

    pub async fn notify_startup(&self, account: &str, dry_run: bool) {
        let text = format!(
            "🚀 engine started\naccount: {}\nmode: {}",
            account,
            if dry_run { "dry-run" } else { "live" }
        );
        if let Err(e) = self.send_message(&text).await {
            error!("failed to send startup alert: {}", e);
        }
    }

    pub async fn notify_error(&self, error: &str) {
        let text = format!("⚠️ {}", error);
        if let Err(e) = self.send_message(&text).await {
            error!("failed to send error alert: {}", e);
        }
    }
}
