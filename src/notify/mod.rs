//! Outbound alerting (§4.7.7, §5 exposure monitor).
pub mod webhook;

pub use webhook::WebhookNotifier;

use async_trait::async_trait;

/// A destination for human-readable operational alerts. Implemented by
/// [`WebhookNotifier`]; kept as a trait so the exposure monitor and supervisor
/// don't need to know which webhook flavor is configured.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), String>;
}

#[async_trait]
impl AlertSink for WebhookNotifier {
    async fn send(&self, text: &str) -> Result<(), String> {
        self.send_message(text).await
    }
}
