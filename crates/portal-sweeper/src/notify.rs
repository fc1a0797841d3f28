use color_eyre::eyre;
use portal_config::notification::Configuration as NotificationConfig;

/// Webhook announcing operational events to the operators' chat
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl Notifier {
    #[must_use]
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: config.webhook_url.to_string(),
        }
    }

    pub async fn lost_ownership(&self, invalidated: usize) -> eyre::Result<()> {
        let body = serde_json::json!({
            "text": format!(
                "DNS re-verification invalidated {invalidated} hostname(s); affected registrations dropped out of the scheme",
            ),
        });

        self.client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
