use super::GatewayError;
use axum::http::header;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Notifications waiting to be posted; extra requests are dropped.
pub const NOTIFY_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel_id: String,
}

/// Cloneable entry point for queueing outbound bot messages.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    tx: mpsc::Sender<Notification>,
}

impl GatewayHandle {
    pub fn channel() -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(NOTIFY_QUEUE_DEPTH);
        (Self { tx }, rx)
    }

    /// Queue a sign-in link for `channel_id` without waiting for delivery.
    pub fn notify(&self, channel_id: impl Into<String>) -> Result<(), GatewayError> {
        self.tx
            .try_send(Notification {
                channel_id: channel_id.into(),
            })
            .map_err(|_| GatewayError::QueueUnavailable)
    }
}

/// Posts queued notifications through the REST API.
pub struct Notifier {
    http_client: reqwest::Client,
    api_base_url: String,
    bot_token: Option<String>,
    public_url: Option<String>,
}

impl Notifier {
    pub fn new(
        http_client: reqwest::Client,
        api_base_url: impl Into<String>,
        bot_token: Option<String>,
        public_url: Option<String>,
    ) -> Self {
        Self {
            http_client,
            api_base_url: api_base_url.into(),
            bot_token,
            public_url,
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Notification>) {
        while let Some(notification) = rx.recv().await {
            if let Err(e) = self.send(&notification).await {
                error!(channel_id = %notification.channel_id, "Failed to send notification: {}", e);
            }
        }
        debug!("Notification queue closed");
    }

    pub async fn send(&self, notification: &Notification) -> Result<(), GatewayError> {
        let token = self
            .bot_token
            .as_deref()
            .ok_or(GatewayError::MissingToken)?;
        let public_url = self.public_url.as_deref().ok_or_else(|| {
            warn!("PUBLIC_URL is not set and could not be derived from DISCORD_REDIRECT_URI");
            GatewayError::Notify("no public URL configured".to_string())
        })?;

        let url = format!(
            "{}/channels/{}/messages",
            self.api_base_url, notification.channel_id
        );
        let body = json!({
            "content": format!("Sign in with Discord to share your email address: {}", public_url),
            "allowed_mentions": { "parse": [] },
        });

        let response = self
            .http_client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bot {}", token))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Notify(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Notify(format!("{}: {}", status, error_text)));
        }

        info!(channel_id = %notification.channel_id, "Sent sign-in link");
        Ok(())
    }
}
