//! Persistent connection to the Discord gateway.
//!
//! The client runs as its own task next to the web server. Its only effect on
//! the rest of the process is what it writes into the shared
//! [`StatusRegister`], plus the sign-in links it posts when asked for one.

mod client;
mod notify;
mod protocol;
mod status;

pub use notify::GatewayHandle;
pub use status::{GatewayStatus, StatusRegister, StatusSnapshot};

use client::{GatewayClient, GatewaySettings};
use notify::Notifier;

use crate::config::Config;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("DISCORD_BOT_TOKEN is not set")]
    MissingToken,

    #[error("Gateway rejected the connection (close code {code}): {reason}")]
    Fatal { code: u16, reason: String },

    #[error("Gateway closed the connection (close code {code}): {reason}")]
    ClosedWith { code: u16, reason: String },

    #[error("Gateway connection closed")]
    Closed,

    #[error("Gateway transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Gateway protocol error: {0}")]
    Protocol(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Notification queue is full or closed")]
    QueueUnavailable,
}

impl GatewayError {
    /// Whether reconnecting is pointless without operator action.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::MissingToken | GatewayError::Fatal { .. })
    }
}

/// Start the gateway client, its notifier, and a supervisor that records
/// any exit of the client as [`GatewayStatus::Error`].
pub fn spawn(
    config: &Config,
    register: StatusRegister,
    http_client: reqwest::Client,
) -> GatewayHandle {
    let (handle, rx) = GatewayHandle::channel();

    let notifier = Notifier::new(
        http_client,
        config.api_base_url.clone(),
        config.bot_token.clone(),
        config.public_url.clone(),
    );
    tokio::spawn(notifier.run(rx));

    let client = GatewayClient::new(
        GatewaySettings::from_config(config),
        register.clone(),
        handle.clone(),
    );
    let task = tokio::spawn(client.run());
    tokio::spawn(supervise(task, register));

    info!("Gateway client started");
    handle
}

async fn supervise(task: JoinHandle<Result<(), GatewayError>>, register: StatusRegister) {
    match task.await {
        Ok(Ok(())) => error!("Gateway client exited unexpectedly"),
        Ok(Err(e)) => error!("Gateway client failed: {}", e),
        Err(e) if e.is_panic() => error!("Gateway client panicked"),
        Err(e) => error!("Gateway client was cancelled: {}", e),
    }
    register.set(GatewayStatus::Error);
}
