use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Lifecycle of the gateway connection as seen from the web side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Offline,
    Online,
    Disconnected,
    Error,
}

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Offline => "offline",
            GatewayStatus::Online => "online",
            GatewayStatus::Disconnected => "disconnected",
            GatewayStatus::Error => "error",
        }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub status: GatewayStatus,
    pub since: DateTime<Utc>,
}

/// Single shared cell holding the latest gateway status.
///
/// The gateway task writes, any number of request handlers read. Reads copy
/// the value out of a short borrow, so readers never wait on a writer for
/// longer than one copy and never see a partially written value. `Error` is
/// terminal: once recorded, later transitions are ignored.
#[derive(Debug, Clone)]
pub struct StatusRegister {
    tx: Arc<watch::Sender<StatusSnapshot>>,
}

impl Default for StatusRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegister {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot {
            status: GatewayStatus::Offline,
            since: Utc::now(),
        });
        Self { tx: Arc::new(tx) }
    }

    /// Record a transition. Returns whether the stored value changed.
    pub fn set(&self, status: GatewayStatus) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if current.status == status || current.status == GatewayStatus::Error {
                return false;
            }
            *current = StatusSnapshot {
                status,
                since: Utc::now(),
            };
            true
        });

        if changed {
            info!(%status, "Gateway status changed");
        } else {
            debug!(%status, "Gateway status unchanged");
        }
        changed
    }

    pub fn get(&self) -> StatusSnapshot {
        *self.tx.borrow()
    }

    pub fn status(&self) -> GatewayStatus {
        self.get().status
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }
}
