//! Discord gateway v10 payloads used by the client.
//!
//! Only the subset needed to stay connected, resume, and react to a chat
//! command is modelled; every other dispatch is ignored.

use serde::Deserialize;
use serde_json::{json, Value};

pub const DISPATCH: u8 = 0;
pub const HEARTBEAT: u8 = 1;
pub const IDENTIFY: u8 = 2;
pub const RESUME: u8 = 6;
pub const RECONNECT: u8 = 7;
pub const INVALID_SESSION: u8 = 9;
pub const HELLO: u8 = 10;
pub const HEARTBEAT_ACK: u8 = 11;

const GUILD_MESSAGES: u64 = 1 << 9;
const DIRECT_MESSAGES: u64 = 1 << 12;
const MESSAGE_CONTENT: u64 = 1 << 15;

/// Intents needed to see command messages in guilds and DMs.
pub const INTENTS: u64 = GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT;

/// Envelope shared by every gateway message.
#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
pub struct Ready {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub user: Option<ReadyUser>,
}

#[derive(Debug, Deserialize)]
pub struct ReadyUser {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageCreate {
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    pub author: Author,
}

#[derive(Debug, Deserialize)]
pub struct Author {
    pub id: String,
    #[serde(default)]
    pub bot: bool,
}

pub fn identify(token: &str) -> String {
    json!({
        "op": IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": env!("CARGO_PKG_NAME"),
                "device": env!("CARGO_PKG_NAME"),
            }
        }
    })
    .to_string()
}

pub fn resume(token: &str, session_id: &str, seq: Option<u64>) -> String {
    json!({
        "op": RESUME,
        "d": {
            "token": token,
            "session_id": session_id,
            "seq": seq,
        }
    })
    .to_string()
}

pub fn heartbeat(seq: Option<u64>) -> String {
    json!({ "op": HEARTBEAT, "d": seq }).to_string()
}

/// Close codes after which reconnecting cannot succeed without operator
/// action: bad token, invalid shard, sharding required, invalid API version,
/// invalid or disallowed intents.
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

/// Append the query the gateway expects to a `resume_gateway_url`.
pub fn resume_url(base: &str) -> String {
    format!("{}/?v=10&encoding=json", base.trim_end_matches('/'))
}
