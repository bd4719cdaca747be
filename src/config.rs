use crate::session::DEFAULT_SESSION_TTL;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub session_secret: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub api_base_url: String,
    pub gateway_url: String,
    pub bot_token: Option<String>,
    pub public_url: Option<String>,
    pub bot_command: String,
    pub http_timeout: Duration,
    pub session_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let redirect_uri = optional_var("DISCORD_REDIRECT_URI");

        let api_base_url = std::env::var("DISCORD_API_BASE_URL")
            .unwrap_or_else(|_| "https://discord.com/api/v10".to_string());
        Url::parse(&api_base_url).context("Invalid DISCORD_API_BASE_URL")?;

        let gateway_url = std::env::var("DISCORD_GATEWAY_URL")
            .unwrap_or_else(|_| "wss://gateway.discord.gg/?v=10&encoding=json".to_string());
        Url::parse(&gateway_url).context("Invalid DISCORD_GATEWAY_URL")?;

        let public_url = match optional_var("PUBLIC_URL") {
            Some(url) => {
                Url::parse(&url).context("Invalid PUBLIC_URL")?;
                Some(url)
            }
            None => redirect_uri.as_deref().and_then(origin_of),
        };

        Ok(Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("Invalid PORT")?,

            session_secret: std::env::var("SESSION_SECRET").unwrap_or_else(|_| {
                // Sessions will not survive a restart without an explicit secret
                use rand::Rng;
                let secret: Vec<u8> = (0..32).map(|_| rand::thread_rng().gen()).collect();
                base64::Engine::encode(&base64::engine::general_purpose::STANDARD, secret)
            }),

            client_id: optional_var("DISCORD_CLIENT_ID"),
            client_secret: optional_var("DISCORD_CLIENT_SECRET"),
            redirect_uri,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            gateway_url,
            bot_token: optional_var("DISCORD_BOT_TOKEN"),
            public_url,

            bot_command: std::env::var("BOT_COMMAND").unwrap_or_else(|_| "!login".to_string()),

            http_timeout: Duration::from_secs(
                std::env::var("HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("Invalid HTTP_TIMEOUT_SECS")?,
            ),

            session_ttl: match optional_var("SESSION_TTL_SECS") {
                Some(secs) => Duration::from_secs(secs.parse().context("Invalid SESSION_TTL_SECS")?),
                None => DEFAULT_SESSION_TTL,
            },
        })
    }

    pub fn server_address(&self) -> SocketAddr {
        ([0, 0, 0, 0], self.port).into()
    }

    /// OAuth client settings as seen by the code exchange.
    pub fn credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_uri: self.redirect_uri.clone(),
        }
    }
}

/// Client registration values. Each may be absent; absence is reported
/// where the value is needed rather than at startup.
#[derive(Debug, Clone, Default)]
pub struct ClientCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
}

// Empty strings count as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn origin_of(uri: &str) -> Option<String> {
    let url = Url::parse(uri).ok()?;
    match url.origin() {
        url::Origin::Tuple(..) => Some(format!("{}/", url.origin().ascii_serialization())),
        url::Origin::Opaque(_) => None,
    }
}

#[cfg(test)]
impl Config {
    /// Fully populated configuration pointing at local test servers.
    pub fn for_tests(api_base_url: &str) -> Self {
        Self {
            port: 0,
            session_secret: "test-secret".to_string(),
            client_id: Some("client-123".to_string()),
            client_secret: Some("shh".to_string()),
            redirect_uri: Some("http://localhost:5000/callback".to_string()),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            gateway_url: "ws://127.0.0.1:9/".to_string(),
            bot_token: Some("bot-token".to_string()),
            public_url: Some("http://localhost:5000/".to_string()),
            bot_command: "!login".to_string(),
            http_timeout: Duration::from_secs(10),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_strips_path_and_query() {
        assert_eq!(
            origin_of("https://example.onrender.com/callback?x=1").as_deref(),
            Some("https://example.onrender.com/")
        );
        assert_eq!(
            origin_of("http://localhost:5000/callback").as_deref(),
            Some("http://localhost:5000/")
        );
    }

    #[test]
    fn origin_of_garbage_is_none() {
        assert_eq!(origin_of("not a url"), None);
        assert_eq!(origin_of("data:text/plain,hi"), None);
    }
}
