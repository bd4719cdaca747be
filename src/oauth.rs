use crate::{
    config::ClientCredentials,
    types::{TokenRequest, TokenResponse, UserProfile},
};
use async_trait::async_trait;
use axum::http::header;
use thiserror::Error;
use tracing::{debug, error, info};

/// Scopes requested at authorization time and repeated in the code exchange.
/// Both sides must agree or the provider rejects the exchange.
pub const OAUTH_SCOPE: &str = "identify email";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Missing authorization code")]
    MissingCode,

    #[error("OAuth client is not configured: {0} is not set")]
    Misconfigured(&'static str),

    #[error("Failed to obtain access token: {0}")]
    TokenRequestFailed(String),

    #[error("Token response did not contain an access token")]
    TokenMissing,

    #[error("Failed to fetch user profile: {0}")]
    ProfileRequestFailed(String),
}

/// Turns an authorization code into the profile of the user who granted it.
#[async_trait]
pub trait CodeExchanger: Send + Sync {
    async fn exchange(
        &self,
        code: Option<&str>,
        credentials: &ClientCredentials,
        scope: &str,
    ) -> Result<UserProfile, ExchangeError>;
}

/// Build the provider authorization URL the browser is sent to.
pub fn authorize_url(api_base_url: &str, client_id: &str, redirect_uri: &str) -> String {
    let auth_params = [
        ("client_id", client_id),
        ("response_type", "code"),
        ("redirect_uri", redirect_uri),
        ("scope", OAUTH_SCOPE),
    ];

    // Form encoding writes spaces as '+'; the provider documents %20.
    // Literal '+' in values is already escaped as %2B at this point.
    let query = serde_urlencoded::to_string(auth_params)
        .unwrap_or_default()
        .replace('+', "%20");

    format!("{}/oauth2/authorize?{}", api_base_url, query)
}

pub struct DiscordExchanger {
    http_client: reqwest::Client,
    api_base_url: String,
}

impl DiscordExchanger {
    pub fn new(http_client: reqwest::Client, api_base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            api_base_url: api_base_url.into(),
        }
    }

    async fn request_token(&self, request: &TokenRequest<'_>) -> Result<String, ExchangeError> {
        let token_url = format!("{}/oauth2/token", self.api_base_url);
        debug!("Exchanging authorization code at: {}", token_url);

        let response = self
            .http_client
            .post(&token_url)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(request)
            .send()
            .await
            .map_err(|e| ExchangeError::TokenRequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Token exchange failed: {}", error_text);
            return Err(ExchangeError::TokenRequestFailed(format!(
                "{}: {}",
                status, error_text
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| ExchangeError::TokenRequestFailed(e.to_string()))?;

        let token_response: TokenResponse = serde_json::from_str(&response_text).map_err(|e| {
            ExchangeError::TokenRequestFailed(format!("Failed to parse token response: {}", e))
        })?;

        let token_info = token_response.into_token_info().ok_or_else(|| {
            error!("Token response had no access_token field");
            ExchangeError::TokenMissing
        })?;

        debug!(
            token_type = %token_info.token_type,
            scope = ?token_info.scope,
            "Access token obtained"
        );
        Ok(token_info.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ExchangeError> {
        let profile_url = format!("{}/users/@me", self.api_base_url);

        let response = self
            .http_client
            .get(&profile_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| ExchangeError::ProfileRequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Profile request failed: {}", error_text);
            return Err(ExchangeError::ProfileRequestFailed(format!(
                "{}: {}",
                status, error_text
            )));
        }

        response.json::<UserProfile>().await.map_err(|e| {
            ExchangeError::ProfileRequestFailed(format!("Failed to parse user profile: {}", e))
        })
    }
}

#[async_trait]
impl CodeExchanger for DiscordExchanger {
    async fn exchange(
        &self,
        code: Option<&str>,
        credentials: &ClientCredentials,
        scope: &str,
    ) -> Result<UserProfile, ExchangeError> {
        let code = code
            .filter(|code| !code.is_empty())
            .ok_or(ExchangeError::MissingCode)?;

        let client_id = credentials
            .client_id
            .as_deref()
            .ok_or(ExchangeError::Misconfigured("DISCORD_CLIENT_ID"))?;
        let client_secret = credentials
            .client_secret
            .as_deref()
            .ok_or(ExchangeError::Misconfigured("DISCORD_CLIENT_SECRET"))?;
        let redirect_uri = credentials
            .redirect_uri
            .as_deref()
            .ok_or(ExchangeError::Misconfigured("DISCORD_REDIRECT_URI"))?;

        let token_request = TokenRequest {
            client_id,
            client_secret,
            grant_type: "authorization_code",
            code,
            redirect_uri,
            scope,
        };

        let access_token = self.request_token(&token_request).await?;
        let profile = self.fetch_profile(&access_token).await?;

        info!(
            user_id = %profile.id,
            username = ?profile.username,
            has_email = profile.email.is_some(),
            verified = ?profile.verified,
            "Fetched user profile"
        );
        Ok(profile)
    }
}
