use serde::{Deserialize, Serialize};

/// Shown in place of an address when the provider returned none.
pub const NO_EMAIL_SENTINEL: &str = "no email available";

#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub grant_type: &'a str,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
}

/// Raw token endpoint body. Every field is optional so that a body without
/// `access_token` can be told apart from one that is not JSON at all.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub access_token: String,
    pub token_type: String,
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn into_token_info(self) -> Option<TokenInfo> {
        let access_token = self.access_token.filter(|token| !token.is_empty())?;
        Some(TokenInfo {
            access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: self.scope,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
}

/// What a signed-in browser session knows about its user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Email(String),
    NoEmail,
}

impl Identity {
    pub fn from_profile(profile: &UserProfile) -> Self {
        match profile.email.as_deref() {
            Some(email) if !email.is_empty() => Identity::Email(email.to_string()),
            _ => Identity::NoEmail,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identity::Email(email) => email,
            Identity::NoEmail => NO_EMAIL_SENTINEL,
        }
    }
}
