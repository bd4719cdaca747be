use crate::{
    error::{AppError, Result},
    oauth::{authorize_url, OAUTH_SCOPE},
    pages,
    session::SessionStore,
    types::{Identity, OAuthCallback},
    AppState,
};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use tracing::{debug, info, warn};

pub const SESSION_COOKIE_NAME: &str = "discord_session";

/// 302 Found, the status browsers and the provider expect for this flow.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

// Root page reflecting the browser's session
pub async fn index(State(state): State<AppState>, jar: SignedCookieJar) -> Html<String> {
    let identity = get_session_from_cookies(&jar, &state.session_store);
    Html(pages::index_page(identity.as_ref()))
}

// Send the browser to the provider's consent screen
pub async fn login(State(state): State<AppState>) -> Result<Response> {
    let client_id = state
        .config
        .client_id
        .as_deref()
        .ok_or(AppError::Configuration("DISCORD_CLIENT_ID"))?;
    let redirect_uri = state
        .config
        .redirect_uri
        .as_deref()
        .ok_or(AppError::Configuration("DISCORD_REDIRECT_URI"))?;

    let auth_url = authorize_url(&state.config.api_base_url, client_id, redirect_uri);

    info!("Redirecting to OAuth authorization");
    debug!(client_id = %client_id, redirect_uri = %redirect_uri, "Auth params");
    Ok(found(&auth_url))
}

// Handle OAuth callback
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<OAuthCallback>,
    jar: SignedCookieJar,
) -> Result<Response> {
    // An empty `error` is treated as absent
    if let Some(error) = params.error.filter(|error| !error.is_empty()) {
        let detail = match params.error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        };
        return Err(AppError::UserDenied(detail));
    }

    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or(AppError::MissingCode)?;

    let credentials = state.config.credentials();
    if credentials.client_id.is_none() {
        return Err(AppError::Configuration("DISCORD_CLIENT_ID"));
    }
    if credentials.client_secret.is_none() {
        return Err(AppError::Configuration("DISCORD_CLIENT_SECRET"));
    }
    if credentials.redirect_uri.is_none() {
        return Err(AppError::Configuration("DISCORD_REDIRECT_URI"));
    }

    let profile = state
        .exchanger
        .exchange(Some(code.as_str()), &credentials, OAUTH_SCOPE)
        .await?;

    let identity = Identity::from_profile(&profile);
    match &identity {
        Identity::Email(_) => info!(user_id = %profile.id, "User signed in with email"),
        Identity::NoEmail => warn!(user_id = %profile.id, "User signed in but no email is available"),
    }

    // A fresh id on every sign-in; the previous one is forgotten
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        state.session_store.delete_session(cookie.value());
    }
    let session_id = SessionStore::generate_session_id();
    state.session_store.create_session(&session_id, identity);

    let secure = state
        .config
        .redirect_uri
        .as_deref()
        .is_some_and(|uri| uri.starts_with("https://"));
    // Browser forgets the cookie when the server forgets the session
    let max_age = i64::try_from(state.session_store.ttl().as_secs()).unwrap_or(i64::MAX);
    let cookie = Cookie::build((SESSION_COOKIE_NAME, session_id))
        .http_only(true)
        .secure(secure)
        .max_age(time::Duration::seconds(max_age))
        .same_site(SameSite::Lax)
        .path("/")
        .build();

    Ok((jar.add(cookie), found("/")).into_response())
}

// Logout endpoint
pub async fn logout(State(state): State<AppState>, jar: SignedCookieJar) -> impl IntoResponse {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        state.session_store.delete_session(cookie.value());
    }

    let jar = jar.remove(Cookie::build((SESSION_COOKIE_NAME, "")).path("/"));
    (jar, found("/"))
}

pub fn get_session_from_cookies(
    jar: &SignedCookieJar,
    session_store: &SessionStore,
) -> Option<Identity> {
    jar.get(SESSION_COOKIE_NAME)
        .and_then(|cookie| session_store.get_session(cookie.value()))
}
