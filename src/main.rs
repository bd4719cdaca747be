use anyhow::{Context, Result};
use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod config;
mod error;
mod gateway;
mod oauth;
mod pages;
mod session;
mod types;

use crate::{
    config::Config,
    gateway::{StatusRegister, StatusSnapshot},
    oauth::{CodeExchanger, DiscordExchanger},
    session::SessionStore,
};

/// Upper bound on a single request; covers both provider calls of a callback.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session_store: Arc<SessionStore>,
    pub status_register: StatusRegister,
    pub exchanger: Arc<dyn CodeExchanger>,
    pub cookie_key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        status_register: StatusRegister,
        exchanger: Arc<dyn CodeExchanger>,
    ) -> Self {
        // Key needs 64 bytes; SHA-512 stretches secrets of any length to fit
        let cookie_key = Key::from(Sha512::digest(config.session_secret.as_bytes()).as_slice());
        let session_store = Arc::new(SessionStore::with_ttl(config.session_ttl));

        Self {
            config,
            session_store,
            status_register,
            exchanger,
            cookie_key,
        }
    }
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(auth::index))
        .route("/login", get(auth::login))
        .route("/callback", get(auth::callback))
        .route("/logout", get(auth::logout))
        .route("/status", get(gateway_status))
        .route("/health", get(health_check))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "discord_email_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    info!("Starting Discord email sign-in server");

    // Shared by the code exchange and the bot's REST calls
    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .build()
        .context("Failed to build HTTP client")?;

    let status_register = StatusRegister::new();
    let _gateway = gateway::spawn(&config, status_register.clone(), http_client.clone());

    let exchanger = Arc::new(DiscordExchanger::new(
        http_client,
        config.api_base_url.clone(),
    ));
    let app_state = AppState::new(config.clone(), status_register, exchanger);
    let app = router(app_state);

    // Start server
    let addr = config.server_address();
    info!("Listening on {}", addr);

    println!("\nDiscord Email Sign-in");
    println!("=====================");
    println!("Server running at: http://localhost:{}", config.port);
    println!("  Login:  http://localhost:{}/login", config.port);
    println!("  Status: http://localhost:{}/status\n", config.port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn gateway_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status_register.get())
}
