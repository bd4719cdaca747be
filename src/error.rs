use crate::{oauth::ExchangeError, pages};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0} is not set")]
    Configuration(&'static str),

    #[error("Authorization was denied: {0}")]
    UserDenied(String),

    #[error("Missing authorization code")]
    MissingCode,

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::UserDenied(_)
            | AppError::MissingCode
            | AppError::Exchange(ExchangeError::MissingCode) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_)
            | AppError::Exchange(ExchangeError::Misconfigured(_))
            | AppError::Exchange(ExchangeError::TokenRequestFailed(_))
            | AppError::Exchange(ExchangeError::TokenMissing)
            | AppError::Exchange(ExchangeError::ProfileRequestFailed(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        if status.is_server_error() {
            error!(%status, "{}", message);
        } else {
            warn!(%status, "{}", message);
        }

        (status, Html(pages::error_page(status, &message))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
