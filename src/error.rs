use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Errors raised by the domain services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A required field is missing or invalid.
    #[error("{0}")]
    Client(String),
    /// The referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The report has already left the `active` state.
    #[error("Already cleaned")]
    AlreadyCleaned,
    /// The caller is not in the operator allow-list.
    #[error("operator access required")]
    Unauthorized,
    /// Operator accounts cannot be deleted.
    #[error("operator accounts are protected")]
    Protected,
    /// The store failed. Any open transaction is rolled back when dropped.
    #[error("database error")]
    Store(#[from] sqlx::Error),
}

impl ServiceError {
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match *self {
            Self::Client(_) | Self::AlreadyCleaned => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::Protected => StatusCode::FORBIDDEN,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `axum`-compatible error handler.
#[derive(Error)]
pub struct Error {
    status: StatusCode,
    err: anyhow::Error,
}

impl Error {
    pub fn bad_request(err: impl Into<anyhow::Error>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, err)
    }

    pub fn with_status(status: StatusCode, err: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            err: err.into(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err,
        }
    }
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        Self {
            status: err.status(),
            err: err.into(),
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(anyhow::anyhow!(rejection.body_text()))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.status, self.err)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.err.fmt(f)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{:?}", self.err);
        } else {
            warn!("{}: {:#}", self.status, self.err);
        }

        // N.B: The diagnostic text is forwarded for server errors as well. This API only
        // serves the mini-app and its operators, and the message is what they report back.
        let body = serde_json::json!({ "error": format!("{:#}", self.err) });
        (self.status, Json(body)).into_response()
    }
}
