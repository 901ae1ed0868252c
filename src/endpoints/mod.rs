//! HTTP routes of the mini-app API, mounted under `/api`.
use axum::{Router, extract::FromRequest};

use crate::{AppState, Error};

mod admin;
mod pollutions;
mod users;

/// A JSON request body. Bodies that fail to parse are rejected with `400 Bad Request`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub(crate) struct ApiJson<T>(pub T);

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(users::routes())
        .merge(pollutions::routes())
        .nest("/admin", admin::routes())
}
