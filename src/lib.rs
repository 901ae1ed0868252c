//! EcoPatrol: backend of a Telegram mini-app for crowd-sourced pollution reporting.
//!
//! Users mark litter on a map, other users clean it up and are credited a reward, and operators
//! moderate reports and balances.
mod admin;
mod auth;
mod bot;
mod config;
mod db;
mod endpoints;
pub mod error;
mod metrics;
mod models;
mod notify;
mod queries;
mod reports;
mod rewards;
mod serve;
mod settings;
mod users;


use db::Db;
pub use serve::{AppState, Error, Result, run};

/// The index (/) route.
async fn index() -> impl axum::response::IntoResponse {
    concat!(
        "EcoPatrol ",
        env!("CARGO_PKG_VERSION"),
        "\n\nThis is the backend of the EcoPatrol mini-app.\nAll API routes are under /api/\n"
    )
}
