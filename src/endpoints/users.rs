use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::ApiJson;
use crate::{
    AppState, Db, Error, Result,
    auth::validate_init_data,
    config::AppConfig,
    models::{Language, User},
    queries::{self, LeaderboardEntry, Profile},
    settings,
    users::{self, UserInit},
};

#[derive(Deserialize)]
struct InitInput {
    #[serde(flatten)]
    user: UserInit,
    #[serde(alias = "initData")]
    init_data: Option<String>,
}

#[derive(Deserialize)]
struct LanguageInput {
    language: String,
}

async fn init(State(db): State<Db>, ApiJson(input): ApiJson<InitInput>) -> Result<Json<Value>> {
    if !validate_init_data(input.init_data.as_deref()) {
        return Err(Error::bad_request(anyhow::anyhow!("invalid init data")));
    }

    let user = users::upsert(&db, &input.user).await?;
    Ok(Json(json!({ "status": "ok", "user": user })))
}

async fn profile(State(db): State<Db>, Path(id): Path<i64>) -> Result<Json<Profile>> {
    Ok(Json(queries::profile(&db, id).await?))
}

async fn set_language(
    State(db): State<Db>,
    Path(id): Path<i64>,
    ApiJson(input): ApiJson<LanguageInput>,
) -> Result<Json<Value>> {
    let language: Language = input
        .language
        .parse()
        .map_err(|e: String| Error::bad_request(anyhow::anyhow!(e)))?;

    let user: User = users::set_language(&db, id, language).await?;
    Ok(Json(json!({ "status": "ok", "user": user })))
}

async fn leaderboard(
    State(db): State<Db>,
    State(config): State<AppConfig>,
) -> Result<Json<Vec<LeaderboardEntry>>> {
    Ok(Json(queries::leaderboard(&db, config.leaderboard_size).await?))
}

async fn health(State(db): State<Db>) -> Result<Json<Value>> {
    let users = queries::user_count(&db).await?;
    Ok(Json(json!({ "status": "ok", "users": users })))
}

/// Public feature flags for the frontend.
async fn config(State(db): State<Db>) -> Result<Json<Value>> {
    let settings = settings::load(&db).await.map_err(anyhow::Error::from)?;
    Ok(Json(json!({ "debug_logging": settings.flags.debug_logging })))
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/init", post(init))
        .route("/profile/{id}", get(profile))
        .route("/profile/{id}/language", post(set_language))
        .route("/leaderboard", get(leaderboard))
        .route("/health", get(health))
        .route("/config", get(config))
}
