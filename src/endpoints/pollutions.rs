use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::ApiJson;
use crate::{
    AppState, Db, Result,
    models::SeverityLevel,
    queries::{self, AuthoredReport, HistoryEntry, MapMarker},
    reports::{Cleanup, NewReport, ReportService},
};

#[derive(Deserialize)]
struct CreateInput {
    user_id: i64,
    lat: f64,
    lng: f64,
    level: SeverityLevel,
    types: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    photos: Vec<String>,
}

#[derive(Deserialize)]
struct CleanInput {
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    photos: Vec<String>,
}

async fn list(State(db): State<Db>) -> Result<Json<Vec<MapMarker>>> {
    Ok(Json(queries::active_reports(&db).await?))
}

async fn create(
    State(reports): State<ReportService>,
    ApiJson(input): ApiJson<CreateInput>,
) -> Result<Json<Value>> {
    let id = reports
        .create(NewReport {
            reporter_id: input.user_id,
            lat: input.lat,
            lng: input.lng,
            level: input.level,
            types: input.types,
            description: input.description.unwrap_or_default(),
            photos: input.photos,
        })
        .await?;

    Ok(Json(json!({ "status": "ok", "id": id })))
}

async fn clean(
    State(reports): State<ReportService>,
    Path(id): Path<i64>,
    ApiJson(input): ApiJson<CleanInput>,
) -> Result<Json<Value>> {
    let outcome = reports
        .clean(
            id,
            Cleanup {
                cleaner_id: input.user_id,
                comment: input.comment,
                photos: input.photos,
            },
        )
        .await?;

    Ok(Json(json!({
        "status": "ok",
        "new_balance": outcome.balance,
        "reward": outcome.credited,
    })))
}

async fn authored(State(db): State<Db>, Path(user): Path<i64>) -> Result<Json<Vec<AuthoredReport>>> {
    Ok(Json(queries::user_reports(&db, user).await?))
}

async fn history(State(db): State<Db>, Path(user): Path<i64>) -> Result<Json<Vec<HistoryEntry>>> {
    Ok(Json(queries::cleanup_history(&db, user).await?))
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/pollutions", get(list).post(create))
        .route("/pollutions/{id}/clean", post(clean))
        .route("/pollutions/user/{id}", get(authored))
        .route("/history/user/{id}", get(history))
}
