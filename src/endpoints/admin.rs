//! Operator endpoints. The caller's id comes from `admin_tg_id`, in the query string or the body.
//!
//! Callers are authorized before their payload is decoded, so a non-operator is always refused
//! with `403 Forbidden`, whatever the body holds.
use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    AppState, Result,
    admin::{AdminReport, AdminService, AdminUser, DeletedUser, SettingsView, Stats},
    auth::AdminRequest,
    settings::{FlagsUpdate, SettingsUpdate},
};

#[derive(Deserialize)]
struct BalanceInput {
    balance: f64,
}

#[derive(Deserialize)]
struct RewardInput {
    reward: f64,
}

#[derive(Deserialize)]
struct SettingsInput {
    #[serde(default)]
    rewards: BTreeMap<u8, f64>,
    #[serde(default)]
    flags: FlagsUpdate,
}

#[derive(Deserialize)]
struct NotifyInput {
    user_id: i64,
    message: String,
}

async fn users(State(admin): State<AdminService>, req: AdminRequest) -> Result<Json<Vec<AdminUser>>> {
    Ok(Json(admin.list_users(req.caller()).await?))
}

async fn pollutions(
    State(admin): State<AdminService>,
    req: AdminRequest,
) -> Result<Json<Vec<AdminReport>>> {
    Ok(Json(admin.list_reports(req.caller()).await?))
}

async fn set_balance(
    State(admin): State<AdminService>,
    Path(id): Path<i64>,
    req: AdminRequest,
) -> Result<Json<Value>> {
    let _op = admin.authorize(req.caller())?;
    let input: BalanceInput = req.json()?;

    let balance = admin.set_balance(req.caller(), id, input.balance).await?;
    Ok(Json(json!({ "status": "ok", "balance": balance })))
}

async fn set_reward(
    State(admin): State<AdminService>,
    Path(id): Path<i64>,
    req: AdminRequest,
) -> Result<Json<Value>> {
    let _op = admin.authorize(req.caller())?;
    let input: RewardInput = req.json()?;

    let reward = admin.set_reward(req.caller(), id, input.reward).await?;
    Ok(Json(json!({ "status": "ok", "reward": reward })))
}

async fn delete_user(
    State(admin): State<AdminService>,
    Path(id): Path<i64>,
    req: AdminRequest,
) -> Result<Json<DeletedUser>> {
    Ok(Json(admin.delete_user(req.caller(), id).await?))
}

async fn delete_pollution(
    State(admin): State<AdminService>,
    Path(id): Path<i64>,
    req: AdminRequest,
) -> Result<Json<Value>> {
    admin.delete_report(req.caller(), id).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn settings(State(admin): State<AdminService>, req: AdminRequest) -> Result<Json<SettingsView>> {
    Ok(Json(admin.settings(req.caller()).await?))
}

async fn update_settings(
    State(admin): State<AdminService>,
    req: AdminRequest,
) -> Result<Json<SettingsView>> {
    let _op = admin.authorize(req.caller())?;
    let input: SettingsInput = req.json()?;

    let update = SettingsUpdate {
        rewards: input.rewards,
        flags: input.flags,
    };
    Ok(Json(admin.update_settings(req.caller(), &update).await?))
}

async fn stats(State(admin): State<AdminService>, req: AdminRequest) -> Result<Json<Stats>> {
    Ok(Json(admin.stats(req.caller()).await?))
}

/// Delivery failures are reported in the body with a `200 OK`.
async fn notify(State(admin): State<AdminService>, req: AdminRequest) -> Result<Json<Value>> {
    let _op = admin.authorize(req.caller())?;
    let input: NotifyInput = req.json()?;

    let outcome = admin
        .notify(req.caller(), input.user_id, &input.message)
        .await?;

    Ok(Json(match outcome.error {
        None => json!({ "status": "ok" }),
        Some(error) => json!({ "status": "failed", "error": error }),
    }))
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(users))
        .route("/users/{id}", delete(delete_user))
        .route("/users/{id}/balance", post(set_balance))
        .route("/pollutions", get(pollutions))
        .route("/pollutions/{id}", delete(delete_pollution))
        .route("/pollutions/{id}/reward", post(set_reward))
        .route("/settings", get(settings).post(update_settings))
        .route("/stats", get(stats))
        .route("/notify", post(notify))
}
