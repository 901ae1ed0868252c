//! User accounts, keyed by their Telegram id.
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqliteExecutor;
use tracing::info;

use crate::{
    db::Db,
    error::ServiceError,
    models::{Language, USER_COLUMNS, User},
};

/// Profile data sent by the mini-app (or the bot) when a user opens it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInit {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i64>,
    pub phone: Option<String>,
    pub language: Option<Language>,
}

/// Create the user identified by `init.telegram_id`, or refresh the profile fields it carries.
///
/// Fields that are absent from `init` keep their stored value. The balance is never touched.
pub async fn upsert(db: &Db, init: &UserInit) -> Result<User, ServiceError> {
    if init.age.is_some_and(|age| !(0..=150).contains(&age)) {
        return Err(ServiceError::client("age must be between 0 and 150"));
    }

    let user: User = sqlx::query_as(&format!(
        r#"
        INSERT INTO users (telegram_id, username, first_name, last_name, age, phone, language, balance, created_at)
            VALUES (?, ?, ?, ?, ?, ?, COALESCE(?, 'ru'), 0, ?)
            ON CONFLICT (telegram_id) DO UPDATE SET
                username = COALESCE(excluded.username, users.username),
                first_name = COALESCE(excluded.first_name, users.first_name),
                last_name = COALESCE(excluded.last_name, users.last_name),
                age = COALESCE(excluded.age, users.age),
                phone = COALESCE(excluded.phone, users.phone),
                language = COALESCE(?, users.language)
            RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(init.telegram_id)
    .bind(init.username.as_deref())
    .bind(init.first_name.as_deref())
    .bind(init.last_name.as_deref())
    .bind(init.age)
    .bind(init.phone.as_deref())
    .bind(init.language)
    .bind(Utc::now())
    .bind(init.language)
    .fetch_one(db)
    .await?;

    info!(user = user.id, telegram_id = user.telegram_id, "user initialized");
    Ok(user)
}

pub async fn find_by_id<'e, E: SqliteExecutor<'e>>(db: E, id: i64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Store the preferred interface language of user `id`.
pub async fn set_language(db: &Db, id: i64, language: Language) -> Result<User, ServiceError> {
    sqlx::query_as(&format!(
        "UPDATE users SET language = ? WHERE id = ? RETURNING {USER_COLUMNS}"
    ))
    .bind(language)
    .bind(id)
    .fetch_optional(db)
    .await?
    .ok_or(ServiceError::NotFound("user"))
}
