//! Rows of the `users`, `pollutions` and `photos` tables.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use thiserror::Error;

/// A severity level outside of `1..=3`.
#[derive(Debug, Error)]
#[error("level must be between 1 and 3, got {0}")]
pub struct InvalidLevel(pub i64);

/// Report severity, `1..=3`. Drives the default reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct SeverityLevel(u8);

impl SeverityLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 3;

    pub const fn get(self) -> u8 {
        self.0
    }

    /// All severity levels in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN..=Self::MAX).map(Self)
    }
}

impl TryFrom<i64> for SeverityLevel {
    type Error = InvalidLevel;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match u8::try_from(value) {
            Ok(v) if (Self::MIN..=Self::MAX).contains(&v) => Ok(Self(v)),
            _ => Err(InvalidLevel(value)),
        }
    }
}

impl From<SeverityLevel> for i64 {
    fn from(level: SeverityLevel) -> Self {
        Self::from(level.0)
    }
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ReportStatus {
    Active,
    Cleaned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PhotoKind {
    Before,
    After,
}

/// Interface languages supported by the mini-app and the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Language {
    Uz,
    #[default]
    Ru,
    En,
}

impl Language {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Uz => "uz",
            Self::Ru => "ru",
            Self::En => "en",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uz" => Ok(Self::Uz),
            "ru" => Ok(Self::Ru),
            "en" => Ok(Self::En),
            other => Err(format!("unsupported language {other:?}, expected uz, ru or en")),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i64>,
    pub phone: Option<String>,
    pub language: Language,
    pub balance: f64,
    pub created_at: DateTime<Utc>,
}

/// Column list matching [`User`].
pub(crate) const USER_COLUMNS: &str =
    "id, telegram_id, username, first_name, last_name, age, phone, language, balance, created_at";

#[derive(Debug, Clone, FromRow)]
pub struct Report {
    pub id: i64,
    /// The reporter.
    pub user_id: i64,
    pub lat: f64,
    pub lng: f64,
    #[sqlx(try_from = "i64")]
    pub level: SeverityLevel,
    pub types: Json<Vec<String>>,
    pub description: String,
    pub status: ReportStatus,
    /// Amount credited on cleanup, fixed when the report was created.
    pub reward: f64,
    /// Amount actually credited at cleanup. Zero while active or when no cleaner was credited.
    pub paid_reward: f64,
    pub cleaner_id: Option<i64>,
    pub clean_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub cleaned_at: Option<DateTime<Utc>>,
}

/// Column list matching [`Report`].
pub(crate) const REPORT_COLUMNS: &str = "id, user_id, lat, lng, level, types, description, status, \
     reward, paid_reward, cleaner_id, clean_comment, created_at, cleaned_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Photo {
    pub id: i64,
    pub pollution_id: i64,
    pub url: String,
    pub kind: PhotoKind,
    pub created_at: DateTime<Utc>,
}
