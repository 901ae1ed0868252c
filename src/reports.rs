//! The report lifecycle: `active` on creation, `cleaned` once someone cleans it up.
//!
//! A report pays out exactly once. The cleanup transition is a conditional update on
//! `status`, so two cleanups racing on the same report cannot both succeed.
use chrono::Utc;
use metrics::counter;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::{
    config::CleanupConfig,
    db::Db,
    error::ServiceError,
    metrics::{REPORTS_CLEANED, REPORTS_CLEAN_CONFLICTS, REPORTS_CREATED, REWARDS_CREDITED},
    models::{PhotoKind, SeverityLevel},
    rewards, users,
};

/// Maximum number of photos attached in a single request.
pub const MAX_PHOTOS: usize = 10;

/// A report about to be created.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub reporter_id: i64,
    pub lat: f64,
    pub lng: f64,
    pub level: SeverityLevel,
    pub types: Vec<String>,
    pub description: String,
    /// URLs of the "before" photos.
    pub photos: Vec<String>,
}

/// A cleanup submitted for a report.
#[derive(Debug, Clone, Default)]
pub struct Cleanup {
    /// The user who cleaned the site. Absent for anonymous cleanups.
    pub cleaner_id: Option<i64>,
    pub comment: Option<String>,
    /// URLs of the "after" photos.
    pub photos: Vec<String>,
}

/// The result of a successful cleanup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanOutcome {
    /// The reward credited to the cleaner. Zero when no cleaner was credited.
    pub credited: f64,
    /// The cleaner's balance after the credit. Zero when no cleaner was credited.
    pub balance: f64,
}

/// Creates reports and moves them through their lifecycle.
#[derive(Clone)]
pub struct ReportService {
    db: Db,
    policy: CleanupConfig,
}

impl ReportService {
    pub fn new(db: Db, policy: CleanupConfig) -> Self {
        Self { db, policy }
    }

    /// Create an active report and attach its "before" photos. Returns the new report id.
    ///
    /// The reward is resolved from the current schedule and stored on the report. Later
    /// schedule changes do not affect it.
    pub async fn create(&self, report: NewReport) -> Result<i64, ServiceError> {
        validate_location(report.lat, report.lng)?;
        let types = normalize_types(report.types)?;
        let photos = normalize_photos(report.photos)?;

        if users::find_by_id(&self.db, report.reporter_id).await?.is_none() {
            return Err(ServiceError::NotFound("user"));
        }
        let reward = rewards::resolve(&self.db, report.level).await?;

        // Begin a new transaction to insert the report with its photos.
        // Unless committed, the transaction will be automatically rolled back.
        let mut tx = self.db.begin().await?;
        let now = Utc::now();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pollutions (user_id, lat, lng, level, types, description, status, reward, created_at)
                VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?)
                RETURNING id
            "#,
        )
        .bind(report.reporter_id)
        .bind(report.lat)
        .bind(report.lng)
        .bind(i64::from(report.level))
        .bind(sqlx::types::Json(&types))
        .bind(report.description.trim())
        .bind(reward)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        attach_photos(&mut tx, id, PhotoKind::Before, &photos).await?;
        tx.commit().await?;

        counter!(REPORTS_CREATED).increment(1);
        info!(
            report = id,
            reporter = report.reporter_id,
            level = report.level.get(),
            reward,
            "report created"
        );
        Ok(id)
    }

    /// Mark report `id` as cleaned and credit its stored reward to the cleaner.
    ///
    /// Fails with [`ServiceError::AlreadyCleaned`] if the report is no longer active. If the
    /// cleaner is absent or unknown, the report is still cleaned but nobody is credited,
    /// unless the policy requires a known cleaner.
    pub async fn clean(&self, id: i64, cleanup: Cleanup) -> Result<CleanOutcome, ServiceError> {
        let photos = normalize_photos(cleanup.photos)?;
        let comment = cleanup
            .comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let mut tx = self.db.begin().await?;

        // N.B: This must be the first statement of the transaction. SQLite only waits for a
        // competing writer when the transaction has not read anything yet.
        //
        // The cleaner reference is only kept if it resolves, and the credited amount is the
        // reward stored on the report, never a freshly resolved one.
        let claimed: Option<(f64, Option<i64>)> = sqlx::query_as(
            r#"
            UPDATE pollutions
                SET status = 'cleaned',
                    cleaner_id = (SELECT id FROM users WHERE id = ?1),
                    paid_reward = CASE
                        WHEN EXISTS (SELECT 1 FROM users WHERE id = ?1) THEN reward
                        ELSE 0
                    END,
                    clean_comment = ?2,
                    cleaned_at = ?3
                WHERE id = ?4 AND status = 'active'
                RETURNING reward, cleaner_id
            "#,
        )
        .bind(cleanup.cleaner_id)
        .bind(comment)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((reward, cleaner)) = claimed else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pollutions WHERE id = ?)")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;

            return if exists {
                counter!(REPORTS_CLEAN_CONFLICTS).increment(1);
                warn!(report = id, "report already cleaned");
                Err(ServiceError::AlreadyCleaned)
            } else {
                Err(ServiceError::NotFound("report"))
            };
        };

        let outcome = match cleaner {
            Some(cleaner) => {
                let balance: f64 = sqlx::query_scalar(
                    "UPDATE users SET balance = balance + ? WHERE id = ? RETURNING balance",
                )
                .bind(reward)
                .bind(cleaner)
                .fetch_one(&mut *tx)
                .await?;

                CleanOutcome {
                    credited: reward,
                    balance,
                }
            }
            None if self.policy.require_known_cleaner => {
                // Dropping the transaction rolls the transition back.
                return Err(ServiceError::client(match cleanup.cleaner_id {
                    Some(c) => format!("unknown cleaner {c}"),
                    None => "user_id is required".to_owned(),
                }));
            }
            None => {
                warn!(
                    report = id,
                    cleaner = cleanup.cleaner_id,
                    "cleaner did not resolve to a user, no reward credited"
                );
                CleanOutcome {
                    credited: 0.0,
                    balance: 0.0,
                }
            }
        };

        attach_photos(&mut tx, id, PhotoKind::After, &photos).await?;
        tx.commit().await?;

        counter!(REPORTS_CLEANED).increment(1);
        if outcome.credited > 0.0 {
            counter!(REWARDS_CREDITED).increment(1);
        }
        info!(
            report = id,
            cleaner,
            credited = outcome.credited,
            balance = outcome.balance,
            "report cleaned"
        );
        Ok(outcome)
    }
}

async fn attach_photos(
    conn: &mut SqliteConnection,
    report: i64,
    kind: PhotoKind,
    urls: &[String],
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    for url in urls {
        let _res = sqlx::query(
            "INSERT INTO photos (pollution_id, url, kind, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(report)
        .bind(url)
        .bind(kind)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn validate_location(lat: f64, lng: f64) -> Result<(), ServiceError> {
    if !(lat.is_finite() && (-90.0..=90.0).contains(&lat)) {
        return Err(ServiceError::client(format!("invalid latitude {lat}")));
    }
    if !(lng.is_finite() && (-180.0..=180.0).contains(&lng)) {
        return Err(ServiceError::client(format!("invalid longitude {lng}")));
    }
    Ok(())
}

/// Trim and deduplicate category tags, preserving their order.
fn normalize_types(types: Vec<String>) -> Result<Vec<String>, ServiceError> {
    let mut out: Vec<String> = Vec::with_capacity(types.len());
    for t in types {
        let t = t.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_owned());
        }
    }
    if out.is_empty() {
        return Err(ServiceError::client("types must contain at least one category"));
    }
    Ok(out)
}

fn normalize_photos(photos: Vec<String>) -> Result<Vec<String>, ServiceError> {
    let photos: Vec<String> = photos
        .into_iter()
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty())
        .collect();
    if photos.len() > MAX_PHOTOS {
        return Err(ServiceError::client(format!(
            "at most {MAX_PHOTOS} photos can be attached"
        )));
    }
    Ok(photos)
}
