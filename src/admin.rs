//! Privileged moderation operations.
//!
//! Every operation takes the caller's Telegram id and checks it against the operator
//! allow-list before touching the store.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use sqlx::FromRow;
use tracing::{info, warn};

use crate::{
    db::Db,
    error::ServiceError,
    metrics::ADMIN_DENIED,
    models::{PhotoKind, REPORT_COLUMNS, Report, ReportStatus, USER_COLUMNS, User},
    notify::Notifier,
    queries::photos_by_report,
    rewards::validate_amount,
    settings::{self, FeatureFlags, Settings, SettingsUpdate},
    users,
};

/// The set of Telegram ids allowed to perform admin operations.
#[derive(Debug, Clone, Default)]
pub struct Operators(Arc<BTreeSet<i64>>);

impl Operators {
    pub fn contains(&self, telegram_id: i64) -> bool {
        self.0.contains(&telegram_id)
    }
}

impl FromIterator<i64> for Operators {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AdminUser {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub user: User,
    pub reports_count: i64,
    pub cleaned_count: i64,
}

/// Identity of a report's creator or cleaner.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserRef {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminReport {
    pub id: i64,
    pub lat: f64,
    pub lng: f64,
    pub level: u8,
    pub types: Vec<String>,
    pub description: String,
    pub status: ReportStatus,
    pub reward: f64,
    pub paid_reward: f64,
    pub clean_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub cleaned_at: Option<DateTime<Utc>>,
    pub creator: Option<UserRef>,
    pub cleaner: Option<UserRef>,
    pub photos_before: Vec<String>,
    pub photos_after: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsView {
    /// The resolved reward of every level.
    pub rewards: BTreeMap<u8, f64>,
    pub flags: FeatureFlags,
}

impl From<&Settings> for SettingsView {
    fn from(settings: &Settings) -> Self {
        Self {
            rewards: settings.rewards.table(),
            flags: settings.flags,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub users: i64,
    pub active: i64,
    pub cleaned: i64,
    /// Total of all rewards credited to cleaners.
    pub rewards_paid: f64,
    /// Total of all user balances.
    pub balances: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletedUser {
    /// Reports authored by the user, removed with their photos.
    pub reports_deleted: u64,
    /// Reports cleaned by the user that were kept with the cleaner cleared.
    pub cleanups_detached: u64,
}

/// The result of an admin notification. Delivery failures are not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotifyOutcome {
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct AdminService {
    db: Db,
    operators: Operators,
    notifier: Arc<dyn Notifier>,
}

impl AdminService {
    pub fn new(db: Db, operators: Operators, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            operators,
            notifier,
        }
    }

    pub fn is_operator(&self, telegram_id: i64) -> bool {
        self.operators.contains(telegram_id)
    }

    /// Check `caller` against the allow-list.
    pub fn authorize(&self, caller: Option<i64>) -> Result<i64, ServiceError> {
        match caller {
            Some(id) if self.operators.contains(id) => Ok(id),
            _ => {
                counter!(ADMIN_DENIED).increment(1);
                warn!(caller, "rejected admin request");
                Err(ServiceError::Unauthorized)
            }
        }
    }

    pub async fn list_users(&self, caller: Option<i64>) -> Result<Vec<AdminUser>, ServiceError> {
        let _op = self.authorize(caller)?;
        Ok(sqlx::query_as(&format!(
            r#"
            SELECT {USER_COLUMNS},
                (SELECT COUNT(*) FROM pollutions p WHERE p.user_id = users.id) AS reports_count,
                (SELECT COUNT(*) FROM pollutions p
                    WHERE p.cleaner_id = users.id AND p.status = 'cleaned') AS cleaned_count
                FROM users
                ORDER BY id
            "#
        ))
        .fetch_all(&self.db)
        .await?)
    }

    pub async fn list_reports(&self, caller: Option<i64>) -> Result<Vec<AdminReport>, ServiceError> {
        let _op = self.authorize(caller)?;
        let reports: Vec<Report> = sqlx::query_as(&format!(
            "SELECT {REPORT_COLUMNS} FROM pollutions ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        let people: HashMap<i64, UserRef> =
            sqlx::query_as::<_, UserRef>("SELECT id, telegram_id, username, first_name FROM users")
                .fetch_all(&self.db)
                .await?
                .into_iter()
                .map(|u| (u.id, u))
                .collect();
        let ids: Vec<i64> = reports.iter().map(|r| r.id).collect();
        let photos = photos_by_report(&self.db, &ids).await?;

        Ok(reports
            .into_iter()
            .map(|r| {
                let urls = |kind: PhotoKind| -> Vec<String> {
                    photos
                        .get(&r.id)
                        .into_iter()
                        .flatten()
                        .filter(|p| p.kind == kind)
                        .map(|p| p.url.clone())
                        .collect()
                };
                AdminReport {
                    photos_before: urls(PhotoKind::Before),
                    photos_after: urls(PhotoKind::After),
                    creator: people.get(&r.user_id).cloned(),
                    cleaner: r.cleaner_id.and_then(|c| people.get(&c).cloned()),
                    id: r.id,
                    lat: r.lat,
                    lng: r.lng,
                    level: r.level.get(),
                    types: r.types.0,
                    description: r.description,
                    status: r.status,
                    reward: r.reward,
                    paid_reward: r.paid_reward,
                    clean_comment: r.clean_comment,
                    created_at: r.created_at,
                    cleaned_at: r.cleaned_at,
                }
            })
            .collect())
    }

    /// Overwrite the balance of user `id`. Returns the new balance.
    pub async fn set_balance(&self, caller: Option<i64>, id: i64, balance: f64) -> Result<f64, ServiceError> {
        let op = self.authorize(caller)?;
        let balance = validate_amount(balance).map_err(|e| ServiceError::client(e.to_string()))?;

        let balance: f64 = sqlx::query_scalar("UPDATE users SET balance = ? WHERE id = ? RETURNING balance")
            .bind(balance)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(ServiceError::NotFound("user"))?;

        info!(operator = op, user = id, balance, "balance overridden");
        Ok(balance)
    }

    /// Overwrite the stored reward of report `id`. Returns the new reward.
    pub async fn set_reward(&self, caller: Option<i64>, id: i64, reward: f64) -> Result<f64, ServiceError> {
        let op = self.authorize(caller)?;
        let reward = validate_amount(reward).map_err(|e| ServiceError::client(e.to_string()))?;

        let reward: f64 = sqlx::query_scalar("UPDATE pollutions SET reward = ? WHERE id = ? RETURNING reward")
            .bind(reward)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(ServiceError::NotFound("report"))?;

        info!(operator = op, report = id, reward, "reward overridden");
        Ok(reward)
    }

    /// Delete report `id` together with its photos.
    pub async fn delete_report(&self, caller: Option<i64>, id: i64) -> Result<(), ServiceError> {
        let op = self.authorize(caller)?;

        let mut tx = self.db.begin().await?;
        let _photos = sqlx::query("DELETE FROM photos WHERE pollution_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM pollutions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(ServiceError::NotFound("report"));
        }
        tx.commit().await?;

        info!(operator = op, report = id, "report deleted");
        Ok(())
    }

    /// Delete user `id`.
    ///
    /// Reports they authored are removed with their photos. Reports they cleaned are kept,
    /// with the cleaner cleared.
    pub async fn delete_user(&self, caller: Option<i64>, id: i64) -> Result<DeletedUser, ServiceError> {
        let op = self.authorize(caller)?;

        let user = users::find_by_id(&self.db, id)
            .await?
            .ok_or(ServiceError::NotFound("user"))?;
        if self.operators.contains(user.telegram_id) {
            return Err(ServiceError::Protected);
        }

        let mut tx = self.db.begin().await?;
        let cleanups_detached = sqlx::query(
            "UPDATE pollutions SET cleaner_id = NULL WHERE cleaner_id = ?1 AND user_id != ?1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let _photos = sqlx::query(
            "DELETE FROM photos WHERE pollution_id IN (SELECT id FROM pollutions WHERE user_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let reports_deleted = sqlx::query("DELETE FROM pollutions WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let _user = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            operator = op,
            user = id,
            reports_deleted,
            cleanups_detached,
            "user deleted"
        );
        Ok(DeletedUser {
            reports_deleted,
            cleanups_detached,
        })
    }

    pub async fn settings(&self, caller: Option<i64>) -> Result<SettingsView, ServiceError> {
        let _op = self.authorize(caller)?;
        Ok(SettingsView::from(&settings::load(&self.db).await?))
    }

    /// Validate and store a settings change. Returns the resulting settings.
    pub async fn update_settings(
        &self,
        caller: Option<i64>,
        update: &SettingsUpdate,
    ) -> Result<SettingsView, ServiceError> {
        let op = self.authorize(caller)?;

        let mut current = settings::load(&self.db).await?;
        let rows = current
            .apply(update)
            .map_err(|e| ServiceError::client(e.to_string()))?;

        let mut tx = self.db.begin().await?;
        settings::store(&mut tx, &rows).await?;
        tx.commit().await?;

        info!(operator = op, changed = rows.len(), "settings updated");
        Ok(SettingsView::from(&current))
    }

    /// Send `message` to user `id` through the notification gateway.
    pub async fn notify(&self, caller: Option<i64>, id: i64, message: &str) -> Result<NotifyOutcome, ServiceError> {
        let op = self.authorize(caller)?;
        let message = message.trim();
        if message.is_empty() {
            return Err(ServiceError::client("message must not be empty"));
        }

        let user = users::find_by_id(&self.db, id)
            .await?
            .ok_or(ServiceError::NotFound("user"))?;

        match self.notifier.send(user.telegram_id, message).await {
            Ok(()) => {
                info!(operator = op, user = id, "notification sent");
                Ok(NotifyOutcome {
                    delivered: true,
                    error: None,
                })
            }
            Err(err) => Ok(NotifyOutcome {
                delivered: false,
                error: Some(err.to_string()),
            }),
        }
    }

    pub async fn stats(&self, caller: Option<i64>) -> Result<Stats, ServiceError> {
        let _op = self.authorize(caller)?;

        let (users, (active, cleaned, rewards_paid), balances) = futures::try_join!(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users").fetch_one(&self.db),
            sqlx::query_as::<_, (i64, i64, f64)>(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'active'),
                    COUNT(*) FILTER (WHERE status = 'cleaned'),
                    COALESCE(SUM(paid_reward), 0.0)
                    FROM pollutions
                "#
            )
            .fetch_one(&self.db),
            sqlx::query_scalar::<_, f64>("SELECT COALESCE(SUM(balance), 0.0) FROM users")
                .fetch_one(&self.db),
        )?;

        Ok(Stats {
            users,
            active,
            cleaned,
            rewards_paid,
            balances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::CleanupConfig,
        models::SeverityLevel,
        reports::{Cleanup, NewReport, ReportService},
        settings::FlagsUpdate,
        tests::{FailingNotifier, RecordingNotifier, TestDb},
    };

    const OPERATOR: i64 = 1000;

    fn service(db: &TestDb, notifier: Arc<dyn Notifier>) -> AdminService {
        AdminService::new(db.pool.clone(), [OPERATOR].into_iter().collect(), notifier)
    }

    async fn report(reports: &ReportService, reporter: i64) -> anyhow::Result<i64> {
        Ok(reports
            .create(NewReport {
                reporter_id: reporter,
                lat: 10.0,
                lng: 20.0,
                level: SeverityLevel::try_from(1)?,
                types: vec!["plastic".to_owned()],
                description: String::new(),
                photos: vec!["before.jpg".to_owned()],
            })
            .await?)
    }

    async fn clean(reports: &ReportService, id: i64, cleaner: i64) -> anyhow::Result<()> {
        let _outcome = reports
            .clean(
                id,
                Cleanup {
                    cleaner_id: Some(cleaner),
                    comment: None,
                    photos: vec!["after.jpg".to_owned()],
                },
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn rejects_non_operators_without_side_effects() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let admin = service(&db, Arc::new(RecordingNotifier::default()));
        let user = db.user_with_balance(5, 10.0).await?;

        for caller in [None, Some(5), Some(OPERATOR + 1)] {
            assert!(matches!(
                admin.set_balance(caller, user.id, 999.0).await,
                Err(ServiceError::Unauthorized)
            ));
            assert!(matches!(
                admin.delete_user(caller, user.id).await,
                Err(ServiceError::Unauthorized)
            ));
            assert!(matches!(admin.stats(caller).await, Err(ServiceError::Unauthorized)));
            assert!(matches!(
                admin.update_settings(caller, &SettingsUpdate::default()).await,
                Err(ServiceError::Unauthorized)
            ));
        }

        assert_eq!(db.balance(user.id).await?, 10.0);
        assert_eq!(admin.list_users(Some(OPERATOR)).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn overrides_balance_and_reward() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let admin = service(&db, Arc::new(RecordingNotifier::default()));
        let reports = ReportService::new(db.pool.clone(), CleanupConfig::default());
        let user = db.user(5).await?;
        let id = report(&reports, user.id).await?;

        assert_eq!(admin.set_balance(Some(OPERATOR), user.id, 12.5).await?, 12.5);
        assert_eq!(db.balance(user.id).await?, 12.5);
        assert!(matches!(
            admin.set_balance(Some(OPERATOR), user.id, -1.0).await,
            Err(ServiceError::Client(_))
        ));
        assert!(matches!(
            admin.set_balance(Some(OPERATOR), 404, 1.0).await,
            Err(ServiceError::NotFound("user"))
        ));

        assert_eq!(admin.set_reward(Some(OPERATOR), id, 7.0).await?, 7.0);
        assert_eq!(db.report(id).await?.reward, 7.0);
        assert!(matches!(
            admin.set_reward(Some(OPERATOR), id + 1, 7.0).await,
            Err(ServiceError::NotFound("report"))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_cleaner_keeps_their_cleanups() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let admin = service(&db, Arc::new(RecordingNotifier::default()));
        let reports = ReportService::new(db.pool.clone(), CleanupConfig::default());
        let reporter = db.user(1).await?;
        let cleaner = db.user(2).await?;

        let mut cleaned = Vec::new();
        for _ in 0..3 {
            let id = report(&reports, reporter.id).await?;
            clean(&reports, id, cleaner.id).await?;
            cleaned.push(id);
        }
        let own = report(&reports, cleaner.id).await?;

        let deleted = admin.delete_user(Some(OPERATOR), cleaner.id).await?;
        assert_eq!(
            deleted,
            DeletedUser {
                reports_deleted: 1,
                cleanups_detached: 3
            }
        );

        for id in cleaned {
            let r = db.report(id).await?;
            assert_eq!(r.status, ReportStatus::Cleaned);
            assert_eq!(r.cleaner_id, None);
        }
        assert!(db.try_report(own).await?.is_none());
        assert_eq!(db.photo_count(own).await?, 0);
        assert!(users::find_by_id(&db.pool, cleaner.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn operators_cannot_be_deleted() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let admin = service(&db, Arc::new(RecordingNotifier::default()));
        let operator = db.user(OPERATOR).await?;

        assert!(matches!(
            admin.delete_user(Some(OPERATOR), operator.id).await,
            Err(ServiceError::Protected)
        ));
        assert!(matches!(
            admin.delete_user(Some(OPERATOR), operator.id + 1).await,
            Err(ServiceError::NotFound("user"))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn delete_report_removes_photos() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let admin = service(&db, Arc::new(RecordingNotifier::default()));
        let reports = ReportService::new(db.pool.clone(), CleanupConfig::default());
        let user = db.user(5).await?;
        let id = report(&reports, user.id).await?;

        admin.delete_report(Some(OPERATOR), id).await?;
        assert!(db.try_report(id).await?.is_none());
        assert_eq!(db.photo_count(id).await?, 0);
        assert!(matches!(
            admin.delete_report(Some(OPERATOR), id).await,
            Err(ServiceError::NotFound("report"))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn settings_round_trip() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let admin = service(&db, Arc::new(RecordingNotifier::default()));

        let defaults = admin.settings(Some(OPERATOR)).await?;
        assert_eq!(defaults.rewards, BTreeMap::from([(1, 1.0), (2, 2.0), (3, 3.0)]));
        assert!(!defaults.flags.debug_logging);

        let updated = admin
            .update_settings(
                Some(OPERATOR),
                &SettingsUpdate {
                    rewards: BTreeMap::from([(3, 30.0)]),
                    flags: FlagsUpdate {
                        debug_logging: Some(true),
                    },
                },
            )
            .await?;
        assert_eq!(updated.rewards[&3], 30.0);
        assert_eq!(admin.settings(Some(OPERATOR)).await?, updated);

        assert!(matches!(
            admin
                .update_settings(
                    Some(OPERATOR),
                    &SettingsUpdate {
                        rewards: BTreeMap::from([(0, 1.0)]),
                        ..Default::default()
                    },
                )
                .await,
            Err(ServiceError::Client(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn notify_reports_delivery_failures_softly() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let user = db.user(77).await?;

        let recorder = Arc::new(RecordingNotifier::default());
        let admin = service(&db, recorder.clone());
        let outcome = admin.notify(Some(OPERATOR), user.id, " thanks! ").await?;
        assert!(outcome.delivered);
        assert_eq!(recorder.sent(), vec![(77, "thanks!".to_owned())]);

        let admin = service(&db, Arc::new(FailingNotifier));
        let outcome = admin.notify(Some(OPERATOR), user.id, "hello").await?;
        assert!(!outcome.delivered);
        assert!(outcome.error.is_some());

        assert!(matches!(
            admin.notify(Some(OPERATOR), user.id, "   ").await,
            Err(ServiceError::Client(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn stats_aggregate_the_ledger() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let admin = service(&db, Arc::new(RecordingNotifier::default()));
        let reports = ReportService::new(db.pool.clone(), CleanupConfig::default());
        let reporter = db.user(1).await?;
        let cleaner = db.user(2).await?;

        let empty = admin.stats(Some(OPERATOR)).await?;
        assert_eq!((empty.active, empty.cleaned, empty.rewards_paid), (0, 0, 0.0));

        let a = report(&reports, reporter.id).await?;
        let _b = report(&reports, reporter.id).await?;
        clean(&reports, a, cleaner.id).await?;
        let _c = admin.set_balance(Some(OPERATOR), reporter.id, 4.0).await?;

        assert_eq!(
            admin.stats(Some(OPERATOR)).await?,
            Stats {
                users: 2,
                active: 1,
                cleaned: 1,
                rewards_paid: 1.0,
                balances: 5.0,
            }
        );
        Ok(())
    }
}
