//! Read-only views: the map, per-user report lists, profiles and the leaderboard.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite};

use crate::{
    db::Db,
    error::ServiceError,
    models::{Language, Photo, PhotoKind, REPORT_COLUMNS, Report, ReportStatus},
};

/// An active report, as shown on the map.
#[derive(Debug, Clone, Serialize)]
pub struct MapMarker {
    pub id: i64,
    pub lat: f64,
    pub lng: f64,
    pub level: u8,
    pub types: Vec<String>,
    pub description: String,
    pub status: ReportStatus,
    /// URLs of the "before" photos.
    pub photos: Vec<String>,
}

/// A report as listed for its author.
#[derive(Debug, Clone, Serialize)]
pub struct AuthoredReport {
    pub id: i64,
    pub lat: f64,
    pub lng: f64,
    pub level: u8,
    pub types: Vec<String>,
    pub description: String,
    pub status: ReportStatus,
    pub reward: f64,
    pub photos_before: Vec<String>,
    pub photos_after: Vec<String>,
    pub clean_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub cleaned_at: Option<DateTime<Utc>>,
}

/// A cleanup performed by a user.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub lat: f64,
    pub lng: f64,
    pub level: u8,
    pub types: Vec<String>,
    pub description: String,
    pub reward: f64,
    pub comment: Option<String>,
    /// URLs of the "after" photos.
    pub photos: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub cleaned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Profile {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub balance: f64,
    /// Reports this user has cleaned personally.
    pub cleaned_count: i64,
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LeaderboardEntry {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub balance: f64,
    pub cleaned_count: i64,
}

/// Load the photos of the reports in `ids`, grouped by report id and ordered by upload.
pub(crate) async fn photos_by_report(
    db: &Db,
    ids: &[i64],
) -> Result<HashMap<i64, Vec<Photo>>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT id, pollution_id, url, kind, created_at FROM photos WHERE pollution_id IN (",
    );
    let mut separated = query.separated(", ");
    for &id in ids {
        let _sep = separated.push_bind(id);
    }
    let _query = separated.push_unseparated(") ORDER BY id");

    let photos: Vec<Photo> = query.build_query_as().fetch_all(db).await?;
    let mut grouped: HashMap<i64, Vec<Photo>> = HashMap::new();
    for photo in photos {
        grouped.entry(photo.pollution_id).or_default().push(photo);
    }
    Ok(grouped)
}

fn urls(photos: Option<&Vec<Photo>>, kind: PhotoKind) -> Vec<String> {
    photos
        .into_iter()
        .flatten()
        .filter(|p| p.kind == kind)
        .map(|p| p.url.clone())
        .collect()
}

/// Active reports for the map. Only "before" photos are exposed.
pub async fn active_reports(db: &Db) -> Result<Vec<MapMarker>, ServiceError> {
    let reports: Vec<Report> = sqlx::query_as(&format!(
        "SELECT {REPORT_COLUMNS} FROM pollutions WHERE status = 'active' ORDER BY id"
    ))
    .fetch_all(db)
    .await?;
    let ids: Vec<i64> = reports.iter().map(|r| r.id).collect();
    let photos = photos_by_report(db, &ids).await?;

    Ok(reports
        .into_iter()
        .map(|r| MapMarker {
            photos: urls(photos.get(&r.id), PhotoKind::Before),
            id: r.id,
            lat: r.lat,
            lng: r.lng,
            level: r.level.get(),
            types: r.types.0,
            description: r.description,
            status: r.status,
        })
        .collect())
}

/// All reports authored by `user`, newest first.
pub async fn user_reports(db: &Db, user: i64) -> Result<Vec<AuthoredReport>, ServiceError> {
    let reports: Vec<Report> = sqlx::query_as(&format!(
        "SELECT {REPORT_COLUMNS} FROM pollutions WHERE user_id = ? ORDER BY created_at DESC, id DESC"
    ))
    .bind(user)
    .fetch_all(db)
    .await?;
    let ids: Vec<i64> = reports.iter().map(|r| r.id).collect();
    let photos = photos_by_report(db, &ids).await?;

    Ok(reports
        .into_iter()
        .map(|r| {
            let p = photos.get(&r.id);
            AuthoredReport {
                photos_before: urls(p, PhotoKind::Before),
                photos_after: urls(p, PhotoKind::After),
                id: r.id,
                lat: r.lat,
                lng: r.lng,
                level: r.level.get(),
                types: r.types.0,
                description: r.description,
                status: r.status,
                reward: r.reward,
                clean_comment: r.clean_comment,
                created_at: r.created_at,
                cleaned_at: r.cleaned_at,
            }
        })
        .collect())
}

/// Reports cleaned by `user`, most recent cleanup first.
pub async fn cleanup_history(db: &Db, user: i64) -> Result<Vec<HistoryEntry>, ServiceError> {
    let reports: Vec<Report> = sqlx::query_as(&format!(
        r#"
        SELECT {REPORT_COLUMNS} FROM pollutions
            WHERE status = 'cleaned' AND cleaner_id = ?
            ORDER BY cleaned_at DESC, id DESC
        "#
    ))
    .bind(user)
    .fetch_all(db)
    .await?;
    let ids: Vec<i64> = reports.iter().map(|r| r.id).collect();
    let photos = photos_by_report(db, &ids).await?;

    Ok(reports
        .into_iter()
        .map(|r| HistoryEntry {
            photos: urls(photos.get(&r.id), PhotoKind::After),
            id: r.id,
            lat: r.lat,
            lng: r.lng,
            level: r.level.get(),
            types: r.types.0,
            description: r.description,
            reward: r.reward,
            comment: r.clean_comment,
            created_at: r.created_at,
            cleaned_at: r.cleaned_at,
        })
        .collect())
}

pub async fn profile(db: &Db, user: i64) -> Result<Profile, ServiceError> {
    sqlx::query_as(
        r#"
        SELECT u.id, u.telegram_id, u.username, u.first_name, u.balance, u.language,
            (SELECT COUNT(*) FROM pollutions p
                WHERE p.cleaner_id = u.id AND p.status = 'cleaned') AS cleaned_count
            FROM users u
            WHERE u.id = ?
        "#,
    )
    .bind(user)
    .fetch_optional(db)
    .await?
    .ok_or(ServiceError::NotFound("user"))
}

/// The `limit` users with the highest balance. Equal balances are ordered by account age.
pub async fn leaderboard(db: &Db, limit: u32) -> Result<Vec<LeaderboardEntry>, ServiceError> {
    Ok(sqlx::query_as(
        r#"
        SELECT u.id, u.username, u.first_name, u.balance,
            (SELECT COUNT(*) FROM pollutions p
                WHERE p.cleaner_id = u.id AND p.status = 'cleaned') AS cleaned_count
            FROM users u
            ORDER BY u.balance DESC, u.id ASC
            LIMIT ?
        "#,
    )
    .bind(i64::from(limit))
    .fetch_all(db)
    .await?)
}

pub async fn user_count(db: &Db) -> Result<i64, ServiceError> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(db)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::CleanupConfig,
        models::SeverityLevel,
        reports::{Cleanup, NewReport, ReportService},
        tests::TestDb,
    };

    async fn seed(service: &ReportService, reporter: i64, photos: &[&str]) -> anyhow::Result<i64> {
        Ok(service
            .create(NewReport {
                reporter_id: reporter,
                lat: 41.3,
                lng: 69.2,
                level: SeverityLevel::try_from(2)?,
                types: vec!["trash".to_owned()],
                description: String::new(),
                photos: photos.iter().map(|&p| p.to_owned()).collect(),
            })
            .await?)
    }

    async fn clean(service: &ReportService, id: i64, cleaner: i64, photo: &str) -> anyhow::Result<()> {
        let _outcome = service
            .clean(
                id,
                Cleanup {
                    cleaner_id: Some(cleaner),
                    comment: Some(format!("cleaned #{id}")),
                    photos: vec![photo.to_owned()],
                },
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn map_shows_only_active_reports_with_before_photos() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let service = ReportService::new(db.pool.clone(), CleanupConfig::default());
        let a = db.user(1).await?;
        let b = db.user(2).await?;

        let open = seed(&service, a.id, &["b1", "b2"]).await?;
        let done = seed(&service, a.id, &["b3"]).await?;
        clean(&service, done, b.id, "a1").await?;

        let markers = active_reports(&db.pool).await?;
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].id, open);
        assert_eq!(markers[0].photos, vec!["b1".to_owned(), "b2".to_owned()]);
        assert_eq!(markers[0].status, ReportStatus::Active);
        Ok(())
    }

    #[tokio::test]
    async fn authored_reports_and_history() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let service = ReportService::new(db.pool.clone(), CleanupConfig::default());
        let a = db.user(1).await?;
        let b = db.user(2).await?;

        let first = seed(&service, a.id, &["b1"]).await?;
        let second = seed(&service, a.id, &["b2"]).await?;
        clean(&service, first, b.id, "a1").await?;
        clean(&service, second, b.id, "a2").await?;

        let authored = user_reports(&db.pool, a.id).await?;
        assert_eq!(authored.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(authored[1].photos_before, vec!["b1".to_owned()]);
        assert_eq!(authored[1].photos_after, vec!["a1".to_owned()]);
        assert_eq!(authored[1].clean_comment.as_deref(), Some(format!("cleaned #{first}").as_str()));

        let history = cleanup_history(&db.pool, b.id).await?;
        assert_eq!(history.iter().map(|h| h.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(history[0].photos, vec!["a2".to_owned()]);
        assert_eq!(history[0].reward, 2.0);

        assert!(cleanup_history(&db.pool, a.id).await?.is_empty());
        assert!(user_reports(&db.pool, b.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn profile_counts_personal_cleanups() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let service = ReportService::new(db.pool.clone(), CleanupConfig::default());
        let a = db.user(1).await?;
        let b = db.user(2).await?;

        let id = seed(&service, a.id, &[]).await?;
        clean(&service, id, b.id, "a").await?;

        let pa = profile(&db.pool, a.id).await?;
        assert_eq!((pa.cleaned_count, pa.balance), (0, 0.0));
        let pb = profile(&db.pool, b.id).await?;
        assert_eq!((pb.cleaned_count, pb.balance), (1, 2.0));
        assert_eq!(pb.language, Language::Ru);

        assert!(matches!(
            profile(&db.pool, 404).await,
            Err(ServiceError::NotFound("user"))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn photos_are_grouped_by_report() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let service = ReportService::new(db.pool.clone(), CleanupConfig::default());
        let a = db.user(1).await?;

        let first = seed(&service, a.id, &["b1", "b2"]).await?;
        let second = seed(&service, a.id, &["b3"]).await?;
        let bare = seed(&service, a.id, &[]).await?;

        let photos = photos_by_report(&db.pool, &[first, second, bare]).await?;
        let urls_of = |id: i64| -> Vec<&str> {
            photos
                .get(&id)
                .into_iter()
                .flatten()
                .map(|p| p.url.as_str())
                .collect()
        };
        assert_eq!(urls_of(first), vec!["b1", "b2"]);
        assert_eq!(urls_of(second), vec!["b3"]);
        assert!(!photos.contains_key(&bare));

        assert!(photos_by_report(&db.pool, &[]).await?.is_empty());
        Ok(())
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn read_queries_can_run_on_any_worker() -> anyhow::Result<()> {
        let db = TestDb::new().await?;

        // The HTTP handlers hold these futures across awaits, so they must be `Send`.
        let map = active_reports(&db.pool);
        assert_send(&map);
        let authored = user_reports(&db.pool, 1);
        assert_send(&authored);
        let history = cleanup_history(&db.pool, 1);
        assert_send(&history);

        assert!(map.await?.is_empty());
        assert!(authored.await?.is_empty());
        assert!(history.await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn leaderboard_orders_by_balance() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        let low = db.user_with_balance(1, 30.0).await?;
        let first = db.user_with_balance(2, 50.0).await?;
        let second = db.user_with_balance(3, 50.0).await?;

        let board = leaderboard(&db.pool, 10).await?;
        assert_eq!(
            board.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![first.id, second.id, low.id]
        );
        assert!(board.iter().all(|e| e.cleaned_count == 0));

        assert_eq!(leaderboard(&db.pool, 2).await?.len(), 2);
        assert_eq!(user_count(&db.pool).await?, 3);
        Ok(())
    }
}
