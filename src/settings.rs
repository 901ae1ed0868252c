//! Typed view over the `global_settings` key/value table.
//!
//! Rows are parsed into [`Settings`] when loaded. Unknown keys are ignored and malformed values
//! are skipped with a warning, so a bad row degrades to the default instead of failing reads.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqliteExecutor};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    models::{InvalidLevel, SeverityLevel},
    rewards::{InvalidAmount, RewardSchedule},
};

/// Key prefix of the per-level reward rows, e.g. `reward_level_2`.
pub const REWARD_KEY_PREFIX: &str = "reward_level_";
/// Key of the frontend debug-logging flag.
pub const DEBUG_LOGGING_KEY: &str = "debug_logging";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Level(#[from] InvalidLevel),
    #[error(transparent)]
    Amount(#[from] InvalidAmount),
}

/// Feature flags published to the frontend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Show the in-app debug console.
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub rewards: RewardSchedule,
    pub flags: FeatureFlags,
}

/// A partial settings change, as submitted by an operator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    /// New reward per numeric level.
    #[serde(default)]
    pub rewards: BTreeMap<u8, f64>,
    #[serde(default)]
    pub flags: FlagsUpdate,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FlagsUpdate {
    pub debug_logging: Option<bool>,
}

impl Settings {
    /// Build settings from raw `(key, value)` rows.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Self::default();
        for (key, value) in rows {
            if let Some(level) = key.strip_prefix(REWARD_KEY_PREFIX) {
                let parsed = level
                    .parse::<i64>()
                    .ok()
                    .and_then(|l| SeverityLevel::try_from(l).ok())
                    .zip(value.trim().parse::<f64>().ok());
                match parsed {
                    Some((level, amount)) if settings.rewards.set(level, amount).is_ok() => {}
                    _ => warn!("ignoring malformed reward setting {key} = {value:?}"),
                }
            } else if key == DEBUG_LOGGING_KEY {
                match value.trim().parse::<bool>() {
                    Ok(v) => settings.flags.debug_logging = v,
                    Err(_e) => warn!("ignoring malformed flag {key} = {value:?}"),
                }
            } else {
                debug!("ignoring unknown setting {key}");
            }
        }
        settings
    }

    /// Validate `update` and apply it, returning the `(key, value)` rows that changed.
    pub fn apply(&mut self, update: &SettingsUpdate) -> Result<Vec<(String, String)>, SettingsError> {
        // Validate everything before touching `self`.
        let mut rewards = self.rewards.clone();
        let mut rows = Vec::new();
        for (&level, &amount) in &update.rewards {
            let level = SeverityLevel::try_from(i64::from(level))?;
            rewards.set(level, amount)?;
            rows.push((format!("{REWARD_KEY_PREFIX}{level}"), amount.to_string()));
        }

        self.rewards = rewards;
        if let Some(debug_logging) = update.flags.debug_logging {
            self.flags.debug_logging = debug_logging;
            rows.push((DEBUG_LOGGING_KEY.to_owned(), debug_logging.to_string()));
        }
        Ok(rows)
    }
}

/// Load the current settings.
pub async fn load<'e, E: SqliteExecutor<'e>>(db: E) -> Result<Settings, sqlx::Error> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM global_settings")
        .fetch_all(db)
        .await?;
    Ok(Settings::from_rows(rows))
}

/// Upsert raw setting rows.
pub async fn store(conn: &mut SqliteConnection, rows: &[(String, String)]) -> Result<(), sqlx::Error> {
    for (key, value) in rows {
        let _res = sqlx::query(
            r#"
            INSERT INTO global_settings (key, value) VALUES (?, ?)
                ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    fn level(l: i64) -> SeverityLevel {
        SeverityLevel::try_from(l).expect("valid level")
    }

    #[test]
    fn parses_known_keys() {
        let settings = Settings::from_rows(rows(&[
            ("reward_level_1", "10"),
            ("reward_level_3", " 2.5 "),
            ("debug_logging", "true"),
            ("theme", "dark"),
        ]));

        assert_eq!(settings.rewards.resolve(level(1)), 10.0);
        assert_eq!(settings.rewards.resolve(level(2)), 2.0);
        assert_eq!(settings.rewards.resolve(level(3)), 2.5);
        assert!(settings.flags.debug_logging);
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let settings = Settings::from_rows(rows(&[
            ("reward_level_1", "lots"),
            ("reward_level_2", "-4"),
            ("reward_level_9", "100"),
            ("debug_logging", "maybe"),
        ]));

        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn apply_is_all_or_nothing() {
        let mut settings = Settings::default();
        let update = SettingsUpdate {
            rewards: BTreeMap::from([(1, 5.0), (4, 1.0)]),
            flags: FlagsUpdate {
                debug_logging: Some(true),
            },
        };

        assert!(settings.apply(&update).is_err());
        assert_eq!(settings, Settings::default());

        let update = SettingsUpdate {
            rewards: BTreeMap::from([(1, 5.0)]),
            flags: FlagsUpdate {
                debug_logging: Some(true),
            },
        };
        let changed = settings.apply(&update).expect("valid update");
        assert_eq!(
            changed,
            rows(&[("reward_level_1", "5"), ("debug_logging", "true")])
        );
        assert_eq!(settings.rewards.resolve(level(1)), 5.0);
        assert!(settings.flags.debug_logging);
    }
}
