//! Reward resolution.
//!
//! Every severity level pays out a configurable amount. Levels without an explicit amount pay
//! their own numeric value, so the default schedule is `1, 2, 3`.
use std::collections::BTreeMap;

use thiserror::Error;

use crate::{db::Db, models::SeverityLevel, settings};

/// A reward amount that is negative or not a finite number.
#[derive(Debug, Error, PartialEq)]
#[error("reward must be a finite, non-negative number, got {0}")]
pub struct InvalidAmount(pub f64);

/// Validates an amount that is about to be written to a reward or a balance.
pub fn validate_amount(amount: f64) -> Result<f64, InvalidAmount> {
    if amount.is_finite() && amount >= 0.0 {
        Ok(amount)
    } else {
        Err(InvalidAmount(amount))
    }
}

/// Mapping from severity level to payout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewardSchedule {
    overrides: BTreeMap<SeverityLevel, f64>,
}

impl RewardSchedule {
    /// The amount paid for cleaning a report of `level`.
    pub fn resolve(&self, level: SeverityLevel) -> f64 {
        self.overrides
            .get(&level)
            .copied()
            .unwrap_or_else(|| f64::from(level.get()))
    }

    pub fn set(&mut self, level: SeverityLevel, amount: f64) -> Result<(), InvalidAmount> {
        let _prev = self.overrides.insert(level, validate_amount(amount)?);
        Ok(())
    }

    /// The resolved amount for every level, keyed by the numeric level.
    pub fn table(&self) -> BTreeMap<u8, f64> {
        SeverityLevel::all()
            .map(|level| (level.get(), self.resolve(level)))
            .collect()
    }
}

/// Resolve the current reward for `level` from the stored schedule.
///
/// A missing setting is not an error; the level's default applies.
pub async fn resolve(db: &Db, level: SeverityLevel) -> Result<f64, sqlx::Error> {
    Ok(settings::load(db).await?.rewards.resolve(level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestDb;

    fn level(l: i64) -> SeverityLevel {
        SeverityLevel::try_from(l).expect("valid level")
    }

    #[test]
    fn default_schedule_is_identity() {
        let schedule = RewardSchedule::default();
        for l in SeverityLevel::all() {
            assert_eq!(schedule.resolve(l), f64::from(l.get()));
        }
    }

    #[test]
    fn overrides_take_precedence() {
        let mut schedule = RewardSchedule::default();
        schedule.set(level(2), 25.0).expect("valid amount");

        assert_eq!(schedule.resolve(level(1)), 1.0);
        assert_eq!(schedule.resolve(level(2)), 25.0);
        assert_eq!(
            schedule.table().into_iter().collect::<Vec<_>>(),
            vec![(1, 1.0), (2, 25.0), (3, 3.0)]
        );
    }

    #[test]
    fn rejects_invalid_amounts() {
        let mut schedule = RewardSchedule::default();
        assert_eq!(schedule.set(level(1), -1.0), Err(InvalidAmount(-1.0)));
        assert!(schedule.set(level(1), f64::NAN).is_err());
        assert!(schedule.set(level(1), f64::INFINITY).is_err());
        assert_eq!(schedule, RewardSchedule::default());
    }

    #[tokio::test]
    async fn resolves_defaults_from_empty_store() -> anyhow::Result<()> {
        let db = TestDb::new().await?;
        for l in SeverityLevel::all() {
            assert_eq!(resolve(&db.pool, l).await?, f64::from(l.get()));
        }
        Ok(())
    }
}
