//! Metric name constants.

use std::time::Duration;

use anyhow::Context;
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config;

pub const ADMIN_DENIED: &str = "ecopatrol.admin.denied"; // Counter.

pub const NOTIFY_FAILED: &str = "ecopatrol.notify.failed"; // Counter.
pub const NOTIFY_SENT: &str = "ecopatrol.notify.sent"; // Counter.

pub const REPORTS_CREATED: &str = "ecopatrol.reports.created"; // Counter.
pub const REPORTS_CLEANED: &str = "ecopatrol.reports.cleaned"; // Counter.
pub const REPORTS_CLEAN_CONFLICTS: &str = "ecopatrol.reports.clean_conflicts"; // Counter.
pub const REWARDS_CREDITED: &str = "ecopatrol.rewards.credited"; // Counter.

/// Must be ran exactly once on startup. This will declare all of the instruments for `metrics`.
pub fn setup(config: Option<&config::MetricConfig>) -> anyhow::Result<()> {
    describe_counter!(
        ADMIN_DENIED,
        "The number of admin requests rejected by the operator allow-list."
    );

    describe_counter!(NOTIFY_FAILED, "Notifications that could not be delivered.");
    describe_counter!(NOTIFY_SENT, "Notifications delivered to users.");

    describe_counter!(REPORTS_CREATED, "The count of pollution reports created.");
    describe_counter!(REPORTS_CLEANED, "The count of pollution reports cleaned.");
    describe_counter!(
        REPORTS_CLEAN_CONFLICTS,
        "Cleanups rejected because the report was already cleaned."
    );
    describe_counter!(
        REWARDS_CREDITED,
        "The count of cleanup rewards credited to a cleaner."
    );

    if let Some(config) = config {
        match config {
            config::MetricConfig::PrometheusPush(prometheus_config) => {
                PrometheusBuilder::new()
                    .with_push_gateway(
                        prometheus_config.url.clone(),
                        Duration::from_secs(10),
                        None,
                        None,
                    )
                    .context("failed to set up push gateway")?
                    .install()
                    .context("failed to install metrics exporter")?;
            }
        }
    }

    Ok(())
}
