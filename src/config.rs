//! Application configuration, loaded with `figment` from TOML and the environment.
use std::net::SocketAddr;

use serde::Deserialize;
use url::Url;

/// Default number of entries returned by the leaderboard.
const fn default_leaderboard_size() -> u32 {
    10
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case", tag = "type")]
/// Metrics exporter configuration.
pub enum MetricConfig {
    /// Push metrics to a Prometheus push gateway.
    PrometheusPush(PrometheusConfig),
}

#[derive(Deserialize, Debug, Clone)]
/// Prometheus push gateway settings.
pub struct PrometheusConfig {
    /// The push gateway endpoint.
    pub url: String,
}

#[derive(Deserialize, Debug, Clone)]
/// Telegram bot settings. The bot and the notification gateway are disabled without them.
pub struct BotConfig {
    /// The bot API token issued by @BotFather.
    pub token: String,
}

#[derive(Deserialize, Debug, Clone, Copy, Default)]
/// Policy knobs for the cleanup transition.
pub struct CleanupConfig {
    /// Reject cleanups whose cleaner id does not resolve to a user.
    #[serde(default)]
    pub require_known_cleaner: bool,
}

#[derive(Deserialize, Debug, Clone)]
/// The top-level application configuration.
pub struct AppConfig {
    /// Address to bind the HTTP API to. Defaults to `127.0.0.1:5000`.
    pub listen_address: Option<SocketAddr>,
    /// SQLite connection string, e.g. `sqlite://data/ecopatrol.db`.
    pub db: String,
    /// Telegram ids of operators allowed to use the admin API.
    #[serde(default)]
    pub admins: Vec<i64>,
    /// Public URL of the mini-app frontend.
    pub mini_app_url: Url,
    /// Number of entries returned by the leaderboard.
    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: u32,
    /// Cleanup policy.
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Telegram bot settings.
    pub bot: Option<BotConfig>,
    /// Metrics exporter settings.
    pub metrics: Option<MetricConfig>,
}
