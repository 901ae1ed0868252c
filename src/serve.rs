use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context as _;
use axum::{Router, extract::FromRef, routing::get};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity, log::LevelFilter};
use figment::{Figment, providers::Format as _};
use teloxide::Bot;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub use super::error::Error;
use super::{
    admin::AdminService,
    bot::{self, BotContext},
    config::AppConfig,
    db::{Db, establish_pool, migrator::DatabaseMigrator},
    notify::{DisabledNotifier, Notifier, TelegramNotifier},
    reports::ReportService,
};

/// The application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug, Clone)]
/// Command line arguments.
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "default.toml")]
    pub config: PathBuf,
    /// The verbosity level.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

#[derive(Clone, FromRef)]
/// The application state, shared across all routes.
pub struct AppState {
    /// The application configuration.
    pub(crate) config: AppConfig,
    /// The database connection pool.
    pub db: Db,
    /// The report lifecycle service.
    pub reports: ReportService,
    /// Operator-only operations.
    pub admin: AdminService,
}

impl AppState {
    pub(crate) fn new(config: AppConfig, db: Db, notifier: Arc<dyn Notifier>) -> Self {
        let operators = config.admins.iter().copied().collect();
        Self {
            reports: ReportService::new(db.clone(), config.cleanup),
            admin: AdminService::new(db.clone(), operators, notifier),
            config,
            db,
        }
    }
}

/// Build the HTTP application. The API lives under `/api`.
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(super::index))
        .nest("/api", super::endpoints::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The main application entry point.
pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up trace logging to console and account for the user-provided verbosity flag.
    if args.verbosity.log_level_filter() != LevelFilter::Off {
        let lvl = match args.verbosity.log_level_filter() {
            LevelFilter::Error => tracing::Level::ERROR,
            LevelFilter::Warn => tracing::Level::WARN,
            LevelFilter::Info | LevelFilter::Off => tracing::Level::INFO,
            LevelFilter::Debug => tracing::Level::DEBUG,
            LevelFilter::Trace => tracing::Level::TRACE,
        };
        tracing_subscriber::fmt().with_max_level(lvl).init();
    }

    if !args.config.exists() {
        // Throw up a warning if the config file does not exist.
        //
        // This is not fatal because users can specify all configuration settings via
        // the environment.
        warn!(
            "configuration file {} does not exist",
            args.config.display()
        );
    }

    // Read and parse the user-provided configuration.
    let config: AppConfig = Figment::new()
        .admerge(figment::providers::Toml::file(args.config))
        .admerge(figment::providers::Env::prefixed("ECOPATROL_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    if config.admins.is_empty() {
        warn!("no operators configured, the admin API will reject every request");
    }

    // Initialize metrics reporting.
    super::metrics::setup(config.metrics.as_ref()).context("failed to set up metrics exporter")?;

    let db = establish_pool(&config.db)
        .await
        .context("failed to establish database connection pool")?;
    DatabaseMigrator::new(db.clone())
        .migrate_to_latest_or_throw()
        .await
        .context("failed to apply migrations")?;

    let telegram = config.bot.as_ref().map(|b| Bot::new(&b.token));
    let notifier: Arc<dyn Notifier> = match telegram.clone() {
        Some(bot) => Arc::new(TelegramNotifier::new(bot)),
        None => {
            warn!("no bot token configured, the bot and notifications are disabled");
            Arc::new(DisabledNotifier)
        }
    };

    let state = AppState::new(config.clone(), db.clone(), notifier);

    if let Some(telegram) = telegram {
        let ctx = BotContext {
            db,
            admin: state.admin.clone(),
            mini_app_url: config.mini_app_url.clone(),
        };
        drop(tokio::spawn(bot::run(telegram, ctx)));
    }

    let addr = config
        .listen_address
        .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000));

    let app = router(state);

    info!("listening on {addr}");
    info!("connect to: http://127.0.0.1:{}", addr.port());

    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind address")?;

    axum::serve(listener, app.into_make_service())
        .await
        .context("failed to serve app")
}
