use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;

mod alerts;
mod config;
mod db;
mod feed;
mod geo;
mod location;
mod models;
mod report;
mod stats;

use alerts::{
    AlertWatcher, LogNotifier, NotificationCenter, NotificationPermission, Notifier,
    TerminalNotifier,
};
use config::AppConfig;
use db::PgStore;
use feed::FeedQuery;
use geo::Coordinate;
use location::{
    FixedLocationProvider, LastLocation, LocationProvider, LocationRefresher,
    UnavailableLocationProvider,
};
use models::{NewReport, Severity};

#[derive(Parser)]
#[command(name = "disaster-reports")]
#[command(about = "Crowdsourced disaster reports with proximity alerts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample reports
    Seed,
    /// Import reports from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Submit a new incident report
    Submit {
        #[arg(long = "type")]
        disaster_type: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, value_parser = parse_severity)]
        severity: Option<Severity>,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
        #[arg(long)]
        contact: Option<String>,
    },
    /// List reports, newest first
    List {
        #[arg(long, default_value = "all")]
        filter: String,
        #[arg(long, default_value_t = 8)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Print dashboard statistics
    Stats,
    /// Write a markdown dashboard report
    Report {
        #[arg(long, default_value = "all")]
        filter: String,
        #[arg(long, default_value = "dashboard.md")]
        out: PathBuf,
    },
    /// Follow the report collection and print updates until Ctrl-C
    Live {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Track a user's location and raise proximity alerts until Ctrl-C
    Watch {
        #[arg(long)]
        user: String,
        #[arg(long, requires = "lng", allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lng: Option<f64>,
        #[arg(long, value_enum, default_value_t = NotificationPermission::Granted)]
        permission: NotificationPermission,
        /// Send alerts to the log instead of the terminal
        #[arg(long)]
        log_notifications: bool,
    },
}

fn parse_severity(value: &str) -> Result<Severity, String> {
    Severity::parse(value).ok_or_else(|| {
        let choices: Vec<&str> = Severity::SELECTABLE.iter().map(|s| s.as_str()).collect();
        format!("expected one of {}", choices.join(", "))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("disaster_reports=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Inserted {inserted} sample reports.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} reports from {}.", csv.display());
        }
        Commands::Submit {
            disaster_type,
            description,
            severity,
            lat,
            lng,
            contact,
        } => {
            let new_report = NewReport {
                disaster_type,
                description,
                severity,
                lat: Some(lat),
                lng: Some(lng),
                contact,
            };
            let stored = db::insert_report(&pool, &new_report)
                .await
                .context("error submitting report")?;
            info!(report_id = %stored.id, "report submitted");
            println!("Report submitted ({}).", stored.id);
        }
        Commands::List {
            filter,
            limit,
            json,
        } => {
            let visible = db::fetch_reports(&pool, Some(filter.as_str())).await?;
            if json {
                let shown: Vec<_> = visible.iter().take(limit).collect();
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("{} reports matching {filter}", visible.len());
                print!("{}", report::render_recent(&visible, limit));
            }
        }
        Commands::Stats => {
            let reports = db::fetch_reports(&pool, None).await?;
            let summary = stats::dashboard_stats(&reports, Utc::now());
            println!(
                "Total {} | Today {} | This week {} | Types {}",
                summary.total, summary.today, summary.this_week, summary.distinct_types
            );
            for (severity, count) in summary.severity_counts.iter() {
                println!("- {severity}: {count}");
            }
            for (status, count) in summary.status_counts.iter() {
                println!("- {}: {count}", status.label());
            }
        }
        Commands::Report { filter, out } => {
            let reports = db::fetch_reports(&pool, None).await?;
            let markdown = report::build_report(Some(filter.as_str()), &reports, Utc::now());
            std::fs::write(&out, markdown)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Live { limit } => {
            let store = Arc::new(PgStore::new(pool.clone()));
            let mut snapshots = feed::watch_snapshots(store, FeedQuery::all(), config.poll_interval);
            loop {
                tokio::select! {
                    snapshot = snapshots.next() => {
                        let Some(reports) = snapshot else {
                            println!("Live updates stopped.");
                            break;
                        };
                        let summary = stats::dashboard_stats(&reports, Utc::now());
                        println!(
                            "{} reports ({} today, {} this week)",
                            summary.total, summary.today, summary.this_week
                        );
                        print!("{}", report::render_recent(&reports, limit));
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            snapshots.unsubscribe();
        }
        Commands::Watch {
            user,
            lat,
            lng,
            permission,
            log_notifications,
        } => {
            let notifier: Arc<dyn Notifier> = if log_notifications {
                Arc::new(LogNotifier)
            } else {
                Arc::new(TerminalNotifier)
            };
            run_watch(&config, pool.clone(), user, lat.zip(lng), permission, notifier).await?;
        }
    }

    Ok(())
}

async fn run_watch(
    config: &AppConfig,
    pool: sqlx::PgPool,
    user: String,
    position: Option<(f64, f64)>,
    permission: NotificationPermission,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<()> {
    let store = Arc::new(PgStore::new(pool));
    let last_location = LastLocation::default();
    let provider: Arc<dyn LocationProvider> = match position {
        Some(position) => Arc::new(FixedLocationProvider::new(Coordinate::from(position))),
        None => Arc::new(UnavailableLocationProvider),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresher = LocationRefresher::new(
        user.clone(),
        provider,
        store.clone(),
        last_location.clone(),
        config.location_refresh,
    )
    .spawn(shutdown_rx.clone());

    let mut center = NotificationCenter::new(notifier);
    center
        .request_permission(permission, &user, config.push_token.as_deref(), &*store)
        .await;
    let watcher = AlertWatcher::new(center, last_location);

    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    match watcher.subscribe(store, config.alert_window, config.poll_interval)? {
        Some(subscription) => {
            info!(%user, "watching for nearby reports");
            let fired = watcher.run(subscription, shutdown_rx).await;
            info!(fired, "proximity watch finished");
        }
        None => {
            info!(%user, ?permission, "notifications not granted; proximity alerts disabled");
            let mut shutdown = shutdown_rx;
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    signal.abort();
    refresher.await.context("location refresher panicked")?;
    Ok(())
}
