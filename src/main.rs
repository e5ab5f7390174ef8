use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use bazaar_api as api;
use api::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    events::EventSender,
    gateway::razorpay::RazorpayGateway,
    handlers::{AppServices, Collaborators},
    notifications::{ConnectionRegistry, LogMailer},
    services::notifications::NotificationService,
    AppState,
};

/// Per-user buffer for live notification streams.
const PUSH_BUFFER: usize = 32;

#[derive(Parser, Debug)]
#[command(name = "bazaar-api", version, about = "Marketplace API server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Delete read notifications older than the retention window and exit
    SweepNotifications {
        /// Override the configured retention in days
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cfg, db_pool).await,
        Commands::Migrate => {
            api::db::run_migrations(&db_pool).await?;
            Ok(())
        }
        Commands::SweepNotifications { days } => {
            let db = Arc::new(db_pool);
            let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
            tokio::spawn(api::events::process_events(event_rx));
            let notifications = NotificationService::new(
                db,
                Arc::new(ConnectionRegistry::new(PUSH_BUFFER)),
                Arc::new(EventSender::new(event_tx)),
            );
            let removed = notifications
                .clear_old(days.unwrap_or(cfg.notification_retention_days))
                .await?;
            info!(removed, "notification sweep finished");
            Ok(())
        }
    }
}

async fn serve(cfg: AppConfig, db_pool: sea_orm::DatabaseConnection) -> Result<()> {
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    let db = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    let auth_cfg = AuthConfig::new(
        cfg.jwt_secret.clone(),
        cfg.jwt_expiration_days,
        cfg.is_production(),
    );
    let auth = Arc::new(AuthService::new(auth_cfg, db.clone()));

    if cfg.razorpay.key_id.is_empty() {
        warn!("Razorpay credentials not configured; online payments will fail");
    }
    let gateway =
        RazorpayGateway::new(&cfg.razorpay).context("failed to build payment gateway client")?;

    let services = AppServices::new(
        db.clone(),
        event_sender,
        auth.clone(),
        &cfg.pricing,
        Collaborators {
            gateway: Arc::new(gateway),
            mailer: Arc::new(LogMailer),
            registry: Arc::new(ConnectionRegistry::new(PUSH_BUFFER)),
        },
    );

    spawn_notification_sweeper(
        services.notifications.clone(),
        cfg.notification_retention_days,
        Duration::from_secs(cfg.notification_sweep_interval_secs),
    );

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    let state = AppState {
        db,
        config: Arc::new(cfg),
        auth,
        services,
    };
    let app = api::app_router(state);

    info!("bazaar-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

fn spawn_notification_sweeper(
    notifications: Arc<NotificationService>,
    retention_days: i64,
    every: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match notifications.clear_old(retention_days).await {
                Ok(removed) if removed > 0 => info!(removed, "swept old notifications"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "notification sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
