use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

use quillpost::auth::Argon2Hasher;
use quillpost::mail::{LogMailer, MailSender, SmtpMailer};
use quillpost::observability::{self, ObservabilityConfig, SecurityEvent};
use quillpost::store::{
    create_pool, health_check, run_migrations, AccountStore, DatabaseConfig, MemoryStore,
    PgStore, PostStore,
};
use quillpost::{build_router, AppConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init(&ObservabilityConfig::from_env())
        .context("failed to initialize logging")?;

    let config = AppConfig::from_env().context("invalid configuration")?;
    let (accounts, posts) = open_store(&config).await?;

    let mailer: Arc<dyn MailSender> = match &config.smtp {
        Some(smtp) => {
            info!(server = %smtp.server, port = smtp.port, "Relaying mail over SMTP");
            Arc::new(SmtpMailer::new(smtp).context("invalid SMTP configuration")?)
        }
        None => {
            warn!("MAIL_SERVER not set, reset emails will not be delivered");
            Arc::new(LogMailer)
        }
    };

    let bind_addr = config.bind_addr;
    quillpost::security_event!(
        SecurityEvent::SystemStartup,
        environment = %config.environment,
        bind_addr = %bind_addr,
        lockout_threshold = config.lockout.threshold,
        "Starting quillpost"
    );

    let state = AppState::new(
        config,
        accounts,
        posts,
        Arc::new(Argon2Hasher::default()),
        mailer,
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(address = %bind_addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("Server stopped");
    Ok(())
}

/// PostgreSQL when `DATABASE_URL` is set. Outside production the in-memory
/// store stands in without it.
async fn open_store(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn AccountStore>, Arc<dyn PostStore>)> {
    if std::env::var_os("DATABASE_URL").is_none() && !config.is_production() {
        warn!("DATABASE_URL not set, using the in-memory store");
        let store = Arc::new(MemoryStore::new());
        let accounts: Arc<dyn AccountStore> = store.clone();
        return Ok((accounts, store));
    }

    let db_config = DatabaseConfig::from_env().context("invalid database configuration")?;
    let pool = create_pool(&db_config)
        .await
        .context("failed to connect to database")?;

    health_check(&pool)
        .await
        .context("database health check failed")?;

    if db_config.auto_migrate {
        run_migrations(&pool).await.context("migrations failed")?;
    }

    let store = Arc::new(PgStore::new(pool));
    let accounts: Arc<dyn AccountStore> = store.clone();
    Ok((accounts, store))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
