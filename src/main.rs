use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use outreach::api::{self, AppState};
use outreach::config::OutreachConfig;
use outreach::events::{BroadcastNotifier, FanoutNotifier, Notifier, WebhookNotifier};
use outreach::gateway::{FileGateway, Gateway, LogOnlySender, Sender, SmtpSender};
use outreach::store::{LibSqlBackend, RecordStore};
use outreach::worker::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = OutreachConfig::from_env().context("Invalid configuration")?;

    // Logging: stderr always, plus a daily file when OUTREACH_LOG_DIR is set.
    // The guard must live until exit so buffered lines are flushed.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "outreach.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("📨 Outreach v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn RecordStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Gateway ─────────────────────────────────────────────────────────
    let files = Arc::new(FileGateway::new(config.handoff_dir.clone()));
    eprintln!("   Handoff: {}", config.handoff_dir.display());
    let sender: Arc<dyn Sender> = match &config.smtp {
        Some(smtp) => {
            eprintln!("   SMTP: {}:{} as {}", smtp.host, smtp.port, smtp.from_address);
            Arc::new(SmtpSender::new(smtp.clone()))
        }
        None => {
            eprintln!("   SMTP: not configured (messages will not be sent)");
            Arc::new(LogOnlySender)
        }
    };
    let gateway = Gateway::new(files.clone(), files.clone(), files, sender);

    // ── Notifications ───────────────────────────────────────────────────
    let events = BroadcastNotifier::new();
    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => {
            eprintln!("   Webhook: {url}");
            let sinks: Vec<Arc<dyn Notifier>> = vec![
                events.clone(),
                Arc::new(WebhookNotifier::new(url.clone())),
            ];
            Arc::new(FanoutNotifier::new(sinks))
        }
        None => events.clone(),
    };

    // ── Scheduler ───────────────────────────────────────────────────────
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        gateway,
        notifier,
        config.scheduler_config(),
    );
    let resumed = scheduler
        .resume_all()
        .await
        .context("Failed to resume persisted workloads")?;
    eprintln!("   Resumed: {resumed} workload(s)");

    // ── API ─────────────────────────────────────────────────────────────
    if let Some(port) = config.api_port {
        let app = api::router(AppState {
            scheduler: Arc::clone(&scheduler),
            store: Arc::clone(&store),
            events: Arc::clone(&events),
        });
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("Failed to bind API port {port}"))?;
        eprintln!("   API: http://0.0.0.0:{port}/api/workloads");
        eprintln!("   Events WS: ws://0.0.0.0:{port}/ws\n");
        tokio::spawn(async move {
            tracing::info!(port, "API server started");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "API server stopped");
            }
        });
    }

    {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, finishing in-flight steps");
                scheduler.shutdown();
            }
        });
    }

    scheduler.run().await?;
    Ok(())
}
