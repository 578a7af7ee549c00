//! domainwatch - Website Health Monitor

use domainwatch::config::MonitorConfig;
use domainwatch::context::MonitorContext;
use domainwatch::db::{SqliteStore, TargetRegistry};
use domainwatch::notify::{ChannelGateway, LogChannel, WebhookChannel};
use domainwatch::probe::NetworkTransport;
use domainwatch::scheduler::Scheduler;
use domainwatch::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("domainwatch=info".parse()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let cfg = MonitorConfig::load();
    tracing::info!("Starting domainwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(SqliteStore::new(&cfg.db_path)?);
    tracing::info!("Database initialized with {} targets", store.targets()?.len());

    let transport = Arc::new(NetworkTransport::new(cfg.connection_timeout, &cfg.user_agent)?);

    let mut gateway = ChannelGateway::new().with_channel(LogChannel);
    if let Some(url) = &cfg.webhook_url {
        gateway = gateway.with_channel(WebhookChannel::new(url.clone(), cfg.connection_timeout)?);
    }

    let ctx = MonitorContext::new(
        cfg.clone(),
        store.clone(),
        store.clone(),
        transport,
        Arc::new(gateway),
    );
    let scheduler = Arc::new(Scheduler::new(Arc::new(ctx)));
    let ticker = scheduler.start();

    // Start web server
    let server = Server::new(cfg, store, scheduler.clone());
    tokio::select! {
        res = server.start() => res?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    scheduler.stop();
    ticker.await?;

    Ok(())
}
