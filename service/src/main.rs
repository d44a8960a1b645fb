//! RSVP attendance service.

use rsvp_runtime::metrics::MetricsServer;
use rsvp_service::{App, ServiceConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "rsvp_service=info,rsvp_runtime=info,rsvp_postgres=info,\
                     rsvp_redpanda=info,rsvp_projections=info"
                        .into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting RSVP service");

    let config = ServiceConfig::from_env();
    info!(
        redpanda_brokers = %config.redpanda.brokers,
        event_topic = %config.redpanda.event_topic,
        group_topic = %config.redpanda.group_topic,
        metrics_addr = %config.metrics_addr,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr);
    metrics.serve()?;

    let app = App::start(&config).await?;
    info!("RSVP service ready");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Err(e) = app.shutdown(config.shutdown_timeout).await {
        error!(error = ?e, "Unclean shutdown");
        return Err(e);
    }

    info!("RSVP service stopped");
    Ok(())
}
