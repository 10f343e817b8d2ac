use anyhow::{Context, Result};
use order_relay::kafka::{
    AckingConsumer, DeliveryProducer, DirResourceBundle, Role, TransportConfigBuilder,
    TrustMaterialResolver, spawn_completion_logger,
};
use order_relay::processor::LoggingOrderProcessor;
use order_relay::routes::{AppState, router};
use relay_config::{Config, LogFormat};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    info!("=== Order Relay Starting ===");
    info!("Port: {}", config.port);
    info!(
        brokers = %config.kafka.brokers,
        topic = %config.kafka.topic,
        security_protocol = %config.kafka.security_protocol,
        "Kafka configuration loaded"
    );
    for variable in config.kafka.missing_required() {
        warn!("{} is not set - Kafka connections will fail at startup", variable);
    }

    // Trust material is resolved once and lives until the builder is dropped
    let resources = Arc::new(DirResourceBundle::new(&config.resource_dir));
    let transport = TransportConfigBuilder::new(
        config.kafka.clone(),
        TrustMaterialResolver::new(resources),
    );

    // Producer and its completion logger
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let completion_logger = spawn_completion_logger(report_rx);
    let producer = DeliveryProducer::new(
        &transport.build(Role::Publish),
        &config.kafka.topic,
        report_tx,
    )
    .context("Failed to create Kafka producer")?;

    // Consumer loop
    let consumer = AckingConsumer::connect(
        &transport.build(Role::Consume),
        &config.kafka.topic,
        LoggingOrderProcessor,
    )
    .context("Failed to create Kafka consumer")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    // HTTP server
    let app = router(AppState {
        producer: producer.clone(),
    });

    info!("Order Relay listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .context("Failed to bind to address")?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server");

    // Graceful shutdown: finish the in-flight record, then drain the producer
    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer_task.await {
        error!(error = %e, "Consumer task failed");
    }

    if let Err(e) = producer.flush(FLUSH_TIMEOUT) {
        error!(error = %format!("{:#}", e), "Producer flush incomplete");
    }
    drop(producer);
    if let Err(e) = completion_logger.await {
        error!(error = %e, "Completion logger failed");
    }

    // Removes synthesized trust stores
    drop(transport);

    info!("=== Order Relay Stopped ===");
    served
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, initiating graceful shutdown...");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("SIGINT received, initiating graceful shutdown...");
                    }
                }
                return;
            }
            Err(e) => error!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        // Without a signal source the server runs until killed
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, initiating graceful shutdown...");
}
