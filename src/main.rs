use clap::Parser;
use credit_engine_worker::config::Config;
use credit_engine_worker::consumer::QueueConsumer;
use credit_engine_worker::integrations::amqp::AmqpBroker;
use credit_engine_worker::integrations::gateway_client::ApiGatewayClient;
use credit_engine_worker::telemetry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "credit-engine-worker",
    about = "Consume credit requests from RabbitMQ and forward them to the credit engine",
    version
)]
struct Cli {
    /// Run attached to an interactive console instead of as a background service
    #[arg(long)]
    console: bool,
}

/// Main entry point for the worker.
///
/// Initializes logging and configuration, wires the Gateway client and the
/// AMQP broker into the queue consumer, and runs the consumer until SIGINT
/// or SIGTERM.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.console)?;

    tracing::info!("Starting LMS Credit Engine Worker...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;

    let gateway = Arc::new(ApiGatewayClient::new(&config.api)?);
    tracing::info!("Gateway client initialized: {}", config.api.base_url);

    let broker = Arc::new(AmqpBroker::new(&config.message));
    let consumer = QueueConsumer::new(config.message.clone(), config.timing, broker, gateway);
    tracing::info!(
        "Worker configured to process queue: {}",
        config.message.queue
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Stopping LMS Credit Engine Worker...");
        signal_cancel.cancel();
    });

    match consumer.run(cancel).await {
        Ok(()) => {
            tracing::info!("Worker stopped successfully");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Critical failure in LMS Credit Engine Worker: {}", e);
            Err(e.into())
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
