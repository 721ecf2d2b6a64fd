use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. The broker client only reports warnings.
pub const DEFAULT_FILTER: &str = "credit_engine_worker=info,lapin=warn";

/// Install the global tracing subscriber.
///
/// Console mode writes colourised, compact lines for an interactive terminal;
/// service mode writes plain lines with targets for a supervisor's log capture.
pub fn init(console: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .map_err(|e| anyhow::anyhow!("invalid log filter: {}", e))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(console)
        .with_target(!console);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}
